//! Read-only baseline view and per-invocation write buffer.

use super::{Registry, RegistryWrite, WriteOp};
use crate::epoch::EpochId;
use crate::errors::RegistryError;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// The committed registries of the previous epoch, as stages see them.
///
/// Cheap to clone; every stage of an epoch shares the same underlying map.
#[derive(Debug, Clone, Default)]
pub struct BaselineView {
    epoch: Option<EpochId>,
    registries: Arc<BTreeMap<String, Registry>>,
}

impl BaselineView {
    /// Creates a view over committed registries.
    ///
    /// `epoch` is `None` for the seed baseline of the first epoch.
    #[must_use]
    pub fn new(epoch: Option<EpochId>, registries: BTreeMap<String, Registry>) -> Self {
        Self {
            epoch,
            registries: Arc::new(registries),
        }
    }

    /// Returns the epoch the baseline was committed by.
    #[must_use]
    pub fn epoch(&self) -> Option<EpochId> {
        self.epoch
    }

    /// Returns a registry.
    #[must_use]
    pub fn registry(&self, name: &str) -> Option<&Registry> {
        self.registries.get(name)
    }

    /// Returns an entry from a registry.
    #[must_use]
    pub fn get(&self, registry: &str, key: &str) -> Option<&serde_json::Value> {
        self.registries.get(registry).and_then(|r| r.get(key))
    }

    /// Returns the registry names in the view.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.registries.keys().map(String::as_str)
    }

    /// Returns all registries.
    #[must_use]
    pub fn registries(&self) -> &BTreeMap<String, Registry> {
        &self.registries
    }
}

/// Buffers the registry writes of one stage invocation.
///
/// Writes are only folded into the epoch's working registries after the
/// invocation succeeds, so a failed or retried attempt leaves no trace.
#[derive(Debug)]
pub struct RegistryWriter {
    epoch: EpochId,
    declared: Arc<BTreeSet<String>>,
    writes: Mutex<Vec<RegistryWrite>>,
}

impl RegistryWriter {
    /// Creates a writer for the executing epoch.
    #[must_use]
    pub fn new(epoch: EpochId, declared: Arc<BTreeSet<String>>) -> Self {
        Self {
            epoch,
            declared,
            writes: Mutex::new(Vec::new()),
        }
    }

    /// Returns the epoch this writer addresses.
    #[must_use]
    pub fn epoch(&self) -> EpochId {
        self.epoch
    }

    /// Records an insert into the current epoch's version.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownRegistry`] for undeclared registries.
    pub fn put(
        &self,
        registry: impl Into<String>,
        key: impl Into<String>,
        value: serde_json::Value,
    ) -> Result<(), RegistryError> {
        self.put_at(registry, self.epoch, key, value)
    }

    /// Records an insert into an explicit epoch version.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::RetroactiveWrite`] unless `epoch` is the
    /// executing epoch, and [`RegistryError::UnknownRegistry`] for
    /// undeclared registries.
    pub fn put_at(
        &self,
        registry: impl Into<String>,
        epoch: EpochId,
        key: impl Into<String>,
        value: serde_json::Value,
    ) -> Result<(), RegistryError> {
        self.record(
            registry.into(),
            epoch,
            WriteOp::Put {
                key: key.into(),
                value,
            },
        )
    }

    /// Records a removal from the current epoch's version.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownRegistry`] for undeclared registries.
    pub fn delete(&self, registry: impl Into<String>, key: impl Into<String>) -> Result<(), RegistryError> {
        self.record(registry.into(), self.epoch, WriteOp::Delete { key: key.into() })
    }

    fn record(&self, registry: String, epoch: EpochId, op: WriteOp) -> Result<(), RegistryError> {
        if epoch != self.epoch {
            return Err(RegistryError::RetroactiveWrite {
                registry,
                target_epoch: epoch,
                current_epoch: self.epoch,
            });
        }
        if !self.declared.contains(&registry) {
            return Err(RegistryError::UnknownRegistry(registry));
        }
        self.writes.lock().push(RegistryWrite { registry, epoch, op });
        Ok(())
    }

    /// Returns the number of buffered writes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.writes.lock().len()
    }

    /// Returns true if nothing was written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.writes.lock().is_empty()
    }

    /// Drains the buffered writes in the order they were recorded.
    pub fn take(&self) -> Vec<RegistryWrite> {
        std::mem::take(&mut *self.writes.lock())
    }
}
