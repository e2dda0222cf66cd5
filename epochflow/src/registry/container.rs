//! Registry container and write records.

use crate::epoch::EpochId;
use crate::errors::RegistryError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// A named, epoch-versioned key/value container.
///
/// Entries live in a `BTreeMap` so serialization, and therefore the
/// content hash, is independent of insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registry {
    name: String,
    epoch: EpochId,
    #[serde(default)]
    entries: BTreeMap<String, serde_json::Value>,
}

impl Registry {
    /// Creates an empty registry version.
    #[must_use]
    pub fn new(name: impl Into<String>, epoch: EpochId) -> Self {
        Self {
            name: name.into(),
            epoch,
            entries: BTreeMap::new(),
        }
    }

    /// Adds an entry.
    #[must_use]
    pub fn with_entry(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.entries.insert(key.into(), value);
        self
    }

    /// Returns the registry name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the epoch this version belongs to.
    #[must_use]
    pub fn epoch(&self) -> EpochId {
        self.epoch
    }

    /// Returns an entry.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.entries.get(key)
    }

    /// Returns true if the key is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Returns all entries.
    #[must_use]
    pub fn entries(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.entries
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the registry has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Derives the next version: same entries, addressed to `epoch`.
    #[must_use]
    pub fn next_version(&self, epoch: EpochId) -> Self {
        Self {
            name: self.name.clone(),
            epoch,
            entries: self.entries.clone(),
        }
    }

    /// Applies a write to this version.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::RetroactiveWrite`] if the write addresses a
    /// different epoch than this version.
    pub fn apply(&mut self, write: &RegistryWrite) -> Result<(), RegistryError> {
        if write.epoch != self.epoch {
            return Err(RegistryError::RetroactiveWrite {
                registry: self.name.clone(),
                target_epoch: write.epoch,
                current_epoch: self.epoch,
            });
        }
        match &write.op {
            WriteOp::Put { key, value } => {
                self.entries.insert(key.clone(), value.clone());
            }
            WriteOp::Delete { key } => {
                self.entries.remove(key);
            }
        }
        Ok(())
    }

    /// Returns the sha256 hash of the registry's name and entries.
    ///
    /// The epoch is not part of the hash, so an unchanged registry carried
    /// forward hashes identically across epochs.
    #[must_use]
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.name.as_bytes());
        hasher.update([0u8]);
        for (key, value) in &self.entries {
            hasher.update(key.as_bytes());
            hasher.update([0u8]);
            // serde_json's Map is ordered without the preserve_order feature.
            hasher.update(value.to_string().as_bytes());
            hasher.update([1u8]);
        }
        hex::encode(hasher.finalize())
    }
}

/// A single mutation requested by a stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryWrite {
    /// Target registry.
    pub registry: String,
    /// Epoch version the write addresses.
    pub epoch: EpochId,
    /// The mutation.
    pub op: WriteOp,
}

/// Registry mutation kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WriteOp {
    /// Insert or replace an entry.
    Put {
        /// Entry key.
        key: String,
        /// Entry value.
        value: serde_json::Value,
    },
    /// Remove an entry.
    Delete {
        /// Entry key.
        key: String,
    },
}
