//! Working registries of an executing epoch.

use super::{BaselineView, Registry, RegistryWrite};
use crate::epoch::EpochId;
use crate::errors::RegistryError;
use std::collections::{BTreeMap, BTreeSet};

/// The next registry versions, built up wave by wave.
///
/// Stage writes are applied in the order the caller hands them over; the
/// epoch manager always passes them in execution-index order, so the
/// resulting content never depends on stage completion order.
#[derive(Debug, Clone)]
pub struct WorkingSet {
    epoch: EpochId,
    registries: BTreeMap<String, Registry>,
}

impl WorkingSet {
    /// Starts epoch `epoch` from the baseline.
    ///
    /// Every declared registry gets a new version: a copy of its baseline
    /// version if one exists, otherwise an empty one.
    #[must_use]
    pub fn from_baseline(epoch: EpochId, declared: &BTreeSet<String>, baseline: &BaselineView) -> Self {
        let registries = declared
            .iter()
            .map(|name| {
                let next = baseline
                    .registry(name)
                    .map_or_else(|| Registry::new(name.clone(), epoch), |prev| prev.next_version(epoch));
                (name.clone(), next)
            })
            .collect();
        Self { epoch, registries }
    }

    /// Returns the epoch being built.
    #[must_use]
    pub fn epoch(&self) -> EpochId {
        self.epoch
    }

    /// Applies a batch of writes.
    ///
    /// # Errors
    ///
    /// Returns an error on the first write addressing another epoch or an
    /// undeclared registry. Writes before the failing one stay applied; the
    /// caller discards the whole working set on error.
    pub fn apply_all<'a>(&mut self, writes: impl IntoIterator<Item = &'a RegistryWrite>) -> Result<(), RegistryError> {
        for write in writes {
            let registry = self
                .registries
                .get_mut(&write.registry)
                .ok_or_else(|| RegistryError::UnknownRegistry(write.registry.clone()))?;
            registry.apply(write)?;
        }
        Ok(())
    }

    /// Returns a registry.
    #[must_use]
    pub fn registry(&self, name: &str) -> Option<&Registry> {
        self.registries.get(name)
    }

    /// Returns every registry, keyed by name.
    #[must_use]
    pub fn registries(&self) -> &BTreeMap<String, Registry> {
        &self.registries
    }

    /// Returns the content hash of every registry.
    #[must_use]
    pub fn content_hashes(&self) -> BTreeMap<String, String> {
        self.registries
            .iter()
            .map(|(name, reg)| (name.clone(), reg.content_hash()))
            .collect()
    }

    /// Consumes the set, returning the finished versions.
    #[must_use]
    pub fn into_registries(self) -> BTreeMap<String, Registry> {
        self.registries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::WriteOp;
    use serde_json::json;

    fn declared() -> BTreeSet<String> {
        ["deferral".to_string(), "enrollment".to_string()].into_iter().collect()
    }

    fn put(registry: &str, epoch: EpochId, key: &str, value: serde_json::Value) -> RegistryWrite {
        RegistryWrite {
            registry: registry.into(),
            epoch,
            op: WriteOp::Put {
                key: key.into(),
                value,
            },
        }
    }

    #[test]
    fn test_from_baseline_carries_and_fills() {
        let mut regs = BTreeMap::new();
        regs.insert(
            "enrollment".to_string(),
            Registry::new("enrollment", 2025).with_entry("e1", json!(true)),
        );
        let baseline = BaselineView::new(Some(2025), regs);

        let set = WorkingSet::from_baseline(2026, &declared(), &baseline);
        assert_eq!(set.registry("enrollment").unwrap().epoch(), 2026);
        assert_eq!(set.registry("enrollment").unwrap().len(), 1);
        assert!(set.registry("deferral").unwrap().is_empty());
    }

    #[test]
    fn test_last_write_in_order_wins() {
        let mut set = WorkingSet::from_baseline(2026, &declared(), &BaselineView::default());
        let writes = [
            put("deferral", 2026, "e1", json!(0.03)),
            put("deferral", 2026, "e1", json!(0.06)),
        ];
        set.apply_all(&writes).unwrap();
        assert_eq!(set.registry("deferral").unwrap().get("e1"), Some(&json!(0.06)));
    }

    #[test]
    fn test_apply_rejects_unknown_and_retroactive() {
        let mut set = WorkingSet::from_baseline(2026, &declared(), &BaselineView::default());
        assert!(matches!(
            set.apply_all(&[put("payroll", 2026, "e1", json!(1))]),
            Err(RegistryError::UnknownRegistry(_))
        ));
        assert!(matches!(
            set.apply_all(&[put("deferral", 2025, "e1", json!(1))]),
            Err(RegistryError::RetroactiveWrite { .. })
        ));
    }
}
