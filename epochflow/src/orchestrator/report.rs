//! Run reports and status snapshots.

use crate::checkpoint::{Checkpoint, CheckpointStatus};
use crate::epoch::{EpochId, EpochOutcome, EpochProgress};
use crate::governor::ResourceSnapshot;
use crate::validation::Severity;
use serde::Serialize;
use std::collections::BTreeMap;

/// Summary of one `run` or `resume` call.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Run identifier recorded on every checkpoint.
    pub run_id: String,
    /// Epochs executed and committed by this call, in order.
    pub epochs: Vec<EpochOutcome>,
    /// Epochs already committed and therefore not executed.
    pub skipped: Vec<EpochId>,
    /// Wall time in milliseconds.
    pub duration_ms: f64,
}

impl RunReport {
    pub(crate) fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            epochs: Vec::new(),
            skipped: Vec::new(),
            duration_ms: 0.0,
        }
    }

    /// Returns the outcome of an executed epoch.
    #[must_use]
    pub fn epoch(&self, epoch: EpochId) -> Option<&EpochOutcome> {
        self.epochs.iter().find(|o| o.epoch == epoch)
    }

    /// Returns the executed epoch ids.
    #[must_use]
    pub fn executed(&self) -> Vec<EpochId> {
        self.epochs.iter().map(|o| o.epoch).collect()
    }

    /// Returns registry hashes per executed epoch.
    #[must_use]
    pub fn registry_hashes(&self) -> BTreeMap<EpochId, BTreeMap<String, String>> {
        self.epochs
            .iter()
            .map(|o| (o.epoch, o.registry_hashes.clone()))
            .collect()
    }

    /// Returns the number of WARNING validation results across all epochs.
    #[must_use]
    pub fn warning_count(&self) -> usize {
        self.epochs
            .iter()
            .map(|o| o.validation.count(Severity::Warning))
            .sum()
    }
}

/// Point-in-time view of the orchestrator.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStatus {
    /// Run identifier.
    pub run_id: String,
    /// What the epoch loop is doing now.
    pub progress: EpochProgress,
    /// Pool size currently in effect.
    pub pool_size: usize,
    /// Latest resource reading.
    pub resources: Option<ResourceSnapshot>,
    /// Newest COMMITTED checkpoint.
    pub last_committed: Option<Checkpoint>,
    /// Latest checkpoint status per epoch.
    pub epochs: BTreeMap<EpochId, CheckpointStatus>,
}

impl OrchestratorStatus {
    /// Returns the epoch `resume` would start at.
    #[must_use]
    pub fn resume_point(&self, first_epoch: EpochId) -> EpochId {
        self.last_committed
            .as_ref()
            .map_or(first_epoch, |c| c.epoch_id + 1)
    }
}
