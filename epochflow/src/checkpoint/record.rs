//! Checkpoint records.

use crate::epoch::EpochId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Status of an epoch checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckpointStatus {
    /// The epoch started and has not finished.
    InProgress,
    /// The epoch passed validation and its registries are durable.
    Committed,
    /// The epoch aborted.
    Failed,
}

impl fmt::Display for CheckpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InProgress => write!(f, "IN_PROGRESS"),
            Self::Committed => write!(f, "COMMITTED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// Durable marker of an epoch's progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// The epoch.
    pub epoch_id: EpochId,
    /// Status at the time the record was written.
    pub status: CheckpointStatus,
    /// Content hash of every registry the epoch produced (COMMITTED only).
    #[serde(default)]
    pub registry_content_hashes: BTreeMap<String, String>,
    /// When the epoch started.
    pub started_at: DateTime<Utc>,
    /// When the epoch reached a terminal status.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Why the epoch failed (FAILED only).
    #[serde(default)]
    pub failure_reason: Option<String>,
    /// Identifier of the orchestrator run that wrote the record.
    #[serde(default)]
    pub run_id: Option<String>,
}

impl Checkpoint {
    /// Creates an IN_PROGRESS record.
    #[must_use]
    pub fn in_progress(epoch_id: EpochId) -> Self {
        Self {
            epoch_id,
            status: CheckpointStatus::InProgress,
            registry_content_hashes: BTreeMap::new(),
            started_at: Utc::now(),
            completed_at: None,
            failure_reason: None,
            run_id: None,
        }
    }

    /// Sets the run id.
    #[must_use]
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    /// Derives the COMMITTED record from this one.
    #[must_use]
    pub fn committed(&self, hashes: BTreeMap<String, String>) -> Self {
        Self {
            status: CheckpointStatus::Committed,
            registry_content_hashes: hashes,
            completed_at: Some(Utc::now()),
            failure_reason: None,
            ..self.clone()
        }
    }

    /// Derives the FAILED record from this one.
    #[must_use]
    pub fn failed(&self, reason: impl Into<String>) -> Self {
        Self {
            status: CheckpointStatus::Failed,
            registry_content_hashes: BTreeMap::new(),
            completed_at: Some(Utc::now()),
            failure_reason: Some(reason.into()),
            ..self.clone()
        }
    }

    /// Returns true if the record is COMMITTED.
    #[must_use]
    pub fn is_committed(&self) -> bool {
        self.status == CheckpointStatus::Committed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&CheckpointStatus::InProgress).unwrap();
        assert_eq!(json, r#""IN_PROGRESS""#);
        assert_eq!(CheckpointStatus::InProgress.to_string(), "IN_PROGRESS");
    }

    #[test]
    fn test_committed_keeps_start() {
        let start = Checkpoint::in_progress(2025).with_run_id("run-1");
        let mut hashes = BTreeMap::new();
        hashes.insert("enrollment".to_string(), "abc".to_string());

        let done = start.committed(hashes.clone());
        assert!(done.is_committed());
        assert_eq!(done.started_at, start.started_at);
        assert_eq!(done.registry_content_hashes, hashes);
        assert_eq!(done.run_id.as_deref(), Some("run-1"));
        assert!(done.completed_at.is_some());
    }

    #[test]
    fn test_failed_records_reason() {
        let failed = Checkpoint::in_progress(2025).failed("validation");
        assert_eq!(failed.status, CheckpointStatus::Failed);
        assert_eq!(failed.failure_reason.as_deref(), Some("validation"));
        assert!(failed.registry_content_hashes.is_empty());
    }
}
