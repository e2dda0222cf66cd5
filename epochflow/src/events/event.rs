//! Orchestrator lifecycle events.

use crate::epoch::{EpochId, EpochPhase};
use crate::validation::Severity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Something that happened while running epochs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OrchestratorEvent {
    /// An epoch began executing.
    #[serde(rename = "epoch.started")]
    EpochStarted {
        /// The epoch.
        epoch: EpochId,
        /// Run that executes it.
        run_id: String,
    },
    /// An epoch moved to a new phase.
    #[serde(rename = "epoch.phase_changed")]
    PhaseChanged {
        /// The epoch.
        epoch: EpochId,
        /// The new phase.
        phase: EpochPhase,
    },
    /// A wave was handed to the worker pool.
    #[serde(rename = "wave.started")]
    WaveStarted {
        /// The epoch.
        epoch: EpochId,
        /// Wave index.
        wave: usize,
        /// Stages in the wave.
        stages: usize,
        /// Pool size for the wave.
        workers: usize,
    },
    /// Every stage of a wave succeeded and its writes were merged.
    #[serde(rename = "wave.completed")]
    WaveCompleted {
        /// The epoch.
        epoch: EpochId,
        /// Wave index.
        wave: usize,
        /// Stages in the wave.
        stages: usize,
        /// Wall time in milliseconds.
        duration_ms: f64,
    },
    /// The validation gate finished.
    #[serde(rename = "validation.completed")]
    ValidationCompleted {
        /// The epoch.
        epoch: EpochId,
        /// Worst severity reported.
        worst: Severity,
        /// Number of WARNING results.
        warnings: usize,
        /// Number of FATAL results.
        fatal: usize,
    },
    /// An epoch's registries and checkpoint are durable.
    #[serde(rename = "epoch.committed")]
    EpochCommitted {
        /// The epoch.
        epoch: EpochId,
        /// Registry content hashes.
        registry_hashes: BTreeMap<String, String>,
    },
    /// An epoch aborted.
    #[serde(rename = "epoch.failed")]
    EpochFailed {
        /// The epoch.
        epoch: EpochId,
        /// Phase the epoch was in.
        phase: EpochPhase,
        /// Error message.
        reason: String,
    },
    /// An epoch was already committed and was not executed again.
    #[serde(rename = "epoch.skipped")]
    EpochSkipped {
        /// The epoch.
        epoch: EpochId,
    },
    /// The governor changed the worker-pool size.
    #[serde(rename = "governor.resized")]
    GovernorResized {
        /// Size before.
        previous: usize,
        /// Size after.
        size: usize,
    },
}

impl OrchestratorEvent {
    /// Returns the dotted event type, e.g. `epoch.committed`.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::EpochStarted { .. } => "epoch.started",
            Self::PhaseChanged { .. } => "epoch.phase_changed",
            Self::WaveStarted { .. } => "wave.started",
            Self::WaveCompleted { .. } => "wave.completed",
            Self::ValidationCompleted { .. } => "validation.completed",
            Self::EpochCommitted { .. } => "epoch.committed",
            Self::EpochFailed { .. } => "epoch.failed",
            Self::EpochSkipped { .. } => "epoch.skipped",
            Self::GovernorResized { .. } => "governor.resized",
        }
    }

    /// Returns the epoch the event concerns, if any.
    #[must_use]
    pub fn epoch(&self) -> Option<EpochId> {
        match self {
            Self::EpochStarted { epoch, .. }
            | Self::PhaseChanged { epoch, .. }
            | Self::WaveStarted { epoch, .. }
            | Self::WaveCompleted { epoch, .. }
            | Self::ValidationCompleted { epoch, .. }
            | Self::EpochCommitted { epoch, .. }
            | Self::EpochFailed { epoch, .. }
            | Self::EpochSkipped { epoch } => Some(*epoch),
            Self::GovernorResized { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialized_tag_matches_event_type() {
        let events = [
            OrchestratorEvent::EpochSkipped { epoch: 3 },
            OrchestratorEvent::GovernorResized { previous: 4, size: 3 },
            OrchestratorEvent::PhaseChanged {
                epoch: 1,
                phase: EpochPhase::Executing,
            },
        ];
        for event in events {
            let json = serde_json::to_value(&event).unwrap();
            assert_eq!(json["type"], event.event_type());
        }
    }

    #[test]
    fn test_epoch_accessor() {
        assert_eq!(OrchestratorEvent::EpochSkipped { epoch: 3 }.epoch(), Some(3));
        assert_eq!(
            OrchestratorEvent::GovernorResized { previous: 1, size: 2 }.epoch(),
            None
        );
    }
}
