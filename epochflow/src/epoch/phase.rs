//! Epoch phase state machine.

use super::EpochId;
use crate::errors::EpochFailure;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

/// The phase an epoch is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EpochPhase {
    /// Not started.
    #[default]
    Pending,
    /// The previous epoch's commit was verified.
    TransitionValidated,
    /// The read-only baseline view is materialized.
    BaselineLoaded,
    /// Waves are running.
    Executing,
    /// The validation gate is running.
    Validating,
    /// Registries and checkpoint are durable.
    Committed,
    /// The epoch aborted.
    Failed,
}

impl fmt::Display for EpochPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::TransitionValidated => write!(f, "TRANSITION_VALIDATED"),
            Self::BaselineLoaded => write!(f, "BASELINE_LOADED"),
            Self::Executing => write!(f, "EXECUTING"),
            Self::Validating => write!(f, "VALIDATING"),
            Self::Committed => write!(f, "COMMITTED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

impl EpochPhase {
    /// Returns true if no further transition is possible.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed | Self::Failed)
    }

    /// Returns the phase that follows on the success path.
    #[must_use]
    pub fn next(&self) -> Option<Self> {
        match self {
            Self::Pending => Some(Self::TransitionValidated),
            Self::TransitionValidated => Some(Self::BaselineLoaded),
            Self::BaselineLoaded => Some(Self::Executing),
            Self::Executing => Some(Self::Validating),
            Self::Validating => Some(Self::Committed),
            Self::Committed | Self::Failed => None,
        }
    }

    /// Returns true if `to` is a legal successor of this phase.
    ///
    /// Phases advance strictly in order; `Failed` is reachable from every
    /// non-terminal phase.
    #[must_use]
    pub fn can_transition_to(&self, to: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        to == Self::Failed || self.next() == Some(to)
    }
}

/// Tracks the phase of one epoch and enforces legal transitions.
#[derive(Debug, Clone)]
pub struct EpochLifecycle {
    epoch: EpochId,
    phase: EpochPhase,
    history: Vec<EpochPhase>,
}

impl EpochLifecycle {
    /// Creates a lifecycle in `Pending`.
    #[must_use]
    pub fn new(epoch: EpochId) -> Self {
        Self {
            epoch,
            phase: EpochPhase::Pending,
            history: vec![EpochPhase::Pending],
        }
    }

    /// Returns the epoch.
    #[must_use]
    pub fn epoch(&self) -> EpochId {
        self.epoch
    }

    /// Returns the current phase.
    #[must_use]
    pub fn phase(&self) -> EpochPhase {
        self.phase
    }

    /// Returns every phase visited, in order.
    #[must_use]
    pub fn history(&self) -> &[EpochPhase] {
        &self.history
    }

    /// Moves to `to`.
    ///
    /// # Errors
    ///
    /// Returns [`EpochFailure::IllegalTransition`] if the move skips a phase,
    /// goes backwards, or leaves a terminal phase.
    pub fn advance(&mut self, to: EpochPhase) -> Result<(), EpochFailure> {
        if !self.phase.can_transition_to(to) {
            return Err(EpochFailure::IllegalTransition { from: self.phase, to });
        }
        debug!(epoch = self.epoch, from = %self.phase, to = %to, "Epoch phase transition");
        self.phase = to;
        self.history.push(to);
        Ok(())
    }

    /// Moves to `Failed` unless already terminal.
    pub fn fail(&mut self) {
        if self.phase.is_terminal() {
            return;
        }
        warn!(epoch = self.epoch, from = %self.phase, "Epoch failed");
        self.phase = EpochPhase::Failed;
        self.history.push(EpochPhase::Failed);
    }
}
