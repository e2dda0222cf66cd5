//! Error types for the epochflow orchestrator.
//!
//! Errors are grouped by the layer that raises them: graph construction,
//! stage execution, registry and checkpoint persistence, configuration, and
//! the epoch loop. Every error that aborts an epoch is surfaced through
//! [`OrchestratorError::Epoch`], which carries the failing epoch id and the
//! underlying [`EpochFailure`] as its source.

use crate::epoch::{EpochId, EpochPhase};
use crate::validation::{Severity, ValidationResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Diagnostic metadata attached to errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ErrorInfo {
    /// Error code (e.g., "GRAPH-001-CYCLE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: BTreeMap<String, String>,
}

impl ErrorInfo {
    /// Creates a new error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: BTreeMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Graph construction
// ---------------------------------------------------------------------------

/// Raised when the stage declarations contain a dependency cycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Cycle detected among stages: {}", cycle_path.join(" -> "))]
pub struct CycleError {
    /// Every stage that could not be placed in a wave, sorted by name.
    pub stages: Vec<String>,
    /// One concrete cycle through the offending set, first stage repeated last.
    pub cycle_path: Vec<String>,
    /// Diagnostic info.
    pub error_info: ErrorInfo,
}

impl CycleError {
    /// Creates a new cycle error.
    #[must_use]
    pub fn new(stages: Vec<String>, cycle_path: Vec<String>) -> Self {
        let info = ErrorInfo::new(
            "GRAPH-001-CYCLE",
            format!("Stage graph contains a dependency cycle: {}", cycle_path.join(" -> ")),
        )
        .with_fix_hint("Remove one of the predecessor edges in the cycle to break it.");

        Self {
            stages,
            cycle_path,
            error_info: info,
        }
    }
}

/// Raised when a stage declares a predecessor that is not declared itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Stage '{stage}' depends on undeclared stage '{dependency}'")]
pub struct UnknownDependencyError {
    /// The declaring stage.
    pub stage: String,
    /// The missing predecessor.
    pub dependency: String,
}

impl UnknownDependencyError {
    /// Creates a new unknown dependency error.
    #[must_use]
    pub fn new(stage: impl Into<String>, dependency: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            dependency: dependency.into(),
        }
    }

    /// Returns diagnostic info for this error.
    #[must_use]
    pub fn error_info(&self) -> ErrorInfo {
        ErrorInfo::new(
            "GRAPH-002-UNKNOWN_DEP",
            format!("Predecessor '{}' is not declared", self.dependency),
        )
        .with_fix_hint("Declare the predecessor stage or remove it from the predecessor list.")
        .with_context_entry("stage", self.stage.clone())
    }
}

/// Errors raised while building the stage graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// A dependency cycle exists.
    #[error("{0}")]
    Cycle(#[from] CycleError),

    /// A predecessor is undeclared.
    #[error("{0}")]
    UnknownDependency(#[from] UnknownDependencyError),

    /// Two declarations share a name.
    #[error("Stage '{0}' is declared more than once")]
    DuplicateStage(String),

    /// A stage name is empty or malformed.
    #[error("Invalid stage name '{0}'")]
    InvalidName(String),

    /// No stages were declared.
    #[error("Stage graph has no stages")]
    Empty,
}

// ---------------------------------------------------------------------------
// Stage execution
// ---------------------------------------------------------------------------

/// A retryable stage failure.
///
/// Recovered locally by the scheduler's retry policy; it only escapes as the
/// cause of a [`StageFatalError`] once retries are exhausted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Transient failure in stage '{stage}' (epoch {epoch}, attempt {attempt}): {message}")]
pub struct StageTransientError {
    /// Stage name.
    pub stage: String,
    /// Epoch being executed.
    pub epoch: EpochId,
    /// One-based attempt number that failed.
    pub attempt: u32,
    /// Message reported by the transform runner.
    pub message: String,
}

/// A stage failure that aborts its wave and epoch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Stage '{stage}' failed in epoch {epoch} after {attempts} attempt(s): {message}")]
pub struct StageFatalError {
    /// Stage name.
    pub stage: String,
    /// Epoch being executed.
    pub epoch: EpochId,
    /// Attempts made before giving up.
    pub attempts: u32,
    /// Failure message.
    pub message: String,
    /// The last transient failure, when the stage failed by exhausting retries.
    #[source]
    pub last_transient: Option<StageTransientError>,
}

impl StageFatalError {
    /// Creates a fatal error reported directly by the runner.
    #[must_use]
    pub fn new(stage: impl Into<String>, epoch: EpochId, attempts: u32, message: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            epoch,
            attempts,
            message: message.into(),
            last_transient: None,
        }
    }

    /// Creates a fatal error from an exhausted retry budget.
    #[must_use]
    pub fn retries_exhausted(last: StageTransientError) -> Self {
        Self {
            stage: last.stage.clone(),
            epoch: last.epoch,
            attempts: last.attempt,
            message: "retry budget exhausted".to_string(),
            last_transient: Some(last),
        }
    }

    /// Returns true if the failure came from an exhausted retry budget.
    #[must_use]
    pub fn is_retry_exhaustion(&self) -> bool {
        self.last_transient.is_some()
    }
}

// ---------------------------------------------------------------------------
// Registries and checkpoints
// ---------------------------------------------------------------------------

/// Errors raised by registries and registry stores.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A write addressed an epoch other than the one being executed.
    #[error("Write to registry '{registry}' for epoch {target_epoch} rejected; only epoch {current_epoch} is writable")]
    RetroactiveWrite {
        /// Registry name.
        registry: String,
        /// Epoch the write addressed.
        target_epoch: EpochId,
        /// Epoch currently executing.
        current_epoch: EpochId,
    },

    /// A write addressed a registry that is not declared.
    #[error("Registry '{0}' is not declared")]
    UnknownRegistry(String),

    /// A registry version is missing from the store.
    #[error("Registry '{name}' has no version for epoch {epoch}")]
    NotFound {
        /// Registry name.
        name: String,
        /// Requested epoch.
        epoch: EpochId,
    },

    /// Stored content does not match the hash recorded at commit.
    #[error("Registry '{name}' for epoch {epoch} has hash {actual}, checkpoint recorded {expected}")]
    HashMismatch {
        /// Registry name.
        name: String,
        /// Epoch of the version.
        epoch: EpochId,
        /// Hash recorded in the checkpoint.
        expected: String,
        /// Hash of the stored content.
        actual: String,
    },

    /// Serialization failure.
    #[error("Registry serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO failure.
    #[error("Registry IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by checkpoint stores.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// A status change that the checkpoint lifecycle does not allow.
    #[error("Checkpoint for epoch {epoch} cannot move from {from} to {to}")]
    InvalidTransition {
        /// Epoch of the checkpoint.
        epoch: EpochId,
        /// Current status.
        from: String,
        /// Requested status.
        to: String,
    },

    /// Commit or fail was requested for an epoch that was never begun.
    #[error("No checkpoint has been started for epoch {0}")]
    NotStarted(EpochId),

    /// Serialization failure.
    #[error("Checkpoint serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO failure.
    #[error("Checkpoint IO error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Epoch loop
// ---------------------------------------------------------------------------

/// Raised when epoch N starts without a committed epoch N-1.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Epoch {epoch} requires a COMMITTED checkpoint for epoch {previous}, none found")]
pub struct BaselineMissingError {
    /// Epoch that was attempted.
    pub epoch: EpochId,
    /// Epoch whose commit is missing.
    pub previous: EpochId,
}

/// Raised when the validation gate reports at least one FATAL result.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Validation failed for epoch {epoch}: {}", fatal_rule_names(.results).join(", "))]
pub struct ValidationFatalError {
    /// Epoch that was validated.
    pub epoch: EpochId,
    /// Every result the gate produced, not only the fatal ones.
    pub results: Vec<ValidationResult>,
}

impl ValidationFatalError {
    /// Returns only the FATAL results.
    #[must_use]
    pub fn fatal_results(&self) -> Vec<&ValidationResult> {
        self.results
            .iter()
            .filter(|r| r.severity == Severity::Fatal)
            .collect()
    }
}

fn fatal_rule_names(results: &[ValidationResult]) -> Vec<String> {
    results
        .iter()
        .filter(|r| r.severity == Severity::Fatal)
        .map(|r| r.rule_name.clone())
        .collect()
}

/// The cause of an epoch abort.
#[derive(Debug, Error)]
pub enum EpochFailure {
    /// Prior epoch not committed.
    #[error("{0}")]
    BaselineMissing(#[from] BaselineMissingError),

    /// A stage failed fatally or exhausted its retries.
    #[error("{0}")]
    StageFatal(#[from] StageFatalError),

    /// The validation gate reported FATAL.
    #[error("{0}")]
    ValidationFatal(#[from] ValidationFatalError),

    /// Registry materialization or persistence failed.
    #[error("{0}")]
    Registry(#[from] RegistryError),

    /// Checkpoint persistence failed.
    #[error("{0}")]
    Checkpoint(#[from] CheckpointError),

    /// The epoch state machine was driven out of order.
    #[error("Illegal epoch phase transition {from} -> {to}")]
    IllegalTransition {
        /// Phase the epoch was in.
        from: EpochPhase,
        /// Phase that was requested.
        to: EpochPhase,
    },
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// The configuration parsed but is inconsistent.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// Top level
// ---------------------------------------------------------------------------

/// The main error type for orchestrator operations.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Graph construction failed before any epoch ran.
    #[error("{0}")]
    Graph(#[from] GraphError),

    /// Configuration is invalid.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// An epoch aborted; its checkpoint is left FAILED.
    #[error("Epoch {epoch} failed: {source}")]
    Epoch {
        /// The failing epoch.
        epoch: EpochId,
        /// Cause of the abort.
        #[source]
        source: EpochFailure,
    },

    /// Reading the checkpoint log failed outside an epoch.
    #[error("{0}")]
    Checkpoint(#[from] CheckpointError),

    /// Reading registries failed outside an epoch.
    #[error("{0}")]
    Registry(#[from] RegistryError),

    /// The requested epoch range is empty or outside the configured range.
    #[error("Invalid epoch range {start}..={end}")]
    InvalidRange {
        /// First epoch.
        start: EpochId,
        /// Last epoch.
        end: EpochId,
    },

    /// A dry-run validation targeted an epoch without a committed checkpoint.
    #[error("Epoch {0} has no COMMITTED checkpoint to validate")]
    NotCommitted(EpochId),
}

impl OrchestratorError {
    /// Wraps an epoch failure with its epoch id.
    #[must_use]
    pub fn epoch(epoch: EpochId, source: impl Into<EpochFailure>) -> Self {
        Self::Epoch {
            epoch,
            source: source.into(),
        }
    }

    /// Returns the failing epoch, if this error aborted one.
    #[must_use]
    pub fn failed_epoch(&self) -> Option<EpochId> {
        match self {
            Self::Epoch { epoch, .. } => Some(*epoch),
            _ => None,
        }
    }

    /// Returns the epoch failure cause, if any.
    #[must_use]
    pub fn epoch_failure(&self) -> Option<&EpochFailure> {
        match self {
            Self::Epoch { source, .. } => Some(source),
            _ => None,
        }
    }
}
