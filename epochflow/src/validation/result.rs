//! Validation outcomes.

use crate::epoch::EpochId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How serious a validation finding is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    /// The check passed.
    Pass,
    /// Logged; the epoch still commits.
    Warning,
    /// Halts the epoch loop.
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass => write!(f, "PASS"),
            Self::Warning => write!(f, "WARNING"),
            Self::Fatal => write!(f, "FATAL"),
        }
    }
}

/// The outcome of one rule for one epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Name of the rule.
    pub rule_name: String,
    /// Classification.
    pub severity: Severity,
    /// Human-readable explanation.
    pub message: String,
    /// What the rule measured.
    pub measured_value: f64,
    /// The threshold that decided the severity.
    pub threshold: f64,
}

impl ValidationResult {
    /// Creates a result.
    #[must_use]
    pub fn new(
        rule_name: impl Into<String>,
        severity: Severity,
        message: impl Into<String>,
        measured_value: f64,
        threshold: f64,
    ) -> Self {
        Self {
            rule_name: rule_name.into(),
            severity,
            message: message.into(),
            measured_value,
            threshold,
        }
    }

    /// Returns true for FATAL results.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.severity == Severity::Fatal
    }
}

/// Every result the gate produced for one epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// The validated epoch.
    pub epoch: EpochId,
    /// Results in rule registration order.
    pub results: Vec<ValidationResult>,
}

impl ValidationReport {
    /// Returns true if any result is FATAL.
    #[must_use]
    pub fn has_fatal(&self) -> bool {
        self.results.iter().any(ValidationResult::is_fatal)
    }

    /// Returns the number of results with `severity`.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.results.iter().filter(|r| r.severity == severity).count()
    }

    /// Returns the worst severity, or PASS when there are no results.
    #[must_use]
    pub fn worst(&self) -> Severity {
        self.results
            .iter()
            .map(|r| r.severity)
            .max()
            .unwrap_or(Severity::Pass)
    }

    /// Returns the WARNING results.
    pub fn warnings(&self) -> impl Iterator<Item = &ValidationResult> {
        self.results.iter().filter(|r| r.severity == Severity::Warning)
    }
}
