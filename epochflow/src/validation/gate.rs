//! The validation gate.

use super::{RuleConfig, Severity, ValidationReport, ValidationRule};
use crate::epoch::EpochId;
use crate::registry::{BaselineView, Registry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Serializable gate configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Rules in evaluation order.
    pub rules: Vec<RuleConfig>,
}

impl ValidationConfig {
    /// Creates an empty configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a rule.
    #[must_use]
    pub fn with_rule(mut self, rule: RuleConfig) -> Self {
        self.rules.push(rule);
        self
    }
}

/// Runs every configured rule over an epoch's produced registries.
#[derive(Debug, Clone, Default)]
pub struct ValidationGate {
    rules: Vec<Arc<dyn ValidationRule>>,
}

impl ValidationGate {
    /// Creates a gate with no rules.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the gate from configuration.
    #[must_use]
    pub fn from_config(config: &ValidationConfig) -> Self {
        Self {
            rules: config.rules.iter().map(RuleConfig::build).collect(),
        }
    }

    /// Appends a rule.
    #[must_use]
    pub fn with_rule(mut self, rule: Arc<dyn ValidationRule>) -> Self {
        self.rules.push(rule);
        self
    }

    /// Returns the number of rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns true if the gate has no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Evaluates every rule; a FATAL result does not stop later rules.
    #[must_use]
    pub fn evaluate(
        &self,
        epoch: EpochId,
        produced: &BTreeMap<String, Registry>,
        baseline: &BaselineView,
    ) -> ValidationReport {
        let results = self
            .rules
            .iter()
            .map(|rule| {
                let result = rule.evaluate(epoch, produced, baseline);
                match result.severity {
                    Severity::Pass => debug!(epoch, rule = %result.rule_name, "Validation passed"),
                    Severity::Warning => warn!(
                        epoch,
                        rule = %result.rule_name,
                        measured = result.measured_value,
                        threshold = result.threshold,
                        "Validation warning: {}",
                        result.message
                    ),
                    Severity::Fatal => error!(
                        epoch,
                        rule = %result.rule_name,
                        measured = result.measured_value,
                        threshold = result.threshold,
                        "Validation failed: {}",
                        result.message
                    ),
                }
                result
            })
            .collect();
        ValidationReport { epoch, results }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::{ReferentialIntegrityRule, RowCountDriftRule};
    use serde_json::json;

    #[test]
    fn test_all_rules_run_after_fatal() {
        let config = ValidationConfig::new()
            .with_rule(RuleConfig::ReferentialIntegrity(ReferentialIntegrityRule::new(
                "fk", "enrollment", "workforce",
            )))
            .with_rule(RuleConfig::RowCountDrift(RowCountDriftRule::new(
                "drift", "workforce", "enrollment", 0.1, 0.5,
            )));
        let gate = ValidationGate::from_config(&config);
        assert_eq!(gate.len(), 2);

        let mut produced = BTreeMap::new();
        produced.insert(
            "workforce".to_string(),
            Registry::new("workforce", 2025).with_entry("a", json!(1)),
        );
        produced.insert(
            "enrollment".to_string(),
            Registry::new("enrollment", 2025).with_entry("b", json!(1)),
        );

        let report = gate.evaluate(2025, &produced, &BaselineView::default());
        assert_eq!(report.results.len(), 2);
        assert!(report.has_fatal());
        assert_eq!(report.results[0].severity, Severity::Fatal);
        assert_eq!(report.results[1].severity, Severity::Pass);
    }

    #[test]
    fn test_empty_gate_passes() {
        let report = ValidationGate::new().evaluate(2025, &BTreeMap::new(), &BaselineView::default());
        assert!(!report.has_fatal());
        assert_eq!(report.worst(), Severity::Pass);
    }
}
