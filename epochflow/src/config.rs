//! Orchestrator configuration.

use crate::epoch::EpochId;
use crate::errors::ConfigError;
use crate::governor::GovernorConfig;
use crate::graph::{is_valid_name, StageDefinition};
use crate::scheduler::RetryPolicy;
use crate::validation::{RuleConfig, ValidationConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

/// Everything needed to run a multi-epoch pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Pipeline name, used in logs and events.
    #[serde(default = "default_name")]
    pub name: String,
    /// Stage declarations.
    #[serde(default)]
    pub stages: Vec<StageDefinition>,
    /// Seed every derived stage seed is computed from.
    #[serde(default = "default_global_seed")]
    pub global_seed: u64,
    /// First epoch of the pipeline; it starts from the initial registries.
    #[serde(default = "default_start_epoch")]
    pub start_epoch: EpochId,
    /// Last epoch of the pipeline, inclusive.
    #[serde(default = "default_end_epoch")]
    pub end_epoch: EpochId,
    /// Registries stages may write.
    #[serde(default)]
    pub registries: BTreeSet<String>,
    /// Retry policy for transient stage failures.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Resource governor settings.
    #[serde(default)]
    pub governor: GovernorConfig,
    /// Validation rules.
    #[serde(default)]
    pub validation: ValidationConfig,
    /// Root directory of file-backed stores, if any.
    #[serde(default)]
    pub storage_root: Option<PathBuf>,
}

fn default_name() -> String {
    "epochflow".to_string()
}

fn default_global_seed() -> u64 {
    42
}

fn default_start_epoch() -> EpochId {
    1
}

fn default_end_epoch() -> EpochId {
    1
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            stages: Vec::new(),
            global_seed: default_global_seed(),
            start_epoch: default_start_epoch(),
            end_epoch: default_end_epoch(),
            registries: BTreeSet::new(),
            retry: RetryPolicy::default(),
            governor: GovernorConfig::default(),
            validation: ValidationConfig::default(),
            storage_root: None,
        }
    }
}

impl OrchestratorConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Parses a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads a JSON configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Adds a stage.
    #[must_use]
    pub fn with_stage(mut self, stage: StageDefinition) -> Self {
        self.stages.push(stage);
        self
    }

    /// Adds several stages.
    #[must_use]
    pub fn with_stages(mut self, stages: impl IntoIterator<Item = StageDefinition>) -> Self {
        self.stages.extend(stages);
        self
    }

    /// Sets the global seed.
    #[must_use]
    pub fn with_global_seed(mut self, seed: u64) -> Self {
        self.global_seed = seed;
        self
    }

    /// Sets the epoch range.
    #[must_use]
    pub fn with_epochs(mut self, epochs: RangeInclusive<EpochId>) -> Self {
        self.start_epoch = *epochs.start();
        self.end_epoch = *epochs.end();
        self
    }

    /// Declares a registry.
    #[must_use]
    pub fn with_registry(mut self, name: impl Into<String>) -> Self {
        self.registries.insert(name.into());
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the governor configuration.
    #[must_use]
    pub fn with_governor(mut self, governor: GovernorConfig) -> Self {
        self.governor = governor;
        self
    }

    /// Adds a validation rule.
    #[must_use]
    pub fn with_rule(mut self, rule: RuleConfig) -> Self {
        self.validation.rules.push(rule);
        self
    }

    /// Sets the storage root.
    #[must_use]
    pub fn with_storage_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.storage_root = Some(root.into());
        self
    }

    /// Returns the configured epoch range.
    #[must_use]
    pub fn epochs(&self) -> RangeInclusive<EpochId> {
        self.start_epoch..=self.end_epoch
    }

    /// Checks the configuration for consistency.
    ///
    /// Stage declarations are checked separately when the graph is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.start_epoch > self.end_epoch {
            return Err(ConfigError::Invalid(format!(
                "epoch range {}..={} is empty",
                self.start_epoch, self.end_epoch
            )));
        }
        if self.registries.is_empty() {
            return Err(ConfigError::Invalid("at least one registry must be declared".into()));
        }
        if let Some(name) = self.registries.iter().find(|n| !is_valid_name(n)) {
            return Err(ConfigError::Invalid(format!("invalid registry name '{name}'")));
        }
        if self.retry.max_backoff_ms < self.retry.backoff_base_ms {
            return Err(ConfigError::Invalid(format!(
                "max_backoff_ms ({}) is below backoff_base_ms ({})",
                self.retry.max_backoff_ms, self.retry.backoff_base_ms
            )));
        }
        self.governor.validate()?;
        for rule in &self.validation.rules {
            self.validate_rule(rule)?;
        }
        Ok(())
    }

    fn validate_rule(&self, rule: &RuleConfig) -> Result<(), ConfigError> {
        let referenced: Vec<&str> = match rule {
            RuleConfig::RowCountDrift(r) => {
                if r.soft_threshold < 0.0 || r.soft_threshold > r.hard_threshold {
                    return Err(ConfigError::Invalid(format!(
                        "rule '{}': soft threshold ({}) must be within 0..={}",
                        r.name, r.soft_threshold, r.hard_threshold
                    )));
                }
                vec![r.upstream.as_str(), r.downstream.as_str()]
            }
            RuleConfig::ReferentialIntegrity(r) => vec![r.child.as_str(), r.parent.as_str()],
            RuleConfig::DistributionDrift(r) => {
                if !(0.0..=1.0).contains(&r.threshold) {
                    return Err(ConfigError::Invalid(format!(
                        "rule '{}': KS threshold {} outside 0.0..=1.0",
                        r.name, r.threshold
                    )));
                }
                vec![r.registry.as_str()]
            }
        };
        if let Some(unknown) = referenced.into_iter().find(|r| !self.registries.contains(*r)) {
            return Err(ConfigError::Invalid(format!(
                "rule '{}' references undeclared registry '{unknown}'",
                rule.name()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::RowCountDriftRule;
    use pretty_assertions::assert_eq;

    fn valid() -> OrchestratorConfig {
        OrchestratorConfig::new("census")
            .with_stage(StageDefinition::new("load"))
            .with_registry("workforce")
            .with_registry("events")
            .with_epochs(2025..=2027)
            .with_governor(GovernorConfig::fixed(2))
    }

    #[test]
    fn test_defaults_from_minimal_json() {
        let cfg = OrchestratorConfig::from_json_str(r#"{"registries": ["workforce"]}"#).unwrap();
        assert_eq!(cfg.name, "epochflow");
        assert_eq!(cfg.global_seed, 42);
        assert_eq!(cfg.epochs(), 1..=1);
        assert_eq!(cfg.retry, RetryPolicy::default());
        cfg.validate().unwrap();
    }

    #[test]
    fn test_full_json() {
        let json = r#"{
            "name": "census",
            "global_seed": 7,
            "start_epoch": 2025,
            "end_epoch": 2029,
            "registries": ["workforce", "events"],
            "stages": [
                {"name": "hire"},
                {"name": "terminate", "predecessors": ["hire"], "tags": ["events"]}
            ],
            "retry": {"max_retries": 1},
            "governor": {"min_workers": 1, "initial_workers": 2, "max_workers": 4},
            "validation": {"rules": [
                {"kind": "row_count_drift", "name": "d", "upstream": "workforce",
                 "downstream": "events", "soft_threshold": 0.001, "hard_threshold": 0.005}
            ]}
        }"#;
        let cfg = OrchestratorConfig::from_json_str(json).unwrap();
        assert_eq!(cfg.epochs(), 2025..=2029);
        assert_eq!(cfg.stages.len(), 2);
        assert_eq!(cfg.retry.max_retries, 1);
        assert_eq!(cfg.governor.max_workers, 4);
        assert_eq!(cfg.validation.rules.len(), 1);
        cfg.validate().unwrap();
    }

    #[test]
    fn test_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        std::fs::write(&path, serde_json::to_string(&valid()).unwrap()).unwrap();
        assert_eq!(OrchestratorConfig::from_path(&path).unwrap(), valid());
        assert!(matches!(
            OrchestratorConfig::from_path(dir.path().join("missing.json")),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn test_validate_rejects_inconsistencies() {
        assert!(valid().validate().is_ok());
        assert!(valid().with_epochs(2027..=2025).validate().is_err());
        assert!(OrchestratorConfig::default().validate().is_err());
        assert!(valid()
            .with_rule(RuleConfig::RowCountDrift(RowCountDriftRule::new(
                "d", "workforce", "events", 0.5, 0.1
            )))
            .validate()
            .is_err());
        assert!(valid()
            .with_rule(RuleConfig::RowCountDrift(RowCountDriftRule::new(
                "d", "workforce", "payroll", 0.1, 0.5
            )))
            .validate()
            .is_err());
    }

    #[test]
    fn test_registry_names_must_be_file_safe() {
        for bad in ["../workforce", "pay/roll", ".hidden", "", " "] {
            assert!(
                matches!(valid().with_registry(bad).validate(), Err(ConfigError::Invalid(_))),
                "accepted registry name {bad:?}"
            );
        }
        assert!(valid().with_registry("payroll.v2").validate().is_ok());
        assert!(valid().with_registry("census_2025-q1").validate().is_ok());
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            OrchestratorConfig::from_json_str("{not json"),
            Err(ConfigError::Parse(_))
        ));
    }
}
