//! Built-in data-quality rules.

use super::{Severity, ValidationResult};
use crate::epoch::EpochId;
use crate::registry::{BaselineView, Registry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

/// A post-epoch data-quality check.
pub trait ValidationRule: Send + Sync + Debug {
    /// Returns the rule name reported in results.
    fn name(&self) -> &str;

    /// Evaluates the epoch's produced registries against the baseline.
    fn evaluate(
        &self,
        epoch: EpochId,
        produced: &BTreeMap<String, Registry>,
        baseline: &BaselineView,
    ) -> ValidationResult;
}

/// Compares the entry counts of two produced registries.
///
/// Drift is `|downstream - upstream| / upstream`. Above the soft threshold
/// the result is WARNING, above the hard threshold FATAL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowCountDriftRule {
    /// Rule name.
    pub name: String,
    /// Registry whose count is the reference.
    pub upstream: String,
    /// Registry compared against it.
    pub downstream: String,
    /// WARNING above this ratio.
    pub soft_threshold: f64,
    /// FATAL above this ratio.
    pub hard_threshold: f64,
}

impl RowCountDriftRule {
    /// Creates the rule.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        upstream: impl Into<String>,
        downstream: impl Into<String>,
        soft_threshold: f64,
        hard_threshold: f64,
    ) -> Self {
        Self {
            name: name.into(),
            upstream: upstream.into(),
            downstream: downstream.into(),
            soft_threshold,
            hard_threshold,
        }
    }
}

impl ValidationRule for RowCountDriftRule {
    fn name(&self) -> &str {
        &self.name
    }

    #[allow(clippy::cast_precision_loss)]
    fn evaluate(
        &self,
        epoch: EpochId,
        produced: &BTreeMap<String, Registry>,
        _baseline: &BaselineView,
    ) -> ValidationResult {
        let (Some(up), Some(down)) = (produced.get(&self.upstream), produced.get(&self.downstream)) else {
            return ValidationResult::new(
                &self.name,
                Severity::Fatal,
                format!(
                    "epoch {epoch}: registry '{}' or '{}' was not produced",
                    self.upstream, self.downstream
                ),
                1.0,
                self.hard_threshold,
            );
        };

        let (up_rows, down_rows) = (up.len() as f64, down.len() as f64);
        let drift = if up_rows == 0.0 {
            if down_rows == 0.0 {
                0.0
            } else {
                1.0
            }
        } else {
            (down_rows - up_rows).abs() / up_rows
        };

        let (severity, threshold) = if drift > self.hard_threshold {
            (Severity::Fatal, self.hard_threshold)
        } else if drift > self.soft_threshold {
            (Severity::Warning, self.soft_threshold)
        } else {
            (Severity::Pass, self.soft_threshold)
        };
        ValidationResult::new(
            &self.name,
            severity,
            format!(
                "epoch {epoch}: '{}' has {} entries vs {} in '{}' ({:.3}% drift)",
                self.downstream,
                down.len(),
                up.len(),
                self.upstream,
                drift * 100.0
            ),
            drift,
            threshold,
        )
    }
}

/// Every foreign key in a child registry must name an entry of a parent registry.
///
/// With `foreign_key` unset, the child's entry keys themselves are checked.
/// Any orphan is FATAL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferentialIntegrityRule {
    /// Rule name.
    pub name: String,
    /// Registry holding the references.
    pub child: String,
    /// Registry being referenced.
    pub parent: String,
    /// Field of each child entry that holds the parent key.
    #[serde(default)]
    pub foreign_key: Option<String>,
}

impl ReferentialIntegrityRule {
    /// Creates a rule that checks child entry keys against the parent.
    #[must_use]
    pub fn new(name: impl Into<String>, child: impl Into<String>, parent: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            child: child.into(),
            parent: parent.into(),
            foreign_key: None,
        }
    }

    /// Checks the named field instead of the entry key.
    #[must_use]
    pub fn on_field(mut self, field: impl Into<String>) -> Self {
        self.foreign_key = Some(field.into());
        self
    }

    fn reference_of(&self, key: &str, value: &serde_json::Value) -> Option<String> {
        match &self.foreign_key {
            None => Some(key.to_string()),
            Some(field) => match value.get(field)? {
                serde_json::Value::String(s) => Some(s.clone()),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            },
        }
    }
}

impl ValidationRule for ReferentialIntegrityRule {
    fn name(&self) -> &str {
        &self.name
    }

    #[allow(clippy::cast_precision_loss)]
    fn evaluate(
        &self,
        epoch: EpochId,
        produced: &BTreeMap<String, Registry>,
        _baseline: &BaselineView,
    ) -> ValidationResult {
        let (Some(child), Some(parent)) = (produced.get(&self.child), produced.get(&self.parent)) else {
            return ValidationResult::new(
                &self.name,
                Severity::Fatal,
                format!("epoch {epoch}: registry '{}' or '{}' was not produced", self.child, self.parent),
                0.0,
                0.0,
            );
        };

        let orphans: Vec<&str> = child
            .entries()
            .iter()
            .filter(|(key, value)| {
                self.reference_of(key, value)
                    .map_or(true, |reference| !parent.contains_key(&reference))
            })
            .map(|(key, _)| key.as_str())
            .collect();

        if orphans.is_empty() {
            return ValidationResult::new(
                &self.name,
                Severity::Pass,
                format!("epoch {epoch}: every '{}' entry resolves in '{}'", self.child, self.parent),
                0.0,
                0.0,
            );
        }

        let sample: Vec<&str> = orphans.iter().take(5).copied().collect();
        ValidationResult::new(
            &self.name,
            Severity::Fatal,
            format!(
                "epoch {epoch}: {} orphaned '{}' entries without a '{}' parent (e.g. {})",
                orphans.len(),
                self.child,
                self.parent,
                sample.join(", ")
            ),
            orphans.len() as f64,
            0.0,
        )
    }
}

/// Kolmogorov-Smirnov distance of a numeric field, this epoch vs. baseline.
///
/// Above the threshold the result is WARNING. Without baseline values the
/// rule passes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionDriftRule {
    /// Rule name.
    pub name: String,
    /// Registry to inspect.
    pub registry: String,
    /// Numeric field of each entry; unset means the entry value itself.
    #[serde(default)]
    pub field: Option<String>,
    /// WARNING above this distance.
    pub threshold: f64,
}

impl DistributionDriftRule {
    /// Creates a rule over whole entry values.
    #[must_use]
    pub fn new(name: impl Into<String>, registry: impl Into<String>, threshold: f64) -> Self {
        Self {
            name: name.into(),
            registry: registry.into(),
            field: None,
            threshold,
        }
    }

    /// Reads the named field of each entry.
    #[must_use]
    pub fn on_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    fn values(&self, registry: &Registry) -> Vec<f64> {
        let mut values: Vec<f64> = registry
            .entries()
            .values()
            .filter_map(|v| match &self.field {
                Some(field) => v.get(field).and_then(serde_json::Value::as_f64),
                None => v.as_f64(),
            })
            .filter(|v| v.is_finite())
            .collect();
        values.sort_by(f64::total_cmp);
        values
    }
}

impl ValidationRule for DistributionDriftRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(
        &self,
        epoch: EpochId,
        produced: &BTreeMap<String, Registry>,
        baseline: &BaselineView,
    ) -> ValidationResult {
        let current = produced.get(&self.registry).map(|r| self.values(r)).unwrap_or_default();
        let previous = baseline.registry(&self.registry).map(|r| self.values(r)).unwrap_or_default();

        if current.is_empty() || previous.is_empty() {
            return ValidationResult::new(
                &self.name,
                Severity::Pass,
                format!("epoch {epoch}: no values to compare in '{}'", self.registry),
                0.0,
                self.threshold,
            );
        }

        let distance = ks_statistic(&current, &previous);
        let severity = if distance > self.threshold {
            Severity::Warning
        } else {
            Severity::Pass
        };
        ValidationResult::new(
            &self.name,
            severity,
            format!(
                "epoch {epoch}: KS distance of '{}' vs baseline is {distance:.4}",
                self.registry
            ),
            distance,
            self.threshold,
        )
    }
}

/// Two-sample Kolmogorov-Smirnov statistic over sorted samples.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn ks_statistic(a: &[f64], b: &[f64]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let (n, m) = (a.len() as f64, b.len() as f64);
    let (mut i, mut j) = (0, 0);
    let mut distance: f64 = 0.0;
    while i < a.len() && j < b.len() {
        let x = a[i].min(b[j]);
        while i < a.len() && a[i] <= x {
            i += 1;
        }
        while j < b.len() && b[j] <= x {
            j += 1;
        }
        distance = distance.max((i as f64 / n - j as f64 / m).abs());
    }
    distance
}

/// Serializable rule declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleConfig {
    /// See [`RowCountDriftRule`].
    RowCountDrift(RowCountDriftRule),
    /// See [`ReferentialIntegrityRule`].
    ReferentialIntegrity(ReferentialIntegrityRule),
    /// See [`DistributionDriftRule`].
    DistributionDrift(DistributionDriftRule),
}

impl RuleConfig {
    /// Returns the declared rule name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::RowCountDrift(r) => &r.name,
            Self::ReferentialIntegrity(r) => &r.name,
            Self::DistributionDrift(r) => &r.name,
        }
    }

    /// Instantiates the rule.
    #[must_use]
    pub fn build(&self) -> Arc<dyn ValidationRule> {
        match self {
            Self::RowCountDrift(r) => Arc::new(r.clone()),
            Self::ReferentialIntegrity(r) => Arc::new(r.clone()),
            Self::DistributionDrift(r) => Arc::new(r.clone()),
        }
    }
}
