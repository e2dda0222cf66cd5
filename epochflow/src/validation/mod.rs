//! Post-epoch validation gate.
//!
//! Rules classify an epoch's produced registries as PASS, WARNING or FATAL.
//! An epoch commits only when no rule reports FATAL.

mod gate;
mod result;
mod rules;

pub use gate::{ValidationConfig, ValidationGate};
pub use result::{Severity, ValidationReport, ValidationResult};
pub use rules::{
    ks_statistic, DistributionDriftRule, ReferentialIntegrityRule, RowCountDriftRule, RuleConfig,
    ValidationRule,
};
