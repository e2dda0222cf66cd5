//! Stage graph construction.
//!
//! This module provides:
//! - Stage declarations
//! - Wave planning with a stable global execution index
//! - A plan cache keyed by declaration fingerprint

mod cache;
mod definition;
mod plan;

pub use cache::PlanCache;
pub use definition::StageDefinition;
pub(crate) use definition::is_valid_name;
pub use plan::{ExecutionWave, StageGraph};
