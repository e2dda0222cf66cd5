//! Epoch lifecycle.
//!
//! This module provides:
//! - The per-epoch phase state machine
//! - The epoch manager that drives one epoch from baseline to commit

mod manager;
mod phase;

pub use manager::{EpochManager, EpochManagerParts, EpochOutcome, EpochProgress};
pub use phase::{EpochLifecycle, EpochPhase};

/// Identifier of an epoch (for example a simulation year).
pub type EpochId = u32;
