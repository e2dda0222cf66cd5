//! Testing utilities for epochflow.
//!
//! This module provides:
//! - Scripted transform runners (seeded, failing, flaky, recording)
//! - Stage graph and configuration fixtures
//! - Assertions over plans and run reports

mod assertions;
mod fixtures;
mod runners;

pub use assertions::{assert_committed, assert_same_registry_hashes, assert_waves};
pub use fixtures::{diamond_stages, fan_in_stages, fast_retry, linear_stages, test_config};
pub use runners::{FailingRunner, FlakyRunner, FnRunner, RecordingRunner, SeededRunner, Trace};
