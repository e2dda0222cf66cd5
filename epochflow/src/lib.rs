//! # Epochflow
//!
//! A deterministic multi-epoch pipeline orchestrator.
//!
//! Epochflow runs a DAG of transformation stages once per epoch (for
//! example once per simulated year), carrying accumulated state forward in
//! epoch-versioned registries. It provides:
//!
//! - **Wave planning**: stages grouped into dependency waves with a stable
//!   execution index
//! - **Deterministic parallelism**: a bounded worker pool whose results,
//!   registry contents and per-stage seeds never depend on worker count or
//!   completion order
//! - **Adaptive resource governance**: pool sizing from memory and CPU
//!   pressure with hysteresis
//! - **Checkpointed resume**: an append-only checkpoint log so a crashed
//!   run resumes after its last committed epoch
//! - **Validation gate**: cross-stage data-quality rules that block a
//!   commit on FATAL findings
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use epochflow::prelude::*;
//!
//! let config = OrchestratorConfig::new("workforce")
//!     .with_stage(StageDefinition::new("hire"))
//!     .with_stage(StageDefinition::new("terminate").with_predecessor("hire"))
//!     .with_registry("employees")
//!     .with_epochs(2025..=2029);
//!
//! let orchestrator = OrchestratorBuilder::new(config, Arc::new(MyRunner)).build()?;
//! let report = orchestrator.run_configured().await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod checkpoint;
pub mod config;
pub mod epoch;
pub mod errors;
pub mod events;
pub mod governor;
pub mod graph;
pub mod observability;
pub mod orchestrator;
pub mod registry;
pub mod scheduler;
pub mod testing;
pub mod validation;

#[cfg(test)]
mod integration_tests;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::checkpoint::{Checkpoint, CheckpointStatus, CheckpointStore};
    pub use crate::config::OrchestratorConfig;
    pub use crate::epoch::{EpochId, EpochOutcome, EpochPhase};
    pub use crate::errors::{
        EpochFailure, GraphError, OrchestratorError, RegistryError, StageFatalError,
    };
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink, OrchestratorEvent};
    pub use crate::governor::{GovernorConfig, ResourceSampler, ResourceSnapshot};
    pub use crate::graph::{ExecutionWave, StageDefinition, StageGraph};
    pub use crate::observability::{init_tracing, LoggingConfig};
    pub use crate::orchestrator::{Orchestrator, OrchestratorBuilder, OrchestratorStatus, RunReport};
    pub use crate::registry::{BaselineView, Registry, RegistryStore, RegistryWriter};
    pub use crate::scheduler::{
        ExecutionContext, OutputDescriptor, RetryPolicy, StageOutcome, TransformRunner,
    };
    pub use crate::validation::{
        RuleConfig, Severity, ValidationReport, ValidationResult, ValidationRule,
    };
}
