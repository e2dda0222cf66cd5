//! The transform runner seam and stage outcomes.

use super::ExecutionContext;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;

/// Describes what a successful stage produced.
///
/// The scheduler never inspects the data itself; the descriptor is carried
/// into the run report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputDescriptor {
    /// Where the output lives, if anywhere outside the registries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Whether the runner persisted the output durably.
    #[serde(default)]
    pub persisted: bool,
    /// Number of rows produced, when meaningful.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u64>,
    /// Free-form metadata.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl OutputDescriptor {
    /// Creates an empty descriptor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the location.
    #[must_use]
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self.persisted = true;
        self
    }

    /// Sets the row count.
    #[must_use]
    pub fn with_row_count(mut self, rows: u64) -> Self {
        self.row_count = Some(rows);
        self
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// What a runner observed for one invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    /// The stage completed.
    Success(OutputDescriptor),
    /// The stage failed in a way worth retrying.
    Transient(String),
    /// The stage failed and must not be retried.
    Fatal(String),
}

impl StageOutcome {
    /// Success with an empty descriptor.
    #[must_use]
    pub fn ok() -> Self {
        Self::Success(OutputDescriptor::default())
    }

    /// Transient failure from an opaque error, keeping its cause chain in the message.
    #[must_use]
    pub fn transient_from(err: &anyhow::Error) -> Self {
        Self::Transient(format!("{err:#}"))
    }

    /// Fatal failure from an opaque error, keeping its cause chain in the message.
    #[must_use]
    pub fn fatal_from(err: &anyhow::Error) -> Self {
        Self::Fatal(format!("{err:#}"))
    }

    /// Returns true for [`StageOutcome::Success`].
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Executes one stage invocation.
///
/// Implementations read inputs from [`ExecutionContext::baseline`] and
/// write outputs through [`ExecutionContext::writer`]. Any randomness must
/// come from [`ExecutionContext::derived_seed`].
#[async_trait]
pub trait TransformRunner: Send + Sync + Debug {
    /// Runs the stage named by the context.
    async fn run(&self, ctx: &ExecutionContext) -> StageOutcome;
}
