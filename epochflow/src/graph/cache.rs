//! Plan cache keyed by declaration fingerprint.

use super::{StageDefinition, StageGraph};
use crate::errors::GraphError;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// Caches built stage graphs so each declaration list is planned once.
#[derive(Debug, Default)]
pub struct PlanCache {
    plans: DashMap<String, Arc<StageGraph>>,
}

impl PlanCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached plan for the declarations, building it on a miss.
    ///
    /// # Errors
    ///
    /// Returns the graph error if the declarations do not form a valid DAG.
    /// Failed builds are not cached.
    pub fn get_or_build(&self, definitions: &[StageDefinition]) -> Result<Arc<StageGraph>, GraphError> {
        let fingerprint = StageGraph::fingerprint_for(definitions);

        if let Some(existing) = self.plans.get(&fingerprint) {
            debug!(fingerprint = %fingerprint, "Plan cache hit");
            return Ok(existing.clone());
        }

        let graph = Arc::new(StageGraph::build(definitions.iter().cloned())?);
        self.plans.insert(fingerprint, graph.clone());
        Ok(graph)
    }

    /// Returns the number of cached plans.
    #[must_use]
    pub fn len(&self) -> usize {
        self.plans.len()
    }

    /// Returns true if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }
}
