//! Assembles an [`Orchestrator`] from configuration and collaborators.

use super::Orchestrator;
use crate::checkpoint::{CheckpointManager, CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore};
use crate::config::OrchestratorConfig;
use crate::epoch::{EpochManager, EpochManagerParts, EpochProgress};
use crate::errors::{ConfigError, OrchestratorError};
use crate::events::{EventSink, LoggingEventSink};
use crate::governor::{ResourceGovernor, ResourceSampler};
use crate::graph::{PlanCache, StageGraph};
use crate::registry::{FileRegistryStore, InMemoryRegistryStore, Registry, RegistryStore};
use crate::scheduler::{TransformRunner, WaveScheduler};
use crate::validation::ValidationGate;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::info;

/// Builder for [`Orchestrator`].
///
/// Stores default to file-backed ones under `config.storage_root` when it
/// is set, and to in-memory ones otherwise.
#[derive(Debug)]
pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    runner: Arc<dyn TransformRunner>,
    registry_store: Option<Arc<dyn RegistryStore>>,
    checkpoint_store: Option<Arc<dyn CheckpointStore>>,
    sampler: Option<Arc<dyn ResourceSampler>>,
    events: Option<Arc<dyn EventSink>>,
    plan_cache: Option<Arc<PlanCache>>,
    initial: BTreeMap<String, Registry>,
    run_id: Option<String>,
}

impl OrchestratorBuilder {
    /// Starts a builder.
    #[must_use]
    pub fn new(config: OrchestratorConfig, runner: Arc<dyn TransformRunner>) -> Self {
        Self {
            config,
            runner,
            registry_store: None,
            checkpoint_store: None,
            sampler: None,
            events: None,
            plan_cache: None,
            initial: BTreeMap::new(),
            run_id: None,
        }
    }

    /// Uses a specific registry store.
    #[must_use]
    pub fn with_registry_store(mut self, store: Arc<dyn RegistryStore>) -> Self {
        self.registry_store = Some(store);
        self
    }

    /// Uses a specific checkpoint store.
    #[must_use]
    pub fn with_checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoint_store = Some(store);
        self
    }

    /// Uses a specific resource sampler.
    #[must_use]
    pub fn with_sampler(mut self, sampler: Arc<dyn ResourceSampler>) -> Self {
        self.sampler = Some(sampler);
        self
    }

    /// Sends events to `sink` instead of the log.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = Some(sink);
        self
    }

    /// Shares a plan cache with other orchestrators.
    #[must_use]
    pub fn with_plan_cache(mut self, cache: Arc<PlanCache>) -> Self {
        self.plan_cache = Some(cache);
        self
    }

    /// Seeds the first epoch's baseline with a registry.
    #[must_use]
    pub fn with_initial_registry(mut self, registry: Registry) -> Self {
        self.initial.insert(registry.name().to_string(), registry);
        self
    }

    /// Overrides the generated run id.
    #[must_use]
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    /// Validates the configuration, plans the graph and wires the components.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Config`] for invalid configuration or an
    /// undeclared initial registry, and [`OrchestratorError::Graph`] if the
    /// stages do not form a DAG.
    pub fn build(self) -> Result<Orchestrator, OrchestratorError> {
        let config = self.config;
        config.validate()?;

        if let Some(name) = self.initial.keys().find(|n| !config.registries.contains(*n)) {
            return Err(ConfigError::Invalid(format!("initial registry '{name}' is not declared")).into());
        }

        let graph = match &self.plan_cache {
            Some(cache) => cache.get_or_build(&config.stages)?,
            None => Arc::new(StageGraph::build(config.stages.iter().cloned())?),
        };

        let registries: Arc<dyn RegistryStore> = match (self.registry_store, &config.storage_root) {
            (Some(store), _) => store,
            (None, Some(root)) => Arc::new(FileRegistryStore::new(root.clone())),
            (None, None) => Arc::new(InMemoryRegistryStore::new()),
        };
        let checkpoint_store: Arc<dyn CheckpointStore> = match (self.checkpoint_store, &config.storage_root) {
            (Some(store), _) => store,
            (None, Some(root)) => Arc::new(FileCheckpointStore::new(root)),
            (None, None) => Arc::new(InMemoryCheckpointStore::new()),
        };
        let sampler = self.sampler.unwrap_or_else(default_sampler);
        let events = self
            .events
            .unwrap_or_else(|| Arc::new(LoggingEventSink::default()));

        let run_id = self.run_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let checkpoints = CheckpointManager::new(checkpoint_store).with_run_id(run_id.clone());
        let governor = Arc::new(ResourceGovernor::new(config.governor.clone(), sampler));
        let declared: Arc<BTreeSet<String>> = Arc::new(config.registries.clone());
        let progress = Arc::new(RwLock::new(EpochProgress::default()));

        let epochs = EpochManager::new(EpochManagerParts {
            graph: graph.clone(),
            scheduler: WaveScheduler::new(self.runner, config.retry.clone(), config.global_seed, declared.clone()),
            governor: governor.clone(),
            gate: ValidationGate::from_config(&config.validation),
            registries,
            checkpoints: checkpoints.clone(),
            declared,
            first_epoch: config.start_epoch,
            initial: self.initial,
            events: events.clone(),
            progress: progress.clone(),
        });

        info!(
            name = %config.name,
            run_id = %run_id,
            stages = graph.stage_count(),
            waves = graph.wave_count(),
            fingerprint = %graph.fingerprint(),
            "Orchestrator built"
        );

        Ok(Orchestrator {
            config,
            run_id,
            graph,
            epochs,
            checkpoints,
            governor,
            events,
            progress,
        })
    }
}

#[cfg(feature = "system-sampler")]
fn default_sampler() -> Arc<dyn ResourceSampler> {
    Arc::new(crate::governor::SystemSampler::new())
}

#[cfg(not(feature = "system-sampler"))]
fn default_sampler() -> Arc<dyn ResourceSampler> {
    Arc::new(crate::governor::StaticSampler::idle())
}
