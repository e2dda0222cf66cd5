//! Drives one epoch from baseline to commit.

use super::{EpochId, EpochLifecycle, EpochPhase};
use crate::checkpoint::{Checkpoint, CheckpointManager};
use crate::errors::{BaselineMissingError, EpochFailure, OrchestratorError, RegistryError, ValidationFatalError};
use crate::events::{EventSink, OrchestratorEvent};
use crate::governor::ResourceGovernor;
use crate::graph::StageGraph;
use crate::observability::SpanTimer;
use crate::registry::{BaselineView, Registry, RegistryStore, WorkingSet};
use crate::scheduler::{StageResult, WaveScheduler};
use crate::validation::{Severity, ValidationGate, ValidationReport};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{error, info, info_span, Instrument};

/// What the epoch loop is doing right now.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EpochProgress {
    /// Epoch being executed, if any.
    pub epoch: Option<EpochId>,
    /// Its phase.
    pub phase: Option<EpochPhase>,
    /// Wave being executed.
    pub wave: Option<usize>,
    /// Pool size of the current or last wave.
    pub pool_size: usize,
}

/// The record of one committed epoch.
#[derive(Debug, Clone, Serialize)]
pub struct EpochOutcome {
    /// The epoch.
    pub epoch: EpochId,
    /// Phases visited, in order.
    pub phases: Vec<EpochPhase>,
    /// Number of waves executed.
    pub waves: usize,
    /// Every stage result, in execution-index order.
    pub stage_results: Vec<StageResult>,
    /// The validation report.
    pub validation: ValidationReport,
    /// Content hash of every committed registry.
    pub registry_hashes: BTreeMap<String, String>,
    /// The COMMITTED checkpoint.
    pub checkpoint: Checkpoint,
    /// Wall time in milliseconds.
    pub duration_ms: f64,
}

/// Everything the epoch manager is built from.
#[derive(Debug, Clone)]
pub struct EpochManagerParts {
    /// The planned stage graph.
    pub graph: Arc<StageGraph>,
    /// Wave scheduler.
    pub scheduler: WaveScheduler,
    /// Pool-size governor.
    pub governor: Arc<ResourceGovernor>,
    /// Validation gate.
    pub gate: ValidationGate,
    /// Registry store.
    pub registries: Arc<dyn RegistryStore>,
    /// Checkpoint protocol.
    pub checkpoints: CheckpointManager,
    /// Declared registry names.
    pub declared: Arc<BTreeSet<String>>,
    /// Epoch that starts from `initial` instead of a committed predecessor.
    pub first_epoch: EpochId,
    /// Baseline registries of the first epoch.
    pub initial: BTreeMap<String, Registry>,
    /// Event sink.
    pub events: Arc<dyn EventSink>,
    /// Shared progress, read by status queries.
    pub progress: Arc<RwLock<EpochProgress>>,
}

/// Runs a single epoch through its phases.
///
/// Stages read only the baseline (the previous epoch's committed
/// registries). Their writes are merged into the working set after each
/// wave in execution-index order. Registries are persisted before the
/// checkpoint is committed.
#[derive(Debug, Clone)]
pub struct EpochManager {
    parts: EpochManagerParts,
}

impl EpochManager {
    /// Creates a manager.
    #[must_use]
    pub fn new(parts: EpochManagerParts) -> Self {
        Self { parts }
    }

    /// Returns the epoch that starts from the initial registries.
    #[must_use]
    pub fn first_epoch(&self) -> EpochId {
        self.parts.first_epoch
    }

    /// Returns the validation gate.
    #[must_use]
    pub fn gate(&self) -> &ValidationGate {
        &self.parts.gate
    }

    /// Executes `epoch` and commits it.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Epoch`] with the failing epoch. The
    /// epoch's checkpoint is left FAILED.
    pub async fn run_epoch(&self, epoch: EpochId, run_id: &str) -> Result<EpochOutcome, OrchestratorError> {
        let span = info_span!("epoch", epoch, run_id);
        self.run_epoch_inner(epoch, run_id).instrument(span).await
    }

    async fn run_epoch_inner(&self, epoch: EpochId, run_id: &str) -> Result<EpochOutcome, OrchestratorError> {
        let timer = SpanTimer::start("epoch");
        let mut lifecycle = EpochLifecycle::new(epoch);
        self.set_progress(epoch, EpochPhase::Pending, None);

        self.parts
            .checkpoints
            .begin_epoch(epoch)
            .await
            .map_err(|e| OrchestratorError::epoch(epoch, e))?;
        info!("Epoch started");
        self.emit(OrchestratorEvent::EpochStarted {
            epoch,
            run_id: run_id.to_string(),
        })
        .await;

        match self.execute(epoch, &mut lifecycle, timer).await {
            Ok(outcome) => Ok(outcome),
            Err(failure) => {
                let phase = lifecycle.phase();
                lifecycle.fail();
                self.set_progress(epoch, EpochPhase::Failed, None);
                let reason = failure.to_string();
                if let Err(e) = self.parts.checkpoints.fail(epoch, reason.clone()).await {
                    error!(error = %e, "Could not record FAILED checkpoint");
                }
                self.emit(OrchestratorEvent::EpochFailed { epoch, phase, reason })
                    .await;
                Err(OrchestratorError::epoch(epoch, failure))
            }
        }
    }

    async fn execute(
        &self,
        epoch: EpochId,
        lifecycle: &mut EpochLifecycle,
        timer: SpanTimer,
    ) -> Result<EpochOutcome, EpochFailure> {
        let previous = self.verify_transition(epoch).await?;
        self.advance(lifecycle, EpochPhase::TransitionValidated).await?;

        let baseline = match &previous {
            Some(checkpoint) => BaselineView::new(Some(checkpoint.epoch_id), self.load_committed(checkpoint).await?),
            None => BaselineView::new(None, self.parts.initial.clone()),
        };
        self.advance(lifecycle, EpochPhase::BaselineLoaded).await?;

        self.advance(lifecycle, EpochPhase::Executing).await?;
        let (working, stage_results) = self.execute_waves(epoch, &baseline).await?;

        self.advance(lifecycle, EpochPhase::Validating).await?;
        let validation = self.validate(epoch, working.registries(), &baseline).await;
        if validation.has_fatal() {
            return Err(ValidationFatalError {
                epoch,
                results: validation.results,
            }
            .into());
        }

        let registry_hashes = working.content_hashes();
        for registry in working.registries().values() {
            self.parts.registries.save(registry).await?;
        }
        let checkpoint = self.parts.checkpoints.commit(epoch, registry_hashes.clone()).await?;
        self.advance(lifecycle, EpochPhase::Committed).await?;
        info!(registries = registry_hashes.len(), "Epoch committed");
        self.emit(OrchestratorEvent::EpochCommitted {
            epoch,
            registry_hashes: registry_hashes.clone(),
        })
        .await;

        Ok(EpochOutcome {
            epoch,
            phases: lifecycle.history().to_vec(),
            waves: self.parts.graph.wave_count(),
            stage_results,
            validation,
            registry_hashes,
            checkpoint,
            duration_ms: timer.finish(),
        })
    }

    /// Returns the committed checkpoint of `epoch - 1`, or `None` for the first epoch.
    async fn verify_transition(&self, epoch: EpochId) -> Result<Option<Checkpoint>, EpochFailure> {
        if epoch <= self.parts.first_epoch {
            return Ok(None);
        }
        let previous = epoch - 1;
        let checkpoint = self
            .parts
            .checkpoints
            .latest_for(previous)
            .await?
            .filter(Checkpoint::is_committed)
            .ok_or(BaselineMissingError { epoch, previous })?;
        Ok(Some(checkpoint))
    }

    /// Loads the registries a COMMITTED checkpoint recorded and checks their hashes.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] for a missing version and
    /// [`RegistryError::HashMismatch`] when stored content differs from
    /// what was committed.
    pub async fn load_committed(&self, checkpoint: &Checkpoint) -> Result<BTreeMap<String, Registry>, RegistryError> {
        let epoch = checkpoint.epoch_id;
        let mut registries = BTreeMap::new();
        for (name, expected) in &checkpoint.registry_content_hashes {
            let registry = self
                .parts
                .registries
                .load(name, epoch)
                .await?
                .ok_or_else(|| RegistryError::NotFound {
                    name: name.clone(),
                    epoch,
                })?;
            let actual = registry.content_hash();
            if &actual != expected {
                return Err(RegistryError::HashMismatch {
                    name: name.clone(),
                    epoch,
                    expected: expected.clone(),
                    actual,
                });
            }
            registries.insert(name.clone(), registry);
        }
        Ok(registries)
    }

    /// Returns the baseline `epoch` was (or would be) executed against.
    pub async fn baseline_for(&self, epoch: EpochId) -> Result<BaselineView, EpochFailure> {
        match self.verify_transition(epoch).await? {
            Some(checkpoint) => Ok(BaselineView::new(
                Some(checkpoint.epoch_id),
                self.load_committed(&checkpoint).await?,
            )),
            None => Ok(BaselineView::new(None, self.parts.initial.clone())),
        }
    }

    async fn execute_waves(
        &self,
        epoch: EpochId,
        baseline: &BaselineView,
    ) -> Result<(WorkingSet, Vec<StageResult>), EpochFailure> {
        let graph = &self.parts.graph;
        let mut working = WorkingSet::from_baseline(epoch, &self.parts.declared, baseline);
        let mut stage_results = Vec::with_capacity(graph.stage_count());

        for wave in graph.waves() {
            let decision = self.parts.governor.next_pool_size();
            if decision.changed() {
                self.emit(OrchestratorEvent::GovernorResized {
                    previous: decision.previous,
                    size: decision.size,
                })
                .await;
            }
            {
                let mut progress = self.parts.progress.write();
                progress.wave = Some(wave.index);
                progress.pool_size = decision.size;
            }
            self.emit(OrchestratorEvent::WaveStarted {
                epoch,
                wave: wave.index,
                stages: wave.len(),
                workers: decision.size,
            })
            .await;

            let wave_timer = SpanTimer::start("wave");
            let results = self
                .parts
                .scheduler
                .execute_wave(wave, graph, epoch, decision.size, baseline)
                .await?;
            for result in &results {
                working.apply_all(&result.writes)?;
            }

            self.emit(OrchestratorEvent::WaveCompleted {
                epoch,
                wave: wave.index,
                stages: results.len(),
                duration_ms: wave_timer.finish(),
            })
            .await;
            stage_results.extend(results);
        }
        Ok((working, stage_results))
    }

    /// Runs the validation gate and reports the outcome.
    pub async fn validate(
        &self,
        epoch: EpochId,
        produced: &BTreeMap<String, Registry>,
        baseline: &BaselineView,
    ) -> ValidationReport {
        let report = self.parts.gate.evaluate(epoch, produced, baseline);
        self.emit(OrchestratorEvent::ValidationCompleted {
            epoch,
            worst: report.worst(),
            warnings: report.count(Severity::Warning),
            fatal: report.count(Severity::Fatal),
        })
        .await;
        report
    }

    async fn advance(&self, lifecycle: &mut EpochLifecycle, to: EpochPhase) -> Result<(), EpochFailure> {
        lifecycle.advance(to)?;
        self.set_progress(lifecycle.epoch(), to, None);
        self.emit(OrchestratorEvent::PhaseChanged {
            epoch: lifecycle.epoch(),
            phase: to,
        })
        .await;
        Ok(())
    }

    fn set_progress(&self, epoch: EpochId, phase: EpochPhase, wave: Option<usize>) {
        let mut progress = self.parts.progress.write();
        progress.epoch = Some(epoch);
        progress.phase = Some(phase);
        progress.wave = wave;
    }

    async fn emit(&self, event: OrchestratorEvent) {
        self.parts.events.emit(&event).await;
    }
}
