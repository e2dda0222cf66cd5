//! The multi-epoch orchestrator.
//!
//! This module provides:
//! - [`OrchestratorBuilder`] to wire configuration, stores and runner
//! - [`Orchestrator`] with `run`, `resume`, `status` and `validate_only`
//! - [`RunReport`] and [`OrchestratorStatus`]

mod builder;
mod report;

pub use builder::OrchestratorBuilder;
pub use report::{OrchestratorStatus, RunReport};

use crate::cancellation::CancellationToken;
use crate::checkpoint::{Checkpoint, CheckpointManager};
use crate::config::OrchestratorConfig;
use crate::epoch::{EpochId, EpochManager, EpochProgress};
use crate::errors::OrchestratorError;
use crate::events::{EventSink, OrchestratorEvent};
use crate::governor::ResourceGovernor;
use crate::graph::StageGraph;
use crate::observability::SpanTimer;
use crate::validation::ValidationReport;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Runs a stage graph over a sequence of epochs.
///
/// Epochs execute strictly in order. Each one starts from the previous
/// epoch's committed registries, and nothing of an epoch is visible until
/// its checkpoint is COMMITTED.
#[derive(Debug)]
pub struct Orchestrator {
    config: OrchestratorConfig,
    run_id: String,
    graph: Arc<StageGraph>,
    epochs: EpochManager,
    checkpoints: CheckpointManager,
    governor: Arc<ResourceGovernor>,
    events: Arc<dyn EventSink>,
    progress: Arc<RwLock<EpochProgress>>,
}

impl Orchestrator {
    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Returns the run id stamped on checkpoints written by this instance.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Returns the planned stage graph.
    #[must_use]
    pub fn graph(&self) -> &StageGraph {
        &self.graph
    }

    /// Runs the configured epoch range.
    pub async fn run_configured(&self) -> Result<RunReport, OrchestratorError> {
        self.run(self.config.epochs()).await
    }

    /// Executes every epoch of `epochs` that is not already committed.
    ///
    /// Stops at the first failing epoch; later epochs are not started.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::InvalidRange`] for an empty range or
    /// one starting before the configured first epoch, and
    /// [`OrchestratorError::Epoch`] for the first epoch that fails.
    pub async fn run(&self, epochs: RangeInclusive<EpochId>) -> Result<RunReport, OrchestratorError> {
        let (start, end) = (*epochs.start(), *epochs.end());
        if start > end || start < self.config.start_epoch {
            return Err(OrchestratorError::InvalidRange { start, end });
        }

        let timer = SpanTimer::start("run");
        let mut report = RunReport::new(self.run_id.clone());
        let latest = self.checkpoints.latest_by_epoch().await?;
        info!(run_id = %self.run_id, start, end, "Run started");

        let sampling = self.start_sampling().await;
        let result = self.run_epochs(epochs, &latest, &mut report).await;
        self.stop_sampling(sampling).await;
        result?;

        report.duration_ms = timer.finish();
        info!(
            run_id = %self.run_id,
            executed = report.epochs.len(),
            skipped = report.skipped.len(),
            duration_ms = report.duration_ms,
            "Run finished"
        );
        Ok(report)
    }

    async fn run_epochs(
        &self,
        epochs: RangeInclusive<EpochId>,
        latest: &BTreeMap<EpochId, Checkpoint>,
        report: &mut RunReport,
    ) -> Result<(), OrchestratorError> {
        for epoch in epochs {
            if latest.get(&epoch).is_some_and(|c| c.is_committed()) {
                info!(epoch, "Epoch already committed, skipping");
                self.events.emit(&OrchestratorEvent::EpochSkipped { epoch }).await;
                report.skipped.push(epoch);
                continue;
            }
            let outcome = self.epochs.run_epoch(epoch, &self.run_id).await?;
            report.epochs.push(outcome);
        }
        Ok(())
    }

    /// Continues after the newest committed epoch up to the configured end.
    ///
    /// With no committed epoch this runs the whole configured range. The
    /// committed epoch is never executed again; its registries become the
    /// next epoch's baseline.
    ///
    /// # Errors
    ///
    /// Same as [`Orchestrator::run`].
    pub async fn resume(&self) -> Result<RunReport, OrchestratorError> {
        let from = match self.checkpoints.load_latest_committed().await? {
            Some(checkpoint) => checkpoint.epoch_id + 1,
            None => self.config.start_epoch,
        };
        if from > self.config.end_epoch {
            info!(run_id = %self.run_id, "Nothing to resume");
            return Ok(RunReport::new(self.run_id.clone()));
        }
        info!(run_id = %self.run_id, from, "Resuming");
        self.run(from.max(self.config.start_epoch)..=self.config.end_epoch).await
    }

    /// Returns the current progress and checkpoint state.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Checkpoint`] if the log cannot be read.
    pub async fn status(&self) -> Result<OrchestratorStatus, OrchestratorError> {
        let latest = self.checkpoints.latest_by_epoch().await?;
        let last_committed = latest.values().filter(|c| c.is_committed()).last().cloned();
        Ok(OrchestratorStatus {
            run_id: self.run_id.clone(),
            progress: self.progress.read().clone(),
            pool_size: self.governor.pool_size(),
            resources: self.governor.latest(),
            last_committed,
            epochs: latest.into_iter().map(|(epoch, c)| (epoch, c.status)).collect(),
        })
    }

    /// Re-runs the validation gate against a committed epoch without executing anything.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::NotCommitted`] unless `epoch` is
    /// committed, and [`OrchestratorError::Epoch`] if its registries or
    /// baseline cannot be loaded intact.
    pub async fn validate_only(&self, epoch: EpochId) -> Result<ValidationReport, OrchestratorError> {
        let checkpoint = self
            .checkpoints
            .latest_for(epoch)
            .await?
            .filter(|c| c.is_committed())
            .ok_or(OrchestratorError::NotCommitted(epoch))?;

        let produced = self
            .epochs
            .load_committed(&checkpoint)
            .await
            .map_err(|e| OrchestratorError::epoch(epoch, e))?;
        let baseline = self
            .epochs
            .baseline_for(epoch)
            .await
            .map_err(|e| OrchestratorError::epoch(epoch, e))?;

        let report = self.epochs.validate(epoch, &produced, &baseline).await;
        info!(epoch, worst = %report.worst(), "Dry-run validation finished");
        Ok(report)
    }

    /// Returns the registry hashes a committed epoch recorded.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Checkpoint`] if the log cannot be read.
    pub async fn committed_hashes(&self, epoch: EpochId) -> Result<Option<BTreeMap<String, String>>, OrchestratorError> {
        Ok(self
            .checkpoints
            .latest_for(epoch)
            .await?
            .filter(|c| c.is_committed())
            .map(|c| c.registry_content_hashes))
    }

    async fn start_sampling(&self) -> Option<(Arc<CancellationToken>, JoinHandle<()>)> {
        if !self.config.governor.adaptive {
            return None;
        }
        // Take one reading up front so the first wave already has one.
        self.governor.sample().await;
        let token = Arc::new(CancellationToken::new());
        let handle = self.governor.spawn_sampling(token.clone());
        Some((token, handle))
    }

    async fn stop_sampling(&self, sampling: Option<(Arc<CancellationToken>, JoinHandle<()>)>) {
        if let Some((token, handle)) = sampling {
            token.cancel("run finished");
            if let Err(e) = handle.await {
                warn!(error = %e, "Resource sampling task ended abnormally");
            }
        }
    }
}
