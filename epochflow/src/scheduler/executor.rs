//! Wave execution on a bounded worker pool.

use super::{derive_seed, ExecutionContext, OutputDescriptor, RetryPolicy, StageOutcome, TransformRunner};
use crate::cancellation::CancellationToken;
use crate::epoch::EpochId;
use crate::errors::{StageFatalError, StageTransientError};
use crate::graph::{ExecutionWave, StageGraph};
use crate::registry::{BaselineView, RegistryWrite, RegistryWriter};
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// The result of one successful stage invocation.
#[derive(Debug, Clone, Serialize)]
pub struct StageResult {
    /// Stage name.
    pub stage_name: String,
    /// Position in the global execution order.
    pub execution_index: usize,
    /// Seed the stage was given.
    pub derived_seed: u64,
    /// Attempts used, counting the successful one.
    pub attempts: u32,
    /// What the runner reported.
    pub output: OutputDescriptor,
    /// Registry writes of the successful attempt, in the order recorded.
    pub writes: Vec<RegistryWrite>,
    /// Wall time of all attempts in milliseconds.
    pub duration_ms: f64,
}

enum TaskOutcome {
    Done(StageResult),
    Failed(StageFatalError),
    Skipped,
}

/// Runs the stages of one wave in parallel and merges their results.
#[derive(Debug, Clone)]
pub struct WaveScheduler {
    runner: Arc<dyn TransformRunner>,
    retry: Arc<RetryPolicy>,
    global_seed: u64,
    declared: Arc<BTreeSet<String>>,
}

impl WaveScheduler {
    /// Creates a scheduler.
    ///
    /// `declared` is the set of registries stages may write to.
    #[must_use]
    pub fn new(
        runner: Arc<dyn TransformRunner>,
        retry: RetryPolicy,
        global_seed: u64,
        declared: Arc<BTreeSet<String>>,
    ) -> Self {
        Self {
            runner,
            retry: Arc::new(retry),
            global_seed,
            declared,
        }
    }

    /// Returns the global seed.
    #[must_use]
    pub fn global_seed(&self) -> u64 {
        self.global_seed
    }

    /// Returns the retry policy.
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Executes every stage of `wave` with at most `worker_count` running at once.
    ///
    /// Returns results ordered by execution index. The call returns only
    /// after every stage reached a terminal status. When a stage fails
    /// fatally the remaining stages are cancelled: queued ones never start
    /// and results of in-flight ones are discarded.
    ///
    /// # Errors
    ///
    /// Returns the [`StageFatalError`] of the failing stage with the lowest
    /// execution index.
    pub async fn execute_wave(
        &self,
        wave: &ExecutionWave,
        graph: &StageGraph,
        epoch: EpochId,
        worker_count: usize,
        baseline: &BaselineView,
    ) -> Result<Vec<StageResult>, StageFatalError> {
        let workers = worker_count.max(1);
        let started = Instant::now();
        let token = Arc::new(CancellationToken::new());
        let semaphore = Arc::new(Semaphore::new(workers));

        info!(
            epoch,
            wave = wave.index,
            stages = wave.len(),
            workers,
            "Dispatching wave"
        );

        let mut tasks = FuturesUnordered::new();
        for name in &wave.stages {
            let index = graph.execution_index(name).ok_or_else(|| {
                StageFatalError::new(name.clone(), epoch, 0, "stage is not part of the graph")
            })?;
            let invocation = Invocation {
                runner: self.runner.clone(),
                retry: self.retry.clone(),
                declared: self.declared.clone(),
                baseline: baseline.clone(),
                token: token.clone(),
                semaphore: semaphore.clone(),
                stage: name.clone(),
                epoch,
                index,
                seed: derive_seed(name, epoch, index, self.global_seed),
            };
            let stage = name.clone();
            tasks.push(tokio::spawn(invocation.run()).map(move |joined| (index, stage, joined)));
        }

        let mut results = Vec::with_capacity(wave.len());
        let mut failures: Vec<(usize, StageFatalError)> = Vec::new();
        let mut skipped = 0usize;

        while let Some((index, stage, joined)) = tasks.next().await {
            let outcome = joined.unwrap_or_else(|e| {
                TaskOutcome::Failed(StageFatalError::new(
                    stage.clone(),
                    epoch,
                    0,
                    format!("stage task aborted: {e}"),
                ))
            });
            match outcome {
                TaskOutcome::Done(result) => results.push(result),
                TaskOutcome::Skipped => skipped += 1,
                TaskOutcome::Failed(err) => {
                    token.cancel(format!("stage '{stage}' failed"));
                    failures.push((index, err));
                }
            }
        }

        if let Some((_, err)) = failures.into_iter().min_by_key(|(index, _)| *index) {
            warn!(
                epoch,
                wave = wave.index,
                stage = %err.stage,
                skipped,
                discarded = results.len(),
                "Wave failed"
            );
            return Err(err);
        }

        results.sort_by_key(|r| r.execution_index);
        debug!(
            epoch,
            wave = wave.index,
            duration_ms = started.elapsed().as_secs_f64() * 1000.0,
            "Wave completed"
        );
        Ok(results)
    }
}

struct Invocation {
    runner: Arc<dyn TransformRunner>,
    retry: Arc<RetryPolicy>,
    declared: Arc<BTreeSet<String>>,
    baseline: BaselineView,
    token: Arc<CancellationToken>,
    semaphore: Arc<Semaphore>,
    stage: String,
    epoch: EpochId,
    index: usize,
    seed: u64,
}

impl Invocation {
    async fn run(self) -> TaskOutcome {
        let permit = tokio::select! {
            biased;
            () = self.token.cancelled() => return TaskOutcome::Skipped,
            permit = self.semaphore.clone().acquire_owned() => permit,
        };
        let Ok(_permit) = permit else {
            return TaskOutcome::Skipped;
        };
        if self.token.is_cancelled() {
            return TaskOutcome::Skipped;
        }

        let started = Instant::now();
        let mut backoff = self.retry.backoff(self.seed);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let writer = RegistryWriter::new(self.epoch, self.declared.clone());
            let ctx = ExecutionContext::new(
                self.stage.clone(),
                self.epoch,
                self.index,
                self.seed,
                self.baseline.clone(),
                writer,
            )
            .with_attempt(attempt);

            debug!(stage = %self.stage, epoch = self.epoch, attempt, "Stage started");
            match self.runner.run(&ctx).await {
                StageOutcome::Success(output) => {
                    let writes = ctx.into_writer().take();
                    debug!(stage = %self.stage, epoch = self.epoch, writes = writes.len(), "Stage completed");
                    return TaskOutcome::Done(StageResult {
                        stage_name: self.stage,
                        execution_index: self.index,
                        derived_seed: self.seed,
                        attempts: attempt,
                        output,
                        writes,
                        duration_ms: started.elapsed().as_secs_f64() * 1000.0,
                    });
                }
                StageOutcome::Fatal(message) => {
                    let err = StageFatalError::new(self.stage.clone(), self.epoch, attempt, message);
                    return self.fail(err);
                }
                StageOutcome::Transient(message) => {
                    let transient = StageTransientError {
                        stage: self.stage.clone(),
                        epoch: self.epoch,
                        attempt,
                        message,
                    };
                    let Some(delay) = backoff.next_delay() else {
                        return self.fail(StageFatalError::retries_exhausted(transient));
                    };
                    warn!(
                        stage = %self.stage,
                        epoch = self.epoch,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %transient.message,
                        "Retrying after transient failure"
                    );
                    tokio::select! {
                        biased;
                        () = self.token.cancelled() => return TaskOutcome::Skipped,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    // Cancel before returning so siblings still queued on the semaphore see it.
    fn fail(&self, err: StageFatalError) -> TaskOutcome {
        self.token.cancel(format!("stage '{}' failed", self.stage));
        TaskOutcome::Failed(err)
    }
}
