//! Scripted transform runners for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;
use serde_json::json;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::epoch::EpochId;
use crate::scheduler::{ExecutionContext, OutputDescriptor, StageOutcome, TransformRunner};

/// Writes one deterministic entry per invocation into a registry.
///
/// The entry key is `<epoch>/<stage>` and its value depends only on the
/// derived seed and the size of the baseline registry, so any schedule
/// produces the same content.
#[derive(Debug, Clone)]
pub struct SeededRunner {
    registry: String,
    timing_noise_ms: u64,
}

impl SeededRunner {
    /// Creates a runner writing into `registry`.
    #[must_use]
    pub fn new(registry: impl Into<String>) -> Self {
        Self {
            registry: registry.into(),
            timing_noise_ms: 0,
        }
    }

    /// Sleeps a random 0..=`max_ms` before writing, to shuffle completion order.
    #[must_use]
    pub fn with_timing_noise(mut self, max_ms: u64) -> Self {
        self.timing_noise_ms = max_ms;
        self
    }
}

#[async_trait]
impl TransformRunner for SeededRunner {
    async fn run(&self, ctx: &ExecutionContext) -> StageOutcome {
        if self.timing_noise_ms > 0 {
            let ms = rand::thread_rng().gen_range(0..=self.timing_noise_ms);
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }

        let mut rng = StdRng::seed_from_u64(ctx.derived_seed());
        let draw: u32 = rng.gen();
        let rate: f64 = rng.gen::<f64>() * 0.1;
        let baseline_rows = ctx.baseline().registry(&self.registry).map_or(0, |r| r.len());
        let key = format!("{}/{}", ctx.epoch_id(), ctx.stage_name());
        let value = json!({
            "stage": ctx.stage_name(),
            "draw": draw,
            "rate": rate,
            "baseline_rows": baseline_rows,
        });

        match ctx.writer().put(&self.registry, key, value) {
            Ok(()) => StageOutcome::Success(OutputDescriptor::new().with_row_count(1)),
            Err(e) => StageOutcome::Fatal(e.to_string()),
        }
    }
}

/// Fails one stage fatally and delegates every other stage.
#[derive(Debug)]
pub struct FailingRunner<R> {
    inner: R,
    stage: String,
    epoch: Option<EpochId>,
}

impl<R: TransformRunner> FailingRunner<R> {
    /// Fails `stage` in every epoch.
    #[must_use]
    pub fn new(inner: R, stage: impl Into<String>) -> Self {
        Self {
            inner,
            stage: stage.into(),
            epoch: None,
        }
    }

    /// Restricts the failure to one epoch.
    #[must_use]
    pub fn in_epoch(mut self, epoch: EpochId) -> Self {
        self.epoch = Some(epoch);
        self
    }

    fn targets(&self, ctx: &ExecutionContext) -> bool {
        ctx.stage_name() == self.stage && self.epoch.map_or(true, |e| e == ctx.epoch_id())
    }
}

#[async_trait]
impl<R: TransformRunner> TransformRunner for FailingRunner<R> {
    async fn run(&self, ctx: &ExecutionContext) -> StageOutcome {
        if self.targets(ctx) {
            return StageOutcome::Fatal(format!("{} refused epoch {}", self.stage, ctx.epoch_id()));
        }
        self.inner.run(ctx).await
    }
}

/// Fails one stage transiently for its first `failures` attempts in each epoch.
#[derive(Debug)]
pub struct FlakyRunner<R> {
    inner: R,
    stage: String,
    failures: u32,
    calls: Mutex<HashMap<EpochId, u32>>,
}

impl<R: TransformRunner> FlakyRunner<R> {
    /// Creates a flaky wrapper.
    #[must_use]
    pub fn new(inner: R, stage: impl Into<String>, failures: u32) -> Self {
        Self {
            inner,
            stage: stage.into(),
            failures,
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Returns how often the flaky stage was invoked in `epoch`.
    #[must_use]
    pub fn calls(&self, epoch: EpochId) -> u32 {
        self.calls.lock().get(&epoch).copied().unwrap_or(0)
    }
}

#[async_trait]
impl<R: TransformRunner> TransformRunner for FlakyRunner<R> {
    async fn run(&self, ctx: &ExecutionContext) -> StageOutcome {
        if ctx.stage_name() == self.stage {
            let call = {
                let mut calls = self.calls.lock();
                let count = calls.entry(ctx.epoch_id()).or_insert(0);
                *count += 1;
                *count
            };
            if call <= self.failures {
                return StageOutcome::Transient(format!("{} attempt {call} timed out", self.stage));
            }
        }
        self.inner.run(ctx).await
    }
}

/// One entry of a [`RecordingRunner`] trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trace {
    /// An invocation began.
    Started(String),
    /// An invocation returned.
    Finished(String),
}

/// Records invocation order and peak concurrency.
#[derive(Debug)]
pub struct RecordingRunner<R> {
    inner: R,
    trace: Mutex<Vec<Trace>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl<R: TransformRunner> RecordingRunner<R> {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            trace: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Returns the full start/finish trace.
    #[must_use]
    pub fn trace(&self) -> Vec<Trace> {
        self.trace.lock().clone()
    }

    /// Returns stage names in the order they started.
    #[must_use]
    pub fn started(&self) -> Vec<String> {
        self.trace
            .lock()
            .iter()
            .filter_map(|t| match t {
                Trace::Started(name) => Some(name.clone()),
                Trace::Finished(_) => None,
            })
            .collect()
    }

    /// Returns the position of an entry in the trace.
    #[must_use]
    pub fn position(&self, entry: &Trace) -> Option<usize> {
        self.trace.lock().iter().position(|t| t == entry)
    }

    /// Returns the highest number of invocations seen in flight at once.
    #[must_use]
    pub fn max_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<R: TransformRunner> TransformRunner for RecordingRunner<R> {
    async fn run(&self, ctx: &ExecutionContext) -> StageOutcome {
        let name = ctx.stage_name().to_string();
        self.trace.lock().push(Trace::Started(name.clone()));
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let outcome = self.inner.run(ctx).await;

        self.active.fetch_sub(1, Ordering::SeqCst);
        self.trace.lock().push(Trace::Finished(name));
        outcome
    }
}

type RunFn = dyn Fn(&ExecutionContext) -> StageOutcome + Send + Sync;

/// Runs a closure for every invocation.
pub struct FnRunner {
    f: Box<RunFn>,
}

impl FnRunner {
    /// Wraps a closure.
    pub fn new(f: impl Fn(&ExecutionContext) -> StageOutcome + Send + Sync + 'static) -> Self {
        Self { f: Box::new(f) }
    }
}

impl fmt::Debug for FnRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnRunner").finish_non_exhaustive()
    }
}

#[async_trait]
impl TransformRunner for FnRunner {
    async fn run(&self, ctx: &ExecutionContext) -> StageOutcome {
        (self.f)(ctx)
    }
}
