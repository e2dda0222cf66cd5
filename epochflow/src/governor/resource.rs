//! The governor service: background sampling plus pool-size decisions.

use super::{GovernorConfig, HysteresisPolicy, ResourceSampler, ResourceSnapshot};
use crate::cancellation::CancellationToken;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// A pool-size decision taken at the start of a wave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolDecision {
    /// Pool size before the decision.
    pub previous: usize,
    /// Pool size to use for the wave.
    pub size: usize,
}

impl PoolDecision {
    /// Returns true if the size changed.
    #[must_use]
    pub fn changed(&self) -> bool {
        self.previous != self.size
    }
}

/// Samples resource usage and recommends worker-pool sizes.
///
/// Sampling runs on its own timer (see [`ResourceGovernor::spawn_sampling`])
/// and only updates the latest snapshot. The scheduler asks for a decision
/// once per wave through [`ResourceGovernor::next_pool_size`].
#[derive(Debug)]
pub struct ResourceGovernor {
    sampler: Arc<dyn ResourceSampler>,
    policy: Mutex<HysteresisPolicy>,
    latest: RwLock<Option<ResourceSnapshot>>,
    pool_size: AtomicUsize,
    interval: Duration,
}

impl ResourceGovernor {
    /// Creates a governor starting at `config.initial_workers`.
    #[must_use]
    pub fn new(config: GovernorConfig, sampler: Arc<dyn ResourceSampler>) -> Self {
        let initial = config.initial_workers.clamp(config.min_workers.max(1), config.max_workers.max(1));
        let interval = Duration::from_millis(config.sample_interval_ms.max(1));
        Self {
            sampler,
            policy: Mutex::new(HysteresisPolicy::new(config)),
            latest: RwLock::new(None),
            pool_size: AtomicUsize::new(initial),
            interval,
        }
    }

    /// Takes a reading and stores it as the latest.
    pub async fn sample(&self) -> ResourceSnapshot {
        let snapshot = self.sampler.sample().await;
        *self.latest.write() = Some(snapshot);
        snapshot
    }

    /// Returns the latest reading, if any.
    #[must_use]
    pub fn latest(&self) -> Option<ResourceSnapshot> {
        *self.latest.read()
    }

    /// Returns the pool size currently in effect.
    #[must_use]
    pub fn pool_size(&self) -> usize {
        self.pool_size.load(Ordering::SeqCst)
    }

    /// Recommends a pool size for `snapshot` without applying it.
    pub fn recommend_pool_size(&self, current: usize, snapshot: &ResourceSnapshot) -> usize {
        self.policy.lock().recommend(current, snapshot)
    }

    /// Decides the pool size for the next wave from the latest reading.
    ///
    /// Without a reading the current size is kept.
    pub fn next_pool_size(&self) -> PoolDecision {
        let previous = self.pool_size();
        let Some(snapshot) = self.latest() else {
            return PoolDecision {
                previous,
                size: previous,
            };
        };
        let size = self.recommend_pool_size(previous, &snapshot);
        self.pool_size.store(size, Ordering::SeqCst);
        if size != previous {
            info!(
                previous,
                size,
                memory = snapshot.memory_used_ratio,
                cpu = snapshot.cpu_used_ratio,
                "Worker pool resized"
            );
        }
        PoolDecision { previous, size }
    }

    /// Starts the background sampling loop.
    ///
    /// The first sample is taken immediately. The loop exits when `token`
    /// is cancelled.
    pub fn spawn_sampling(self: &Arc<Self>, token: Arc<CancellationToken>) -> JoinHandle<()> {
        let governor = Arc::clone(self);
        tokio::spawn(async move {
            let interval_ms = u64::try_from(governor.interval.as_millis()).unwrap_or(u64::MAX);
            debug!(interval_ms, "Resource sampling started");
            loop {
                governor.sample().await;
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    () = tokio::time::sleep(governor.interval) => {}
                }
            }
            debug!("Resource sampling stopped");
        })
    }
}
