//! Resource samplers.

use super::ResourceSnapshot;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt::Debug;

/// Source of resource readings.
#[async_trait]
pub trait ResourceSampler: Send + Sync + Debug {
    /// Takes a reading.
    async fn sample(&self) -> ResourceSnapshot;
}

/// Samples the host with `sysinfo`.
#[cfg(feature = "system-sampler")]
pub struct SystemSampler {
    system: Mutex<sysinfo::System>,
}

#[cfg(feature = "system-sampler")]
impl SystemSampler {
    /// Creates a sampler and primes the CPU counters.
    #[must_use]
    pub fn new() -> Self {
        let mut system = sysinfo::System::new();
        system.refresh_memory();
        system.refresh_cpu();
        Self {
            system: Mutex::new(system),
        }
    }
}

#[cfg(feature = "system-sampler")]
impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "system-sampler")]
impl Debug for SystemSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemSampler").finish_non_exhaustive()
    }
}

#[cfg(feature = "system-sampler")]
#[async_trait]
impl ResourceSampler for SystemSampler {
    #[allow(clippy::cast_precision_loss)]
    async fn sample(&self) -> ResourceSnapshot {
        let mut system = self.system.lock();
        system.refresh_memory();
        system.refresh_cpu();

        let total = system.total_memory();
        let memory = if total == 0 {
            0.0
        } else {
            system.used_memory() as f64 / total as f64
        };
        let cpu = f64::from(system.global_cpu_info().cpu_usage()) / 100.0;
        let load = sysinfo::System::load_average().one;

        tracing::trace!(memory, cpu, load, "Resource sample");
        ResourceSnapshot::new(memory, cpu, load, Utc::now())
    }
}

/// Always reports the same ratios, stamped with the current time.
#[derive(Debug, Clone, Copy)]
pub struct StaticSampler {
    memory_used_ratio: f64,
    cpu_used_ratio: f64,
    load_average: f64,
}

impl StaticSampler {
    /// Creates a sampler with fixed readings.
    #[must_use]
    pub fn new(memory_used_ratio: f64, cpu_used_ratio: f64, load_average: f64) -> Self {
        Self {
            memory_used_ratio,
            cpu_used_ratio,
            load_average,
        }
    }

    /// An idle host.
    #[must_use]
    pub fn idle() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }
}

#[async_trait]
impl ResourceSampler for StaticSampler {
    async fn sample(&self) -> ResourceSnapshot {
        ResourceSnapshot::new(self.memory_used_ratio, self.cpu_used_ratio, self.load_average, Utc::now())
    }
}

/// Replays a fixed sequence of snapshots, repeating the last one forever.
#[derive(Debug, Default)]
pub struct ScriptedSampler {
    script: Mutex<VecDeque<ResourceSnapshot>>,
    last: Mutex<Option<ResourceSnapshot>>,
}

impl ScriptedSampler {
    /// Creates a sampler that replays `snapshots` in order.
    #[must_use]
    pub fn new(snapshots: impl IntoIterator<Item = ResourceSnapshot>) -> Self {
        Self {
            script: Mutex::new(snapshots.into_iter().collect()),
            last: Mutex::new(None),
        }
    }

    /// Returns the number of snapshots not yet replayed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.script.lock().len()
    }
}

#[async_trait]
impl ResourceSampler for ScriptedSampler {
    async fn sample(&self) -> ResourceSnapshot {
        let next = self.script.lock().pop_front();
        let mut last = self.last.lock();
        match next {
            Some(snapshot) => {
                *last = Some(snapshot);
                snapshot
            }
            None => last.unwrap_or_else(ResourceSnapshot::idle),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_replays_then_repeats() {
        let t = Utc::now();
        let sampler = ScriptedSampler::new([
            ResourceSnapshot::new(0.9, 0.1, 0.0, t),
            ResourceSnapshot::new(0.1, 0.1, 0.0, t),
        ]);
        assert_eq!(sampler.sample().await.memory_used_ratio, 0.9);
        assert_eq!(sampler.sample().await.memory_used_ratio, 0.1);
        assert_eq!(sampler.remaining(), 0);
        assert_eq!(sampler.sample().await.memory_used_ratio, 0.1);
    }

    #[tokio::test]
    async fn test_static_sampler() {
        let s = StaticSampler::new(0.5, 0.25, 1.5).sample().await;
        assert_eq!(s.cpu_used_ratio, 0.25);
        assert_eq!(s.load_average, 1.5);
    }

    #[cfg(feature = "system-sampler")]
    #[tokio::test]
    async fn test_system_sampler_in_range() {
        let s = SystemSampler::new().sample().await;
        assert!((0.0..=1.0).contains(&s.memory_used_ratio));
        assert!((0.0..=1.0).contains(&s.cpu_used_ratio));
    }
}
