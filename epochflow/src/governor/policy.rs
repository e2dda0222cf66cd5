//! Pool-size policy with hysteresis.

use super::ResourceSnapshot;
use crate::errors::ConfigError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Governor thresholds and limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    /// Shrink when memory or CPU is above this ratio.
    pub high_water_mark: f64,
    /// Grow when memory and CPU stay below this ratio.
    pub low_water_mark: f64,
    /// Minimum time between two pool-size changes.
    pub cooldown_secs: u64,
    /// How long usage must stay below the low-water mark before growing.
    pub sustain_secs: u64,
    /// Smallest pool size.
    pub min_workers: usize,
    /// Largest pool size.
    pub max_workers: usize,
    /// Pool size of the first wave.
    pub initial_workers: usize,
    /// Interval of the background sampling loop.
    pub sample_interval_ms: u64,
    /// When false, the pool stays at `initial_workers`.
    pub adaptive: bool,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        let cores = std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get);
        Self {
            high_water_mark: 0.85,
            low_water_mark: 0.60,
            cooldown_secs: 30,
            sustain_secs: 10,
            min_workers: 1,
            max_workers: cores.max(1),
            initial_workers: cores.clamp(1, 4),
            sample_interval_ms: 1000,
            adaptive: true,
        }
    }
}

impl GovernorConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A governor that never changes the pool size.
    #[must_use]
    pub fn fixed(workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            min_workers: workers,
            max_workers: workers,
            initial_workers: workers,
            adaptive: false,
            ..Self::default()
        }
    }

    /// Sets the water marks.
    #[must_use]
    pub fn with_water_marks(mut self, low: f64, high: f64) -> Self {
        self.low_water_mark = low;
        self.high_water_mark = high;
        self
    }

    /// Sets the cooldown.
    #[must_use]
    pub fn with_cooldown_secs(mut self, secs: u64) -> Self {
        self.cooldown_secs = secs;
        self
    }

    /// Sets the sustain period.
    #[must_use]
    pub fn with_sustain_secs(mut self, secs: u64) -> Self {
        self.sustain_secs = secs;
        self
    }

    /// Sets the pool bounds and the starting size.
    #[must_use]
    pub fn with_workers(mut self, min: usize, initial: usize, max: usize) -> Self {
        self.min_workers = min;
        self.initial_workers = initial;
        self.max_workers = max;
        self
    }

    /// Sets the sampling interval.
    #[must_use]
    pub fn with_sample_interval_ms(mut self, ms: u64) -> Self {
        self.sample_interval_ms = ms;
        self
    }

    /// Checks the configuration for consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let in_unit = |v: f64| (0.0..=1.0).contains(&v);
        if !in_unit(self.low_water_mark) || !in_unit(self.high_water_mark) {
            return Err(ConfigError::Invalid("water marks must be within 0.0..=1.0".into()));
        }
        if self.low_water_mark >= self.high_water_mark {
            return Err(ConfigError::Invalid(format!(
                "low_water_mark ({}) must be below high_water_mark ({})",
                self.low_water_mark, self.high_water_mark
            )));
        }
        if self.min_workers == 0 {
            return Err(ConfigError::Invalid("min_workers must be at least 1".into()));
        }
        if self.min_workers > self.max_workers {
            return Err(ConfigError::Invalid(format!(
                "min_workers ({}) exceeds max_workers ({})",
                self.min_workers, self.max_workers
            )));
        }
        if !(self.min_workers..=self.max_workers).contains(&self.initial_workers) {
            return Err(ConfigError::Invalid(format!(
                "initial_workers ({}) outside {}..={}",
                self.initial_workers, self.min_workers, self.max_workers
            )));
        }
        if self.sample_interval_ms == 0 {
            return Err(ConfigError::Invalid("sample_interval_ms must be positive".into()));
        }
        Ok(())
    }
}

/// Hysteresis state for pool-size recommendations.
///
/// Time is read from snapshot timestamps only, so the same sequence of
/// snapshots always produces the same recommendations.
#[derive(Debug, Clone)]
pub struct HysteresisPolicy {
    config: GovernorConfig,
    last_change: Option<DateTime<Utc>>,
    low_since: Option<DateTime<Utc>>,
}

impl HysteresisPolicy {
    /// Creates a policy with no history.
    #[must_use]
    pub fn new(config: GovernorConfig) -> Self {
        Self {
            config,
            last_change: None,
            low_since: None,
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &GovernorConfig {
        &self.config
    }

    /// Returns when the pool size last changed.
    #[must_use]
    pub fn last_change(&self) -> Option<DateTime<Utc>> {
        self.last_change
    }

    /// Recommends the pool size given the current size and a reading.
    ///
    /// Shrinks by one above the high-water mark, grows by one after usage
    /// stayed below the low-water mark for `sustain_secs`, and holds during
    /// the cooldown that follows any change.
    pub fn recommend(&mut self, current: usize, snapshot: &ResourceSnapshot) -> usize {
        let cfg = &self.config;
        let current = current.clamp(cfg.min_workers, cfg.max_workers);
        if !cfg.adaptive {
            return current;
        }
        let now = snapshot.timestamp;

        if snapshot.below(cfg.low_water_mark) {
            self.low_since.get_or_insert(now);
        } else {
            self.low_since = None;
        }

        let cooldown = Duration::seconds(i64::try_from(cfg.cooldown_secs).unwrap_or(i64::MAX));
        if let Some(changed) = self.last_change {
            if now - changed < cooldown {
                return current;
            }
        }

        if snapshot.above(cfg.high_water_mark) {
            if current > cfg.min_workers {
                self.last_change = Some(now);
                return current - 1;
            }
            return current;
        }

        let sustain = Duration::seconds(i64::try_from(cfg.sustain_secs).unwrap_or(i64::MAX));
        if let Some(since) = self.low_since {
            if now - since >= sustain && current < cfg.max_workers {
                self.last_change = Some(now);
                self.low_since = Some(now);
                return current + 1;
            }
        }
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn snap(memory: f64, cpu: f64, at: i64) -> ResourceSnapshot {
        ResourceSnapshot::new(memory, cpu, 0.0, t(at))
    }

    fn policy() -> HysteresisPolicy {
        HysteresisPolicy::new(GovernorConfig::new().with_workers(1, 4, 8).with_cooldown_secs(30).with_sustain_secs(10))
    }

    #[test]
    fn test_one_decrease_then_hold_during_cooldown() {
        let mut p = policy();
        let mut size = 4;
        size = p.recommend(size, &snap(0.95, 0.2, 0));
        assert_eq!(size, 3);
        for at in [1, 5, 10, 20, 29] {
            size = p.recommend(size, &snap(0.95, 0.95, at));
            assert_eq!(size, 3, "changed at t+{at}");
        }
        size = p.recommend(size, &snap(0.95, 0.2, 30));
        assert_eq!(size, 2);
    }

    #[test]
    fn test_floor_at_min_workers() {
        let mut p = HysteresisPolicy::new(GovernorConfig::new().with_workers(2, 2, 8));
        assert_eq!(p.recommend(2, &snap(0.99, 0.99, 0)), 2);
        assert!(p.last_change().is_none());
    }

    #[test]
    fn test_growth_requires_sustained_low() {
        let mut p = policy();
        assert_eq!(p.recommend(4, &snap(0.1, 0.1, 0)), 4);
        assert_eq!(p.recommend(4, &snap(0.1, 0.1, 9)), 4);
        assert_eq!(p.recommend(4, &snap(0.1, 0.1, 10)), 5);
        // cooldown
        assert_eq!(p.recommend(5, &snap(0.1, 0.1, 25)), 5);
        assert_eq!(p.recommend(5, &snap(0.1, 0.1, 40)), 6);
    }

    #[test]
    fn test_mid_band_resets_sustain() {
        let mut p = policy();
        assert_eq!(p.recommend(4, &snap(0.1, 0.1, 0)), 4);
        assert_eq!(p.recommend(4, &snap(0.7, 0.1, 5)), 4);
        assert_eq!(p.recommend(4, &snap(0.1, 0.1, 6)), 4);
        assert_eq!(p.recommend(4, &snap(0.1, 0.1, 12)), 4);
        assert_eq!(p.recommend(4, &snap(0.1, 0.1, 16)), 5);
    }

    #[test]
    fn test_ceiling_at_max_workers() {
        let mut p = HysteresisPolicy::new(GovernorConfig::new().with_workers(1, 2, 2).with_sustain_secs(0));
        assert_eq!(p.recommend(2, &snap(0.0, 0.0, 0)), 2);
    }

    #[test]
    fn test_fixed_never_changes() {
        let mut p = HysteresisPolicy::new(GovernorConfig::fixed(3));
        assert_eq!(p.recommend(3, &snap(0.99, 0.99, 0)), 3);
        assert_eq!(p.recommend(3, &snap(0.0, 0.0, 100)), 3);
    }

    #[test]
    fn test_validate() {
        assert!(GovernorConfig::new().with_workers(1, 2, 4).validate().is_ok());
        assert!(GovernorConfig::new().with_water_marks(0.9, 0.8).validate().is_err());
        assert!(GovernorConfig::new().with_workers(4, 4, 2).validate().is_err());
        assert!(GovernorConfig::new().with_workers(0, 1, 2).validate().is_err());
        assert!(GovernorConfig::new().with_workers(1, 9, 4).validate().is_err());
    }
}
