//! Point-in-time resource readings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Host resource usage at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    /// Used memory as a fraction of total, in `0.0..=1.0`.
    pub memory_used_ratio: f64,
    /// Global CPU usage as a fraction, in `0.0..=1.0`.
    pub cpu_used_ratio: f64,
    /// One-minute load average.
    pub load_average: f64,
    /// When the reading was taken.
    pub timestamp: DateTime<Utc>,
}

impl ResourceSnapshot {
    /// Creates a snapshot with ratios clamped to `0.0..=1.0`.
    #[must_use]
    pub fn new(memory_used_ratio: f64, cpu_used_ratio: f64, load_average: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            memory_used_ratio: clamp_ratio(memory_used_ratio),
            cpu_used_ratio: clamp_ratio(cpu_used_ratio),
            load_average: load_average.max(0.0),
            timestamp,
        }
    }

    /// An idle reading taken now.
    #[must_use]
    pub fn idle() -> Self {
        Self::new(0.0, 0.0, 0.0, Utc::now())
    }

    /// Returns a copy with a different timestamp.
    #[must_use]
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Returns true if memory or CPU is above `high_water`.
    #[must_use]
    pub fn above(&self, high_water: f64) -> bool {
        self.memory_used_ratio > high_water || self.cpu_used_ratio > high_water
    }

    /// Returns true if memory and CPU are both below `low_water`.
    #[must_use]
    pub fn below(&self, low_water: f64) -> bool {
        self.memory_used_ratio < low_water && self.cpu_used_ratio < low_water
    }
}

fn clamp_ratio(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
