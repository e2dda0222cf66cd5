//! Retry policy for transient stage failures.
//!
//! The policy is plain data injected through configuration. Jitter is drawn
//! from an RNG seeded with the stage's derived seed, so the sequence of
//! delays for a stage is the same on every run.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff strategy for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = base * 2^retry
    #[default]
    Exponential,
    /// delay = base * (retry + 1)
    Linear,
    /// delay = base
    Constant,
}

/// Jitter applied on top of the backoff delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter
    None,
    /// Uniform in 0..=delay
    #[default]
    Full,
    /// Half fixed, half uniform
    Equal,
    /// min(max, uniform(base, prev * 3))
    Decorrelated,
}

/// How transient stage failures are retried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt; 0 disables retrying.
    pub max_retries: u32,
    /// Base delay in milliseconds.
    pub backoff_base_ms: u64,
    /// Upper bound on any single delay in milliseconds.
    pub max_backoff_ms: u64,
    /// Backoff strategy.
    pub backoff_strategy: BackoffStrategy,
    /// Jitter strategy.
    pub jitter: JitterStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_ms: 100,
            max_backoff_ms: 30_000,
            backoff_strategy: BackoffStrategy::Exponential,
            jitter: JitterStrategy::Full,
        }
    }
}

impl RetryPolicy {
    /// Creates the default policy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy that never retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Sets the retry budget.
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_backoff_base_ms(mut self, delay: u64) -> Self {
        self.backoff_base_ms = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_backoff_ms(mut self, delay: u64) -> Self {
        self.max_backoff_ms = delay;
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff_strategy = strategy;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, strategy: JitterStrategy) -> Self {
        self.jitter = strategy;
        self
    }

    /// Total attempts allowed, counting the first.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Starts a backoff sequence for a stage.
    #[must_use]
    pub fn backoff(&self, derived_seed: u64) -> Backoff<'_> {
        Backoff {
            policy: self,
            rng: StdRng::seed_from_u64(derived_seed),
            retries: 0,
            previous_ms: self.backoff_base_ms,
        }
    }

    fn base_delay_ms(&self, retry: u32) -> u64 {
        let base = self.backoff_base_ms;
        let delay = match self.backoff_strategy {
            BackoffStrategy::Exponential => base.saturating_mul(2u64.saturating_pow(retry)),
            BackoffStrategy::Linear => base.saturating_mul(u64::from(retry) + 1),
            BackoffStrategy::Constant => base,
        };
        delay.min(self.max_backoff_ms)
    }
}

/// The delay sequence for one stage within one epoch.
#[derive(Debug)]
pub struct Backoff<'a> {
    policy: &'a RetryPolicy,
    rng: StdRng,
    retries: u32,
    previous_ms: u64,
}

impl Backoff<'_> {
    /// Returns the delay before the next retry, or `None` once the budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.retries >= self.policy.max_retries {
            return None;
        }
        let delay = self.policy.base_delay_ms(self.retries);
        let max = self.policy.max_backoff_ms;
        let base = self.policy.backoff_base_ms;

        let jittered = match self.policy.jitter {
            JitterStrategy::None => delay,
            JitterStrategy::Full => {
                if delay == 0 {
                    0
                } else {
                    self.rng.gen_range(0..=delay)
                }
            }
            JitterStrategy::Equal => {
                let half = delay / 2;
                if half == 0 {
                    delay
                } else {
                    half + self.rng.gen_range(0..=half)
                }
            }
            JitterStrategy::Decorrelated => {
                let upper = self.previous_ms.saturating_mul(3).min(max);
                let next = if upper <= base {
                    base.min(max)
                } else {
                    self.rng.gen_range(base..=upper)
                };
                self.previous_ms = next;
                next
            }
        };

        self.retries += 1;
        Some(Duration::from_millis(jittered))
    }

    /// Returns how many retries have been handed out.
    #[must_use]
    pub fn retries(&self) -> u32 {
        self.retries
    }
}
