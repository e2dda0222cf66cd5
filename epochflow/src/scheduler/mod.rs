//! Deterministic parallel scheduler.
//!
//! Executes one wave at a time on a bounded worker pool. Stages within a
//! wave run concurrently, but their results are merged by execution index,
//! and every stage draws its randomness from a seed derived from its name,
//! epoch, execution index and the global seed. The merged output of a wave
//! is therefore the same for any worker count.

mod context;
mod executor;
mod retry;
mod runner;

pub use context::{derive_seed, ExecutionContext};
pub use executor::{StageResult, WaveScheduler};
pub use retry::{Backoff, BackoffStrategy, JitterStrategy, RetryPolicy};
pub use runner::{OutputDescriptor, StageOutcome, TransformRunner};
