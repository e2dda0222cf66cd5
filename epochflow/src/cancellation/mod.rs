//! Cooperative cancellation.
//!
//! A fatal stage failure cancels the rest of its wave: stages still waiting
//! for a worker never start, and results of stages already running are
//! discarded. The governor's sampling loop is stopped the same way.

mod token;

pub use token::CancellationToken;
