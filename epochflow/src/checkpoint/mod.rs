//! Checkpoint and resume.
//!
//! Checkpoints form an append-only log: every status change of an epoch is
//! a new record, and the latest record for an epoch is its status. Resume
//! trusts only COMMITTED records.

mod manager;
mod record;
mod store;

pub use manager::CheckpointManager;
pub use record::{Checkpoint, CheckpointStatus};
pub use store::{CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore};
