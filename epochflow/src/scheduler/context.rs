//! Per-invocation execution context and seed derivation.

use crate::epoch::EpochId;
use crate::registry::{BaselineView, RegistryWriter};
use sha2::{Digest, Sha256};

/// Derives the seed a stage uses for all of its randomness.
///
/// The seed is the first 8 bytes (big-endian) of
/// `sha256("{stage}|{epoch}|{index}|{global_seed}")`. It depends only on its
/// inputs, never on worker count, completion order or wall-clock time.
#[must_use]
pub fn derive_seed(stage_name: &str, epoch_id: EpochId, execution_index: usize, global_seed: u64) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(stage_name.as_bytes());
    hasher.update(b"|");
    hasher.update(epoch_id.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(execution_index.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(global_seed.to_string().as_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

/// Everything a transform runner gets for one stage invocation.
///
/// A context is built fresh for every attempt, so writes buffered by a
/// failed attempt are dropped with it.
#[derive(Debug)]
pub struct ExecutionContext {
    stage_name: String,
    epoch_id: EpochId,
    execution_index: usize,
    attempt: u32,
    derived_seed: u64,
    baseline: BaselineView,
    writer: RegistryWriter,
}

impl ExecutionContext {
    /// Creates a context.
    #[must_use]
    pub fn new(
        stage_name: impl Into<String>,
        epoch_id: EpochId,
        execution_index: usize,
        derived_seed: u64,
        baseline: BaselineView,
        writer: RegistryWriter,
    ) -> Self {
        Self {
            stage_name: stage_name.into(),
            epoch_id,
            execution_index,
            attempt: 1,
            derived_seed,
            baseline,
            writer,
        }
    }

    /// Sets the one-based attempt number.
    #[must_use]
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    /// Returns the stage name.
    #[must_use]
    pub fn stage_name(&self) -> &str {
        &self.stage_name
    }

    /// Returns the executing epoch.
    #[must_use]
    pub fn epoch_id(&self) -> EpochId {
        self.epoch_id
    }

    /// Returns the stage's position in the global execution order.
    #[must_use]
    pub fn execution_index(&self) -> usize {
        self.execution_index
    }

    /// Returns the one-based attempt number.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Returns the derived seed.
    #[must_use]
    pub fn derived_seed(&self) -> u64 {
        self.derived_seed
    }

    /// Returns the previous epoch's committed registries.
    #[must_use]
    pub fn baseline(&self) -> &BaselineView {
        &self.baseline
    }

    /// Returns the writer for this epoch's registry versions.
    #[must_use]
    pub fn writer(&self) -> &RegistryWriter {
        &self.writer
    }

    pub(crate) fn into_writer(self) -> RegistryWriter {
        self.writer
    }
}
