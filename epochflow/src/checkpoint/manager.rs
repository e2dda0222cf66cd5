//! Single-writer checkpoint protocol.

use super::{Checkpoint, CheckpointStatus, CheckpointStore};
use crate::epoch::EpochId;
use crate::errors::CheckpointError;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Drives checkpoint status changes over a [`CheckpointStore`].
///
/// All writes go through one async mutex, so status changes are serialized
/// even if several tasks hold the manager.
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    store: Arc<dyn CheckpointStore>,
    writer: Arc<Mutex<()>>,
    run_id: Option<String>,
}

impl CheckpointManager {
    /// Creates a manager over a store.
    #[must_use]
    pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            store,
            writer: Arc::new(Mutex::new(())),
            run_id: None,
        }
    }

    /// Tags every record this manager writes with a run id.
    #[must_use]
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    /// Returns the latest record of every epoch, keyed by epoch.
    pub async fn latest_by_epoch(&self) -> Result<BTreeMap<EpochId, Checkpoint>, CheckpointError> {
        let mut latest = BTreeMap::new();
        for record in self.store.records().await? {
            latest.insert(record.epoch_id, record);
        }
        Ok(latest)
    }

    /// Returns the latest record for one epoch.
    pub async fn latest_for(&self, epoch: EpochId) -> Result<Option<Checkpoint>, CheckpointError> {
        Ok(self.latest_by_epoch().await?.remove(&epoch))
    }

    /// Returns the full append-only history.
    pub async fn history(&self) -> Result<Vec<Checkpoint>, CheckpointError> {
        self.store.records().await
    }

    /// Returns the highest epoch whose latest record is COMMITTED.
    pub async fn load_latest_committed(&self) -> Result<Option<Checkpoint>, CheckpointError> {
        Ok(self
            .latest_by_epoch()
            .await?
            .into_values()
            .filter(Checkpoint::is_committed)
            .last())
    }

    /// Records the start of an epoch.
    ///
    /// A previously IN_PROGRESS or FAILED epoch may be begun again; a
    /// COMMITTED epoch may not.
    pub async fn begin_epoch(&self, epoch: EpochId) -> Result<Checkpoint, CheckpointError> {
        let _guard = self.writer.lock().await;
        if let Some(existing) = self.latest_for(epoch).await? {
            match existing.status {
                CheckpointStatus::Committed => {
                    return Err(CheckpointError::InvalidTransition {
                        epoch,
                        from: existing.status.to_string(),
                        to: CheckpointStatus::InProgress.to_string(),
                    });
                }
                CheckpointStatus::InProgress => {
                    warn!(epoch, "Re-executing epoch left IN_PROGRESS by an earlier run");
                }
                CheckpointStatus::Failed => {
                    info!(epoch, "Re-executing previously FAILED epoch");
                }
            }
        }

        let mut record = Checkpoint::in_progress(epoch);
        if let Some(run_id) = &self.run_id {
            record = record.with_run_id(run_id.clone());
        }
        self.store.append(&record).await?;
        Ok(record)
    }

    /// Marks an IN_PROGRESS epoch COMMITTED with its registry hashes.
    pub async fn commit(
        &self,
        epoch: EpochId,
        registry_hashes: BTreeMap<String, String>,
    ) -> Result<Checkpoint, CheckpointError> {
        let _guard = self.writer.lock().await;
        let current = self.require_in_progress(epoch, CheckpointStatus::Committed).await?;
        let record = current.committed(registry_hashes);
        self.store.append(&record).await?;
        info!(epoch, registries = record.registry_content_hashes.len(), "Epoch checkpoint committed");
        Ok(record)
    }

    /// Marks an IN_PROGRESS epoch FAILED.
    pub async fn fail(&self, epoch: EpochId, reason: impl Into<String>) -> Result<Checkpoint, CheckpointError> {
        let _guard = self.writer.lock().await;
        let current = self.require_in_progress(epoch, CheckpointStatus::Failed).await?;
        let record = current.failed(reason);
        self.store.append(&record).await?;
        warn!(epoch, reason = record.failure_reason.as_deref().unwrap_or_default(), "Epoch checkpoint failed");
        Ok(record)
    }

    async fn require_in_progress(
        &self,
        epoch: EpochId,
        to: CheckpointStatus,
    ) -> Result<Checkpoint, CheckpointError> {
        let current = self
            .latest_for(epoch)
            .await?
            .ok_or(CheckpointError::NotStarted(epoch))?;
        if current.status != CheckpointStatus::InProgress {
            return Err(CheckpointError::InvalidTransition {
                epoch,
                from: current.status.to_string(),
                to: to.to_string(),
            });
        }
        Ok(current)
    }
}
