//! Checkpoint log backends.

use super::Checkpoint;
use crate::errors::CheckpointError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Append-only storage for checkpoint records.
#[async_trait]
pub trait CheckpointStore: Send + Sync + Debug {
    /// Appends a record durably.
    async fn append(&self, record: &Checkpoint) -> Result<(), CheckpointError>;

    /// Returns every record in append order.
    async fn records(&self) -> Result<Vec<Checkpoint>, CheckpointError>;
}

/// In-memory checkpoint log.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    records: Mutex<Vec<Checkpoint>>,
}

impl InMemoryCheckpointStore {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Returns true if the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn append(&self, record: &Checkpoint) -> Result<(), CheckpointError> {
        self.records.lock().push(record.clone());
        Ok(())
    }

    async fn records(&self) -> Result<Vec<Checkpoint>, CheckpointError> {
        Ok(self.records.lock().clone())
    }
}

/// Checkpoint log stored as JSON lines at `<root>/checkpoints.jsonl`.
///
/// A torn final line (crash mid-append) is ignored on read and truncated
/// before the next append; every earlier line was synced before the append
/// that followed it.
#[derive(Debug)]
pub struct FileCheckpointStore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileCheckpointStore {
    /// Creates a store rooted at `root`.
    #[must_use]
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            path: root.as_ref().join("checkpoints.jsonl"),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Returns the log path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Cuts the log back to its last complete line.
    async fn truncate_torn_tail(&self) -> Result<(), CheckpointError> {
        let content = match tokio::fs::read(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        if content.is_empty() || content.ends_with(b"\n") {
            return Ok(());
        }

        let keep = content.iter().rposition(|b| *b == b'\n').map_or(0, |i| i + 1);
        tracing::warn!(
            path = %self.path.display(),
            dropped_bytes = content.len() - keep,
            "Truncating torn trailing checkpoint record"
        );
        let len = u64::try_from(keep).map_err(std::io::Error::other)?;
        let file = tokio::fs::OpenOptions::new().write(true).open(&self.path).await?;
        file.set_len(len).await?;
        file.sync_all().await?;
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn append(&self, record: &Checkpoint) -> Result<(), CheckpointError> {
        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        self.truncate_torn_tail().await?;

        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.sync_all().await?;
        Ok(())
    }

    async fn records(&self) -> Result<Vec<Checkpoint>, CheckpointError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
        let mut records = Vec::with_capacity(lines.len());
        for (i, line) in lines.iter().enumerate() {
            match serde_json::from_str::<Checkpoint>(line) {
                Ok(record) => records.push(record),
                Err(e) if i + 1 == lines.len() && !content.ends_with('\n') => {
                    tracing::warn!(error = %e, "Ignoring torn trailing checkpoint record");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::CheckpointStatus;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn test_file_log_appends_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());

        let begin = Checkpoint::in_progress(2025);
        store.append(&begin).await.unwrap();
        store.append(&begin.committed(BTreeMap::new())).await.unwrap();

        let records = store.records().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].status, CheckpointStatus::InProgress);
        assert_eq!(records[1].status, CheckpointStatus::Committed);
    }

    #[tokio::test]
    async fn test_missing_log_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("nested"));
        assert!(store.records().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_torn_trailing_line_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        store.append(&Checkpoint::in_progress(2025)).await.unwrap();

        let mut content = tokio::fs::read_to_string(store.path()).await.unwrap();
        content.push_str(r#"{"epoch_id": 2026, "sta"#);
        tokio::fs::write(store.path(), content).await.unwrap();

        let records = store.records().await.unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn test_append_after_torn_line_keeps_log_readable() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        let first = Checkpoint::in_progress(2025);
        store.append(&first).await.unwrap();
        store.append(&first.committed(BTreeMap::new())).await.unwrap();

        let mut content = tokio::fs::read_to_string(store.path()).await.unwrap();
        content.push_str(r#"{"epoch_id": 2026, "sta"#);
        tokio::fs::write(store.path(), content).await.unwrap();

        let second = Checkpoint::in_progress(2026);
        store.append(&second).await.unwrap();
        store.append(&second.committed(BTreeMap::new())).await.unwrap();

        let records = store.records().await.unwrap();
        let summary: Vec<_> = records.iter().map(|r| (r.epoch_id, r.status)).collect();
        assert_eq!(
            summary,
            vec![
                (2025, CheckpointStatus::InProgress),
                (2025, CheckpointStatus::Committed),
                (2026, CheckpointStatus::InProgress),
                (2026, CheckpointStatus::Committed),
            ]
        );
        let content = tokio::fs::read_to_string(store.path()).await.unwrap();
        assert_eq!(content.lines().count(), 4);
    }

    #[tokio::test]
    async fn test_torn_only_line_truncated_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        tokio::fs::write(store.path(), r#"{"epoch_id": 20"#).await.unwrap();

        store.append(&Checkpoint::in_progress(2025)).await.unwrap();

        let records = store.records().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].epoch_id, 2025);
    }

    #[tokio::test]
    async fn test_corrupt_middle_line_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        tokio::fs::write(store.path(), "not json\n").await.unwrap();
        store.append(&Checkpoint::in_progress(2025)).await.unwrap();

        assert!(matches!(
            store.records().await,
            Err(CheckpointError::Serialization(_))
        ));
    }
}
