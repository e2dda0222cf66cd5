//! Registry storage backends.
//!
//! The orchestrator addresses the analytical store only through this
//! trait. Versions are keyed by `(name, epoch)`; saving the same version
//! twice overwrites it, which is how an epoch that crashed before commit
//! is re-executed. Committed versions are never re-saved because the
//! epoch loop never re-executes a committed epoch.

use super::Registry;
use crate::epoch::EpochId;
use crate::errors::RegistryError;
use async_trait::async_trait;
use dashmap::DashMap;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Durable storage for registry versions.
#[async_trait]
pub trait RegistryStore: Send + Sync + Debug {
    /// Persists a registry version durably.
    async fn save(&self, registry: &Registry) -> Result<(), RegistryError>;

    /// Loads a registry version.
    async fn load(&self, name: &str, epoch: EpochId) -> Result<Option<Registry>, RegistryError>;

    /// Lists the registry names stored for an epoch, sorted.
    async fn list(&self, epoch: EpochId) -> Result<Vec<String>, RegistryError>;
}

/// In-memory registry store.
#[derive(Debug, Default)]
pub struct InMemoryRegistryStore {
    versions: DashMap<(String, EpochId), Registry>,
}

impl InMemoryRegistryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored versions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.versions.len()
    }

    /// Returns true if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}

#[async_trait]
impl RegistryStore for InMemoryRegistryStore {
    async fn save(&self, registry: &Registry) -> Result<(), RegistryError> {
        self.versions
            .insert((registry.name().to_string(), registry.epoch()), registry.clone());
        Ok(())
    }

    async fn load(&self, name: &str, epoch: EpochId) -> Result<Option<Registry>, RegistryError> {
        Ok(self
            .versions
            .get(&(name.to_string(), epoch))
            .map(|entry| entry.value().clone()))
    }

    async fn list(&self, epoch: EpochId) -> Result<Vec<String>, RegistryError> {
        let mut names: Vec<String> = self
            .versions
            .iter()
            .filter(|entry| entry.key().1 == epoch)
            .map(|entry| entry.key().0.clone())
            .collect();
        names.sort();
        Ok(names)
    }
}

/// Registry store writing one JSON file per version.
///
/// Layout: `<root>/registries/<epoch>/<name>.json`. Files are written to a
/// temporary sibling, synced, then renamed into place so a crash never
/// leaves a truncated version behind.
#[derive(Debug, Clone)]
pub struct FileRegistryStore {
    root: PathBuf,
}

impl FileRegistryStore {
    /// Creates a store rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the store root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn epoch_dir(&self, epoch: EpochId) -> PathBuf {
        self.root.join("registries").join(epoch.to_string())
    }

    fn version_path(&self, name: &str, epoch: EpochId) -> PathBuf {
        self.epoch_dir(epoch).join(format!("{name}.json"))
    }
}

#[async_trait]
impl RegistryStore for FileRegistryStore {
    async fn save(&self, registry: &Registry) -> Result<(), RegistryError> {
        let dir = self.epoch_dir(registry.epoch());
        tokio::fs::create_dir_all(&dir).await?;

        let path = self.version_path(registry.name(), registry.epoch());
        let tmp = dir.join(format!(".{}.json.tmp", registry.name()));
        let bytes = serde_json::to_vec_pretty(registry)?;

        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, &path).await?;
        sync_dir(&dir).await?;

        debug!(
            registry = registry.name(),
            epoch = registry.epoch(),
            path = %path.display(),
            "Registry version written"
        );
        Ok(())
    }

    async fn load(&self, name: &str, epoch: EpochId) -> Result<Option<Registry>, RegistryError> {
        let path = self.version_path(name, epoch);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, epoch: EpochId) -> Result<Vec<String>, RegistryError> {
        let dir = self.epoch_dir(epoch);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            if file_name.starts_with('.') {
                continue;
            }
            if let Some(name) = file_name.strip_suffix(".json") {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Flushes a directory entry so a completed rename survives a crash.
#[cfg(unix)]
async fn sync_dir(dir: &Path) -> std::io::Result<()> {
    tokio::fs::File::open(dir).await?.sync_all().await
}

#[cfg(not(unix))]
#[allow(clippy::unused_async)]
async fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}
