//! Persistence boundary for the offline store.
//!
//! The whole store is saved as one snapshot so a local mutation and its
//! queue entry always reach disk together.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::cache::LocalCache;
use super::operation::FailedOperation;
use super::queue::OperationQueue;
use crate::sync::Conflict;

/// Everything the offline store keeps across restarts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    #[serde(default)]
    pub cache: LocalCache,
    #[serde(default)]
    pub queue: OperationQueue,
    #[serde(default)]
    pub failed: Vec<FailedOperation>,
    /// Conflicts parked for manual resolution.
    #[serde(default)]
    pub conflicts: Vec<Conflict>,
    #[serde(default)]
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Files of photos captured on this device, by photo id.
    #[serde(default)]
    pub local_photos: BTreeMap<String, PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("I/O error at '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to (de)serialize store snapshot: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Storage backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait Persistence: Send + Sync {
    /// Returns `Ok(None)` when nothing has been saved yet.
    async fn load(&self) -> Result<Option<StoreSnapshot>, PersistenceError>;

    async fn save(&self, snapshot: &StoreSnapshot) -> Result<(), PersistenceError>;
}

/// Keeps the snapshot in memory only. Used for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    snapshot: Mutex<Option<StoreSnapshot>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: StoreSnapshot) -> Self {
        Self {
            snapshot: Mutex::new(Some(snapshot)),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Option<StoreSnapshot>>, PersistenceError> {
        self.snapshot
            .lock()
            .map_err(|_| PersistenceError::Backend("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl Persistence for MemoryPersistence {
    async fn load(&self) -> Result<Option<StoreSnapshot>, PersistenceError> {
        Ok(self.lock()?.clone())
    }

    async fn save(&self, snapshot: &StoreSnapshot) -> Result<(), PersistenceError> {
        *self.lock()? = Some(snapshot.clone());
        Ok(())
    }
}

/// Stores the snapshot as a JSON document on disk.
///
/// Writes go to a sibling temp file that is renamed over the target, so a
/// crash mid-write leaves the previous snapshot intact.
#[derive(Debug, Clone)]
pub struct JsonFilePersistence {
    path: PathBuf,
}

impl JsonFilePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl Persistence for JsonFilePersistence {
    async fn load(&self) -> Result<Option<StoreSnapshot>, PersistenceError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(PersistenceError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    async fn save(&self, snapshot: &StoreSnapshot) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|source| PersistenceError::Io {
                        path: parent.to_path_buf(),
                        source,
                    })?;
            }
        }

        let bytes = serde_json::to_vec(snapshot)?;
        let temp = self.temp_path();
        tokio::fs::write(&temp, bytes)
            .await
            .map_err(|source| PersistenceError::Io {
                path: temp.clone(),
                source,
            })?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .map_err(|source| PersistenceError::Io {
                path: self.path.clone(),
                source,
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntityType;
    use crate::offline::operation::{Operation, OperationKind};
    use serde_json::json;
    use tempfile::TempDir;

    fn snapshot() -> StoreSnapshot {
        let mut snapshot = StoreSnapshot::default();
        snapshot.queue.enqueue(Operation::new(
            OperationKind::Delete,
            EntityType::Photo,
            "ph1",
            json!({"id": "ph1"}),
            3,
        ));
        snapshot.last_sync_time = Some(Utc::now());
        snapshot
    }

    #[tokio::test]
    async fn test_memory_persistence_roundtrip() {
        let store = MemoryPersistence::new();
        assert!(store.load().await.unwrap().is_none());

        let snap = snapshot();
        store.save(&snap).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(snap));
    }

    #[tokio::test]
    async fn test_json_file_missing_returns_none() {
        let temp = TempDir::new().unwrap();
        let store = JsonFilePersistence::new(temp.path().join("offline-store.json"));
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_json_file_save_creates_directories() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("data").join("store.json");
        let store = JsonFilePersistence::new(path.clone());

        let snap = snapshot();
        store.save(&snap).await.unwrap();

        assert!(path.exists());
        assert!(!store.temp_path().exists());
        assert_eq!(store.load().await.unwrap(), Some(snap));
    }

    #[tokio::test]
    async fn test_json_file_corrupt_is_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("store.json");
        std::fs::write(&path, b"{ not json").unwrap();

        let store = JsonFilePersistence::new(path);
        let err = store.load().await.unwrap_err();
        assert!(matches!(err, PersistenceError::Serialization(_)));
    }
}
