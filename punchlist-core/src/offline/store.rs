//! The offline store: cache, queue and conflict state behind one lock.
//!
//! Every mutation runs as a transaction. It is applied to a copy of the
//! current snapshot, the copy is persisted, and only then does it replace
//! the in-memory state. A local edit and its queue entry therefore land
//! together or not at all.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::cache::{Cached, CleanupReport};
use super::operation::{FailedOperation, Operation, OperationKind, DEFAULT_MAX_RETRIES};
use super::persistence::{MemoryPersistence, Persistence, PersistenceError, StoreSnapshot};
use super::photo_files::{file_uri, PhotoFileError, PhotoFiles, PhotoStorage};
use super::queue::{merge_patch, EnqueueOutcome, QueueError, RetryOutcome};
use crate::models::{
    updated_at_of, EntityKey, EntityType, NewPhoto, NewPunchlistItem, Photo, PhotoPatch, Project,
    PunchlistItem, PunchlistItemPatch, User,
};
use crate::sync::{Conflict, ConflictError, ConflictPolicy, Resolution, Side};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0} not found in local cache")]
    NotFound(EntityKey),
    #[error("Failed operation not found: {0}")]
    FailedOperationNotFound(String),
    #[error("No pending conflict for {0}")]
    ConflictNotFound(EntityKey),
    #[error(transparent)]
    Conflict(#[from] ConflictError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
    #[error("Invalid entity data: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    PhotoFile(#[from] PhotoFileError),
    #[error("No photo directory configured")]
    NoPhotoDirectory,
}

/// Queue policy knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreSettings {
    /// Retry ceiling stamped on new operations.
    pub max_retries: u32,
    /// Merge consecutive UPDATEs of the same entity into one queue entry.
    pub coalesce_updates: bool,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            coalesce_updates: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStatus {
    pub pending_operations: usize,
    pub failed_operations: usize,
    pub unresolved_conflicts: usize,
    pub last_sync_time: Option<DateTime<Utc>>,
}

/// Outcome of writing a batch of downloaded entities into the cache.
#[derive(Debug, Clone, Default)]
pub struct ApplyOutcome {
    /// Entities written without any conflict.
    pub applied: usize,
    /// Entities left alone because a local change to them is being uploaded.
    pub deferred: usize,
    pub conflicts: Vec<Conflict>,
}

/// Result of [`OfflineStore::claim_operation`].
#[derive(Debug, Clone, PartialEq)]
pub enum Claim {
    /// The operation as it stands now, marked in flight.
    Ready(Operation),
    /// The operation left the queue.
    Gone,
    /// The entity has a conflict waiting for manual review.
    ConflictPending,
}

pub struct OfflineStore {
    state: Mutex<StoreSnapshot>,
    persistence: Arc<dyn Persistence>,
    settings: StoreSettings,
    photo_files: Option<PhotoFiles>,
}

impl OfflineStore {
    /// Opens the store, restoring any snapshot saved by `persistence`.
    pub async fn open(
        persistence: Arc<dyn Persistence>,
        settings: StoreSettings,
    ) -> Result<Self, StoreError> {
        let snapshot = persistence.load().await?.unwrap_or_default();
        tracing::debug!(
            pending = snapshot.queue.len(),
            failed = snapshot.failed.len(),
            conflicts = snapshot.conflicts.len(),
            "Opened offline store"
        );
        Ok(Self {
            state: Mutex::new(snapshot),
            persistence,
            settings,
            photo_files: None,
        })
    }

    /// A store that lives only as long as the process.
    pub fn in_memory(settings: StoreSettings) -> Self {
        Self {
            state: Mutex::new(StoreSnapshot::default()),
            persistence: Arc::new(MemoryPersistence::new()),
            settings,
            photo_files: None,
        }
    }

    /// Keeps captured photo files in `dir`.
    pub fn with_photo_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.photo_files = Some(PhotoFiles::new(dir));
        self
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    pub fn photo_dir(&self) -> Option<&Path> {
        self.photo_files.as_ref().map(PhotoFiles::dir)
    }

    async fn transact<R, F>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&mut StoreSnapshot) -> Result<R, StoreError> + Send,
        R: Send,
    {
        let mut state = self.state.lock().await;
        let mut draft = state.clone();
        let out = f(&mut draft)?;
        self.persistence.save(&draft).await?;
        *state = draft;
        Ok(out)
    }

    async fn read<R>(&self, f: impl FnOnce(&StoreSnapshot) -> R) -> R {
        let state = self.state.lock().await;
        f(&state)
    }

    fn enqueue(&self, snapshot: &mut StoreSnapshot, op: Operation) -> EnqueueOutcome {
        if self.settings.coalesce_updates {
            snapshot.queue.enqueue_coalescing(op)
        } else {
            EnqueueOutcome::Appended(snapshot.queue.enqueue(op))
        }
    }

    // ------------------------------------------------------------------
    // Optimistic local mutations
    // ------------------------------------------------------------------

    /// Caches a new entity and queues its CREATE.
    pub async fn create_local<T: Cached>(&self, entity: T) -> Result<T, StoreError> {
        let payload = serde_json::to_value(&entity)?;
        let op = Operation::new(
            OperationKind::Create,
            T::TYPE,
            entity.id(),
            payload,
            self.settings.max_retries,
        );
        let cached = entity.clone();
        let outcome = self
            .transact(move |s| {
                s.cache.upsert(cached);
                Ok(self.enqueue(s, op))
            })
            .await?;
        tracing::debug!(key = %entity.key(), op = outcome.operation_id(), "Queued create");
        Ok(entity)
    }

    /// Applies a patch to a cached entity and queues the UPDATE.
    ///
    /// `updatedAt` is stamped with the current time. Returns the entity as
    /// it now stands in the cache.
    pub async fn update_local(
        &self,
        entity_type: EntityType,
        id: &str,
        mut patch: Map<String, Value>,
    ) -> Result<Value, StoreError> {
        let key = EntityKey::new(entity_type, id);
        patch.insert("updatedAt".to_string(), serde_json::to_value(Utc::now())?);
        let op = Operation::new(
            OperationKind::Update,
            entity_type,
            id,
            Value::Object(patch.clone()),
            self.settings.max_retries,
        );

        let lookup = key.clone();
        let updated = self
            .transact(move |s| {
                let mut current = s
                    .cache
                    .get_value(&lookup)
                    .ok_or_else(|| StoreError::NotFound(lookup.clone()))?;
                merge_patch(&mut current, Value::Object(patch));
                s.cache.put_value(entity_type, current.clone())?;
                self.enqueue(s, op);
                Ok(current)
            })
            .await?;
        tracing::debug!(key = %key, "Queued update");
        Ok(updated)
    }

    /// Removes an entity from the cache and queues its DELETE.
    ///
    /// Deleting an item also drops its cached photos; the server cascades
    /// the delete to them.
    pub async fn delete_local(&self, entity_type: EntityType, id: &str) -> Result<(), StoreError> {
        let key = EntityKey::new(entity_type, id);
        let op = Operation::new(
            OperationKind::Delete,
            entity_type,
            id,
            serde_json::json!({ "id": id }),
            self.settings.max_retries,
        );

        let lookup = key.clone();
        let orphaned = self.transact(move |s| {
            if !s.cache.remove_key(&lookup) {
                return Err(StoreError::NotFound(lookup));
            }
            if lookup.entity_type == EntityType::PunchlistItem {
                let photo_ids: Vec<String> = s
                    .cache
                    .photos_for_item(&lookup.id)
                    .into_iter()
                    .map(|p| p.id.clone())
                    .collect();
                for photo_id in photo_ids {
                    s.cache.remove::<Photo>(&photo_id);
                }
            }
            self.enqueue(s, op);
            Ok(take_orphaned_files(s))
        })
        .await?;
        remove_files(&orphaned).await;
        tracing::debug!(key = %key, "Queued delete");
        Ok(())
    }

    pub async fn create_punchlist_item(
        &self,
        draft: NewPunchlistItem,
    ) -> Result<PunchlistItem, StoreError> {
        self.create_local(draft.into_item(Utc::now())).await
    }

    /// An empty patch leaves the item untouched and queues nothing.
    pub async fn update_punchlist_item(
        &self,
        id: &str,
        patch: PunchlistItemPatch,
    ) -> Result<PunchlistItem, StoreError> {
        if patch.is_empty() {
            return self
                .punchlist_item(id)
                .await
                .ok_or_else(|| StoreError::NotFound(EntityKey::new(EntityType::PunchlistItem, id)));
        }
        let value = self
            .update_local(EntityType::PunchlistItem, id, to_map(&patch)?)
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn delete_punchlist_item(&self, id: &str) -> Result<(), StoreError> {
        self.delete_local(EntityType::PunchlistItem, id).await
    }

    pub async fn create_photo(&self, draft: NewPhoto) -> Result<Photo, StoreError> {
        self.create_local(draft.into_photo(Utc::now())).await
    }

    /// Copies an image into the photo directory, caches the photo and
    /// queues its CREATE. Empty URLs in `draft` point at the stored file.
    pub async fn capture_photo(&self, draft: NewPhoto, source: &Path) -> Result<Photo, StoreError> {
        let files = self
            .photo_files
            .as_ref()
            .ok_or(StoreError::NoPhotoDirectory)?;
        let item_key = EntityKey::new(EntityType::PunchlistItem, draft.punchlist_item_id.clone());
        if !self.read(|s| s.cache.contains(&item_key)).await {
            return Err(StoreError::NotFound(item_key));
        }

        let mut photo = draft.into_photo(Utc::now());
        let stored = files.import(&photo.id, source).await?;
        let uri = file_uri(&stored);
        if photo.url.is_empty() {
            photo.url = uri.clone();
        }
        if photo.thumbnail_url.is_empty() {
            photo.thumbnail_url = uri;
        }

        let op = Operation::new(
            OperationKind::Create,
            EntityType::Photo,
            photo.id.clone(),
            serde_json::to_value(&photo)?,
            self.settings.max_retries,
        );
        let cached = photo.clone();
        let path = stored.clone();
        let committed = self
            .transact(move |s| {
                if !s.cache.contains(&item_key) {
                    return Err(StoreError::NotFound(item_key));
                }
                s.local_photos.insert(cached.id.clone(), path);
                s.cache.upsert(cached);
                Ok(self.enqueue(s, op))
            })
            .await;

        match committed {
            Ok(outcome) => {
                tracing::debug!(
                    photo = %photo.id,
                    op = outcome.operation_id(),
                    path = %stored.display(),
                    "Queued captured photo"
                );
                Ok(photo)
            }
            Err(e) => {
                PhotoFiles::remove(&stored).await;
                Err(e)
            }
        }
    }

    pub async fn update_photo(&self, id: &str, patch: PhotoPatch) -> Result<Photo, StoreError> {
        let value = self
            .update_local(EntityType::Photo, id, to_map(&patch)?)
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn delete_photo(&self, id: &str) -> Result<(), StoreError> {
        self.delete_local(EntityType::Photo, id).await
    }

    // ------------------------------------------------------------------
    // Writes driven by the sync engine
    // ------------------------------------------------------------------

    /// Writes downloaded entities into the cache.
    ///
    /// Entities without queued local changes are stored as-is. Entities with
    /// queued changes whose remote version moved past the last confirmed
    /// sync become conflicts, settled by `policy`.
    pub async fn apply_remote<T: Cached>(
        &self,
        entities: Vec<T>,
        policy: &dyn ConflictPolicy,
    ) -> Result<ApplyOutcome, StoreError> {
        self.transact(move |s| {
            let mut outcome = ApplyOutcome::default();

            for entity in entities {
                let key = entity.key();
                let remote_ts = entity.updated_at();
                let parked = s.conflicts.iter().position(|c| c.key() == key);

                if !s.queue.has_pending(&key) && parked.is_none() {
                    s.cache.upsert(entity);
                    s.cache.mark_synced(&key, remote_ts);
                    outcome.applied += 1;
                    continue;
                }

                if s.queue.has_in_flight(&key) {
                    // Settled by the next download once the upload lands.
                    tracing::debug!(key = %key, "Deferring remote copy of entity being uploaded");
                    outcome.deferred += 1;
                    continue;
                }

                if let Some(synced) = s.cache.synced_at(&key) {
                    if remote_ts <= synced {
                        // Remote unchanged since last sync; local edits stand.
                        continue;
                    }
                }

                let local = s.cache.get_value(&key);
                let local_ts = local
                    .as_ref()
                    .and_then(updated_at_of)
                    .or_else(|| s.queue.latest_enqueued_at(&key))
                    .unwrap_or(remote_ts);
                let remote_value = serde_json::to_value(&entity)?;
                let mut conflict = Conflict::detect(&key, local, remote_value, local_ts, remote_ts);
                let resolution = policy.resolve(&conflict);
                conflict.decide(resolution)?;

                match resolution {
                    Resolution::Local => {
                        s.cache.mark_synced(&key, remote_ts);
                        if let Some(i) = parked {
                            s.conflicts.remove(i);
                        }
                    }
                    Resolution::Remote => {
                        conflict.discarded_operations = s
                            .queue
                            .remove_for_entity(&key)
                            .into_iter()
                            .map(|op| op.id)
                            .collect();
                        s.cache.upsert(entity);
                        s.cache.mark_synced(&key, remote_ts);
                        if let Some(i) = parked {
                            s.conflicts.remove(i);
                        }
                    }
                    Resolution::Manual => match parked {
                        Some(i) => s.conflicts[i] = conflict.clone(),
                        None => s.conflicts.push(conflict.clone()),
                    },
                }

                tracing::warn!(key = %key, resolution = %resolution, "Sync conflict detected");
                outcome.conflicts.push(conflict);
            }

            Ok(outcome)
        })
        .await
    }

    /// Marks a queued operation as being sent and returns its current copy.
    ///
    /// While claimed, the operation is never merged with later edits and
    /// downloads leave its entity alone. The mark lives in memory only.
    pub async fn claim_operation(&self, op_id: &str) -> Claim {
        let mut state = self.state.lock().await;
        let Some(key) = state.queue.get(op_id).map(Operation::key) else {
            return Claim::Gone;
        };
        if state
            .conflicts
            .iter()
            .any(|c| c.key() == key && c.is_pending_manual())
        {
            return Claim::ConflictPending;
        }
        match state.queue.claim(op_id) {
            Some(op) => Claim::Ready(op),
            None => Claim::Gone,
        }
    }

    /// Drops the in-flight mark of an operation that was not delivered.
    pub async fn release_operation(&self, op_id: &str) {
        self.state.lock().await.queue.release(op_id);
    }

    /// Removes an acknowledged operation and records the server's copy.
    ///
    /// Returns false, leaving the cache untouched, if the operation had
    /// already left the queue.
    pub async fn complete_operation(
        &self,
        op: &Operation,
        response: Option<Value>,
    ) -> Result<bool, StoreError> {
        let op_id = op.id.clone();
        let kind = op.kind;
        let key = op.key();
        self.transact(move |s| {
            if s.queue.dequeue_succeeded(&[op_id]) == 0 {
                return Ok(false);
            }
            if kind == OperationKind::Delete {
                s.cache.forget_synced(&key);
                return Ok(true);
            }

            let more_pending = s.queue.has_pending(&key);
            let server_copy = response.filter(|v| v.is_object() && !more_pending);
            let version = match server_copy {
                Some(value) => {
                    let version = updated_at_of(&value).unwrap_or_else(Utc::now);
                    if let Err(e) = s.cache.put_value(key.entity_type, value) {
                        tracing::debug!(key = %key, error = %e, "Ignoring unparseable server copy");
                    }
                    version
                }
                None => Utc::now(),
            };
            s.cache.mark_synced(&key, version);
            Ok(true)
        })
        .await
    }

    /// Records a failed upload attempt; exhausted operations move to the
    /// terminal-failed list.
    pub async fn record_failure(
        &self,
        op_id: &str,
        error: &str,
        next_attempt: Option<DateTime<Utc>>,
    ) -> Result<RetryOutcome, StoreError> {
        let op_id = op_id.to_string();
        let error = error.to_string();
        self.transact(move |s| {
            let outcome = s.queue.increment_retry(&op_id, &error, next_attempt)?;
            if let RetryOutcome::Exhausted(failed) = &outcome {
                s.failed.push(failed.clone());
            }
            Ok(outcome)
        })
        .await
    }

    pub async fn set_last_sync_time(&self, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.transact(move |s| {
            s.last_sync_time = Some(at);
            Ok(())
        })
        .await
    }

    /// Settles a conflict that was parked for manual review.
    pub async fn resolve_conflict(&self, key: &EntityKey, side: Side) -> Result<Conflict, StoreError> {
        let key = key.clone();
        self.transact(move |s| {
            let index = s
                .conflicts
                .iter()
                .position(|c| c.key() == key)
                .ok_or_else(|| StoreError::ConflictNotFound(key.clone()))?;
            let mut conflict = s.conflicts.remove(index);
            conflict.resolve_manually(side)?;

            match side {
                Side::Local => {
                    s.cache.mark_synced(&key, conflict.remote_updated_at);
                }
                Side::Remote => {
                    conflict.discarded_operations = s
                        .queue
                        .remove_for_entity(&key)
                        .into_iter()
                        .map(|op| op.id)
                        .collect();
                    s.cache.put_value(key.entity_type, conflict.remote.clone())?;
                    s.cache.mark_synced(&key, conflict.remote_updated_at);
                }
            }
            Ok(conflict)
        })
        .await
    }

    /// Returns a terminal-failed operation to the queue with a fresh retry budget.
    pub async fn requeue_failed(&self, op_id: &str) -> Result<Operation, StoreError> {
        let op_id = op_id.to_string();
        self.transact(move |s| {
            let index = s
                .failed
                .iter()
                .position(|f| f.operation.id == op_id)
                .ok_or_else(|| StoreError::FailedOperationNotFound(op_id.clone()))?;
            let mut op = s.failed.remove(index).operation;
            op.retry_count = 0;
            op.not_before = None;
            op.last_error = None;
            s.queue.reinsert(op.clone());
            Ok(op)
        })
        .await
    }

    /// Drops cached projects, items and photos not updated within `max_age`.
    /// Entities with queued operations or parked conflicts are kept.
    pub async fn cleanup_older_than(
        &self,
        max_age: chrono::Duration,
    ) -> Result<CleanupReport, StoreError> {
        let cutoff = Utc::now() - max_age;
        let (mut report, orphaned) = self
            .transact(move |s| {
                let mut protected: HashSet<EntityKey> =
                    s.queue.iter().map(|op| op.key()).collect();
                protected.extend(s.conflicts.iter().map(|c| c.key()));
                let report = s.cache.prune_older_than(cutoff, &protected);
                Ok((report, take_orphaned_files(s)))
            })
            .await?;
        remove_files(&orphaned).await;
        report.photo_files_removed = orphaned.len();
        Ok(report)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub async fn project(&self, id: &str) -> Option<Project> {
        self.read(|s| s.cache.get::<Project>(id).cloned()).await
    }

    pub async fn projects(&self) -> Vec<Project> {
        self.read(|s| s.cache.projects.values().cloned().collect())
            .await
    }

    pub async fn punchlist_item(&self, id: &str) -> Option<PunchlistItem> {
        self.read(|s| s.cache.get::<PunchlistItem>(id).cloned())
            .await
    }

    pub async fn punchlist_items(&self, project_id: &str) -> Vec<PunchlistItem> {
        self.read(|s| {
            s.cache
                .items_for_project(project_id)
                .into_iter()
                .cloned()
                .collect()
        })
        .await
    }

    pub async fn photos(&self, item_id: &str) -> Vec<Photo> {
        self.read(|s| {
            s.cache
                .photos_for_item(item_id)
                .into_iter()
                .cloned()
                .collect()
        })
        .await
    }

    /// Stored file of a photo captured on this device.
    pub async fn local_photo_path(&self, photo_id: &str) -> Option<PathBuf> {
        self.read(|s| s.local_photos.get(photo_id).cloned()).await
    }

    /// Disk usage of captured photos, if a photo directory is configured.
    pub async fn photo_storage(&self) -> Result<Option<PhotoStorage>, StoreError> {
        match &self.photo_files {
            Some(files) => Ok(Some(files.usage().await?)),
            None => Ok(None),
        }
    }

    pub async fn users(&self) -> Vec<User> {
        self.read(|s| s.cache.users.values().cloned().collect()).await
    }

    pub async fn pending_operations(&self) -> Vec<Operation> {
        self.read(|s| s.queue.iter().cloned().collect()).await
    }

    pub async fn failed_operations(&self) -> Vec<FailedOperation> {
        self.read(|s| s.failed.clone()).await
    }

    pub async fn conflicts(&self) -> Vec<Conflict> {
        self.read(|s| s.conflicts.clone()).await
    }

    pub async fn status(&self) -> StoreStatus {
        self.read(|s| StoreStatus {
            pending_operations: s.queue.len(),
            failed_operations: s.failed.len(),
            unresolved_conflicts: s.conflicts.len(),
            last_sync_time: s.last_sync_time,
        })
        .await
    }

    pub async fn snapshot(&self) -> StoreSnapshot {
        self.read(|s| s.clone()).await
    }
}

/// Forgets captured files whose photo left the cache and returns their paths.
fn take_orphaned_files(s: &mut StoreSnapshot) -> Vec<PathBuf> {
    let orphaned: Vec<String> = s
        .local_photos
        .keys()
        .filter(|id| !s.cache.photos.contains_key(id.as_str()))
        .cloned()
        .collect();
    orphaned
        .into_iter()
        .filter_map(|id| s.local_photos.remove(&id))
        .collect()
}

async fn remove_files(paths: &[PathBuf]) {
    for path in paths {
        PhotoFiles::remove(path).await;
    }
}

fn to_map<T: Serialize>(patch: &T) -> Result<Map<String, Value>, StoreError> {
    match serde_json::to_value(patch)? {
        Value::Object(map) => Ok(map),
        _ => Ok(Map::new()),
    }
}
