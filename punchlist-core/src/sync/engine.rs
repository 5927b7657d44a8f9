//! Download and upload passes between the offline store and the server.

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use super::conflict::{Conflict, ConflictPolicy, LastWriteWins, Side};
use super::connectivity::{ConnectivityMonitor, Reachability};
use super::error::SyncError;
use super::progress::{ProgressFn, ProgressTracker, SyncStage};
use super::remote::{RemoteApi, RemoteError};
use super::retry::RetryPolicy;
use crate::models::{Entity, EntityKey, EntityType};
use crate::offline::{
    Cached, Claim, CleanupReport, FailedOperation, OfflineStore, Operation, OperationKind,
    RetryOutcome, StoreStatus,
};

/// Report of one download pass.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub success: bool,
    pub projects_downloaded: usize,
    pub punchlist_items_downloaded: usize,
    pub photos_downloaded: usize,
    pub users_downloaded: usize,
    pub errors: Vec<String>,
    pub conflicts: Vec<Conflict>,
    /// Downloaded entities skipped because a local change to them was
    /// being uploaded at the time.
    pub deferred: usize,
    pub cancelled: bool,
}

/// Report of one upload pass.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResult {
    pub success: bool,
    pub uploaded: usize,
    pub errors: Vec<String>,
    /// Operations that became terminal-failed during this pass.
    pub failed: Vec<FailedOperation>,
    /// Operations held back behind an earlier failure, a backoff window or
    /// an unresolved conflict on the same entity.
    pub deferred: usize,
    pub cancelled: bool,
}

/// Upload followed by download.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub upload: UploadResult,
    pub download: SyncResult,
}

impl SyncReport {
    pub fn success(&self) -> bool {
        self.upload.success && self.download.success
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub downloading: bool,
    pub uploading: bool,
    pub connectivity: Reachability,
    #[serde(flatten)]
    pub store: StoreStatus,
}

/// Holds a pass flag for the lifetime of one pass.
struct PassGuard<'a>(&'a AtomicBool);

impl<'a> PassGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, SyncError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| SyncError::SyncAlreadyInProgress)?;
        Ok(Self(flag))
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct SyncEngine {
    store: Arc<OfflineStore>,
    remote: Arc<dyn RemoteApi>,
    policy: Box<dyn ConflictPolicy>,
    retry: RetryPolicy,
    connectivity: Option<Arc<ConnectivityMonitor>>,
    downloading: AtomicBool,
    uploading: AtomicBool,
    cancel_download: AtomicBool,
    cancel_upload: AtomicBool,
}

impl SyncEngine {
    pub fn new(store: Arc<OfflineStore>, remote: Arc<dyn RemoteApi>) -> Self {
        Self {
            store,
            remote,
            policy: Box::new(LastWriteWins),
            retry: RetryPolicy::default(),
            connectivity: None,
            downloading: AtomicBool::new(false),
            uploading: AtomicBool::new(false),
            cancel_download: AtomicBool::new(false),
            cancel_upload: AtomicBool::new(false),
        }
    }

    pub fn with_policy(mut self, policy: Box<dyn ConflictPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_connectivity(mut self, monitor: Arc<ConnectivityMonitor>) -> Self {
        self.connectivity = Some(monitor);
        self
    }

    pub fn store(&self) -> &Arc<OfflineStore> {
        &self.store
    }

    /// Starts an upload pass whenever the connectivity monitor reports the
    /// server reachable again. Needs a Tokio runtime at transition time.
    pub fn attach(self: &Arc<Self>) {
        let Some(monitor) = &self.connectivity else {
            return;
        };
        let engine: Weak<Self> = Arc::downgrade(self);
        monitor.on_change(move |state| {
            if state != Reachability::Reachable {
                return;
            }
            let Some(engine) = engine.upgrade() else {
                return;
            };
            let Ok(handle) = tokio::runtime::Handle::try_current() else {
                tracing::debug!("No runtime available for reconnect upload");
                return;
            };
            handle.spawn(async move {
                match engine.upload_offline_changes().await {
                    Ok(result) => tracing::info!(
                        uploaded = result.uploaded,
                        errors = result.errors.len(),
                        "Reconnect upload finished"
                    ),
                    Err(SyncError::SyncAlreadyInProgress) => {
                        tracing::debug!("Upload already running at reconnect")
                    }
                    Err(e) => tracing::warn!(error = %e, "Reconnect upload failed"),
                }
            });
        });
    }

    fn is_offline(&self) -> bool {
        self.connectivity
            .as_ref()
            .is_some_and(|monitor| !monitor.is_online())
    }

    fn download_cancelled(&self) -> bool {
        self.cancel_download.load(Ordering::Acquire)
    }

    fn upload_cancelled(&self) -> bool {
        self.cancel_upload.load(Ordering::Acquire)
    }

    /// Requests cooperative cancellation of running passes.
    pub fn cancel(&self) {
        tracing::info!("Sync cancellation requested");
        self.cancel_download.store(true, Ordering::Release);
        self.cancel_upload.store(true, Ordering::Release);
    }

    pub async fn status(&self) -> SyncStatus {
        SyncStatus {
            downloading: self.downloading.load(Ordering::Acquire),
            uploading: self.uploading.load(Ordering::Acquire),
            connectivity: self
                .connectivity
                .as_ref()
                .map_or(Reachability::Unknown, |monitor| monitor.current()),
            store: self.store.status().await,
        }
    }

    /// Pulls the given projects with their items, the items' photos and the
    /// user directory into the local cache.
    ///
    /// Failed fetches are collected in the result and the pass moves on. An
    /// unreachable server ends the pass early.
    pub async fn download_project_data(
        &self,
        project_ids: &[String],
        progress: Option<&mut ProgressFn<'_>>,
    ) -> Result<SyncResult, SyncError> {
        let _guard = PassGuard::acquire(&self.downloading)?;
        self.cancel_download.store(false, Ordering::Release);

        let mut tracker = ProgressTracker::new(progress);
        let mut result = SyncResult::default();
        let mut stopped = false;

        tracing::info!(projects = project_ids.len(), "Starting download");
        tracker.plan(project_ids.len() + 1);
        tracker.announce(SyncStage::Projects, "Downloading projects");

        let mut fetched_projects = Vec::new();
        for id in project_ids {
            let fetch = async { self.remote.fetch_project(id).await.map(|p| vec![p]) };
            match self.fetch_step(&mut result, id, fetch).await? {
                FetchStep::Cancelled => break,
                FetchStep::Applied(_) => {
                    result.projects_downloaded += 1;
                    fetched_projects.push(id.clone());
                }
                FetchStep::Failed => {}
                FetchStep::Stopped => stopped = true,
            }
            tracker.advance(SyncStage::Projects, format!("Project {}", id));
            if stopped {
                break;
            }
        }

        let mut fetched_items = Vec::new();
        if !stopped && !result.cancelled {
            tracker.plan(fetched_projects.len());
            tracker.announce(SyncStage::PunchlistItems, "Downloading punchlist items");
            for project_id in &fetched_projects {
                let label = format!("for project {}", project_id);
                let fetch = self.remote.fetch_items(project_id);
                match self.fetch_step(&mut result, &label, fetch).await? {
                    FetchStep::Cancelled => break,
                    FetchStep::Applied(ids) => {
                        result.punchlist_items_downloaded += ids.len();
                        fetched_items.extend(ids);
                    }
                    FetchStep::Failed => {}
                    FetchStep::Stopped => stopped = true,
                }
                tracker.advance(
                    SyncStage::PunchlistItems,
                    format!("Items for project {}", project_id),
                );
                if stopped {
                    break;
                }
            }
        }

        if !stopped && !result.cancelled {
            tracker.plan(fetched_items.len());
            tracker.announce(SyncStage::Photos, "Downloading photos");
            for item_id in &fetched_items {
                let label = format!("for item {}", item_id);
                let fetch = self.remote.fetch_photos(item_id);
                match self.fetch_step(&mut result, &label, fetch).await? {
                    FetchStep::Cancelled => break,
                    FetchStep::Applied(ids) => result.photos_downloaded += ids.len(),
                    FetchStep::Failed => {}
                    FetchStep::Stopped => stopped = true,
                }
                tracker.advance(SyncStage::Photos, format!("Photos for item {}", item_id));
                if stopped {
                    break;
                }
            }
        }

        if !stopped && !result.cancelled {
            tracker.announce(SyncStage::Users, "Downloading users");
            let fetch = self.remote.fetch_users();
            match self.fetch_step(&mut result, "directory", fetch).await? {
                FetchStep::Cancelled => {}
                FetchStep::Applied(ids) => result.users_downloaded = ids.len(),
                FetchStep::Failed => {}
                FetchStep::Stopped => stopped = true,
            }
            if !result.cancelled {
                tracker.advance(SyncStage::Users, "Users");
            }
        }

        if result.cancelled {
            tracker.complete("Sync cancelled");
        } else if stopped {
            tracker.complete("Sync stopped: server unreachable");
        } else {
            self.store.set_last_sync_time(Utc::now()).await?;
            tracker.complete("Sync complete");
        }

        result.success = result.errors.is_empty();
        tracing::info!(
            projects = result.projects_downloaded,
            items = result.punchlist_items_downloaded,
            photos = result.photos_downloaded,
            users = result.users_downloaded,
            errors = result.errors.len(),
            conflicts = result.conflicts.len(),
            deferred = result.deferred,
            cancelled = result.cancelled,
            "Download finished"
        );
        Ok(result)
    }

    /// Runs one fetch of a download stage and applies what came back.
    ///
    /// A cancel observed before or after the fetch marks the result
    /// cancelled and discards the response.
    async fn fetch_step<T, F>(
        &self,
        result: &mut SyncResult,
        label: &str,
        fetch: F,
    ) -> Result<FetchStep, SyncError>
    where
        T: Cached,
        F: Future<Output = Result<Vec<T>, RemoteError>>,
    {
        if self.download_cancelled() {
            result.cancelled = true;
            return Ok(FetchStep::Cancelled);
        }
        let fetched = fetch.await;
        if self.download_cancelled() {
            result.cancelled = true;
            return Ok(FetchStep::Cancelled);
        }

        match fetched {
            Ok(entities) => {
                let ids: Vec<String> = entities.iter().map(|e| e.id().to_string()).collect();
                let outcome = self
                    .store
                    .apply_remote(entities, self.policy.as_ref())
                    .await?;
                result.conflicts.extend(outcome.conflicts);
                result.deferred += outcome.deferred;
                Ok(FetchStep::Applied(ids))
            }
            Err(e) => {
                if record_fetch_error(result, T::TYPE, label, e) {
                    Ok(FetchStep::Stopped)
                } else {
                    Ok(FetchStep::Failed)
                }
            }
        }
    }

    /// Drains the operation queue against the server.
    ///
    /// Operations run in queue order. Once an operation for an entity fails
    /// or is held back, later operations for that entity wait for the next
    /// pass so they never overtake it. Each operation is claimed in the
    /// store right before it is sent, so edits made meanwhile queue behind
    /// it and downloads leave its entity alone.
    pub async fn upload_offline_changes(&self) -> Result<UploadResult, SyncError> {
        let _guard = PassGuard::acquire(&self.uploading)?;
        self.cancel_upload.store(false, Ordering::Release);

        let mut result = UploadResult::default();
        if self.is_offline() {
            result
                .errors
                .push(SyncError::NetworkUnavailable("device is offline".to_string()).to_string());
            return Ok(result);
        }

        let queued = self.store.pending_operations().await;
        let mut blocked: HashSet<EntityKey> = HashSet::new();
        let now = Utc::now();
        tracing::info!(pending = queued.len(), "Starting upload");

        for entry in queued {
            if self.upload_cancelled() {
                result.cancelled = true;
                break;
            }
            if self.is_offline() {
                result
                    .errors
                    .push(SyncError::NetworkUnavailable("connection lost".to_string()).to_string());
                break;
            }

            let key = entry.key();
            if blocked.contains(&key) {
                result.deferred += 1;
                continue;
            }
            if !entry.is_due(now) {
                tracing::debug!(op = %entry, "Backing off");
                blocked.insert(key);
                result.deferred += 1;
                continue;
            }

            let op = match self.store.claim_operation(&entry.id).await {
                Claim::Ready(op) => op,
                Claim::Gone => {
                    tracing::debug!(op = %entry, "Operation left the queue before upload");
                    continue;
                }
                Claim::ConflictPending => {
                    result.errors.push(
                        SyncError::ConflictUnresolved {
                            entity_type: entry.entity_type,
                            id: entry.entity_id.clone(),
                        }
                        .to_string(),
                    );
                    blocked.insert(key);
                    result.deferred += 1;
                    continue;
                }
            };

            let settled = match self.push(&op).await {
                Ok(response) => self.record_upload(&op, response, &mut result).await,
                Err(RemoteError::Unavailable(message)) => {
                    self.store.release_operation(&op.id).await;
                    result
                        .errors
                        .push(SyncError::NetworkUnavailable(message).to_string());
                    break;
                }
                Err(e) => {
                    blocked.insert(key);
                    self.handle_rejection(&op, e, &mut result).await
                }
            };
            if let Err(e) = settled {
                self.store.release_operation(&op.id).await;
                return Err(e);
            }
        }

        result.success = result.errors.is_empty();
        tracing::info!(
            uploaded = result.uploaded,
            errors = result.errors.len(),
            failed = result.failed.len(),
            deferred = result.deferred,
            "Upload finished"
        );
        Ok(result)
    }

    async fn push(&self, op: &Operation) -> Result<Option<Value>, RemoteError> {
        match op.kind {
            OperationKind::Create => self.remote.create(op.entity_type, &op.payload).await,
            OperationKind::Update => {
                self.remote
                    .update(op.entity_type, &op.entity_id, &op.payload)
                    .await
            }
            OperationKind::Delete => match self.remote.delete(op.entity_type, &op.entity_id).await {
                Ok(()) => Ok(None),
                Err(e) if e.is_not_found() => Ok(None),
                Err(e) => Err(e),
            },
        }
    }

    async fn record_upload(
        &self,
        op: &Operation,
        response: Option<Value>,
        result: &mut UploadResult,
    ) -> Result<(), SyncError> {
        if self.store.complete_operation(op, response).await? {
            tracing::debug!(op = %op, "Uploaded");
        } else {
            tracing::warn!(op = %op, "Uploaded operation was no longer queued");
        }
        result.uploaded += 1;
        Ok(())
    }

    async fn handle_rejection(
        &self,
        op: &Operation,
        error: RemoteError,
        result: &mut UploadResult,
    ) -> Result<(), SyncError> {
        let message = error.to_string();
        let next_attempt = self.retry.next_attempt(op.retry_count + 1, Utc::now());
        match self
            .store
            .record_failure(&op.id, &message, next_attempt)
            .await?
        {
            RetryOutcome::Retrying { retry_count } => {
                tracing::warn!(op = %op, retry_count, error = %message, "Upload failed, will retry");
                result.errors.push(
                    SyncError::RemoteRejected {
                        entity_type: op.entity_type,
                        id: op.entity_id.clone(),
                        message,
                    }
                    .to_string(),
                );
            }
            RetryOutcome::Exhausted(failed) => {
                tracing::warn!(op = %op, error = %message, "Upload failed permanently");
                result.errors.push(format!(
                    "{}: {}",
                    SyncError::RetryExhausted {
                        entity_type: op.entity_type,
                        id: op.entity_id.clone(),
                    },
                    message
                ));
                result.failed.push(failed);
            }
        }
        Ok(())
    }

    /// Uploads pending changes, then refreshes the given projects.
    pub async fn sync(
        &self,
        project_ids: &[String],
        progress: Option<&mut ProgressFn<'_>>,
    ) -> Result<SyncReport, SyncError> {
        let upload = self.upload_offline_changes().await?;
        let download = self.download_project_data(project_ids, progress).await?;
        Ok(SyncReport { upload, download })
    }

    /// Applies people's choices to conflicts parked for manual review.
    pub async fn resolve_conflicts(
        &self,
        decisions: &[(EntityKey, Side)],
    ) -> Result<Vec<Conflict>, SyncError> {
        let mut resolved = Vec::with_capacity(decisions.len());
        for (key, side) in decisions {
            let conflict = self.store.resolve_conflict(key, *side).await?;
            tracing::info!(key = %key, side = %side, "Conflict resolved");
            resolved.push(conflict);
        }
        Ok(resolved)
    }

    /// Removes cached data untouched for `max_age_days`.
    pub async fn cleanup_old_data(&self, max_age_days: i64) -> Result<CleanupReport, SyncError> {
        let report = self
            .store
            .cleanup_older_than(chrono::Duration::days(max_age_days))
            .await?;
        tracing::info!(
            projects = report.projects_removed,
            items = report.items_removed,
            photos = report.photos_removed,
            "Cleaned up old data"
        );
        Ok(report)
    }
}

/// What one fetch of a download stage amounted to.
enum FetchStep {
    /// Ids of the entities written to the cache.
    Applied(Vec<String>),
    Failed,
    /// The server is unreachable; the pass ends.
    Stopped,
    Cancelled,
}

/// Records a failed fetch. Returns true if the pass should stop.
fn record_fetch_error(
    result: &mut SyncResult,
    entity_type: EntityType,
    id: &str,
    error: RemoteError,
) -> bool {
    tracing::warn!(%entity_type, id, error = %error, "Download failed");
    match error {
        RemoteError::Unavailable(message) => {
            result
                .errors
                .push(SyncError::NetworkUnavailable(message).to_string());
            true
        }
        other => {
            result.errors.push(
                SyncError::RemoteRejected {
                    entity_type,
                    id: id.to_string(),
                    message: other.to_string(),
                }
                .to_string(),
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pass_guard_rejects_second_holder() {
        let flag = AtomicBool::new(false);
        let first = PassGuard::acquire(&flag).unwrap();
        assert!(matches!(
            PassGuard::acquire(&flag),
            Err(SyncError::SyncAlreadyInProgress)
        ));
        drop(first);
        assert!(PassGuard::acquire(&flag).is_ok());
    }

    #[test]
    fn test_report_success_needs_both_passes() {
        let report = SyncReport {
            upload: UploadResult {
                success: true,
                ..Default::default()
            },
            download: SyncResult::default(),
        };
        assert!(!report.success());
    }
}
