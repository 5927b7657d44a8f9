#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use punchlist_core::models::{
    EntityType, ItemStatus, Photo, Priority, Project, ProjectStatus, PunchlistItem, Trade, User,
    UserRole,
};
use punchlist_core::sync::{RemoteApi, RemoteError};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

pub fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

pub fn project(id: &str, updated: i64) -> Project {
    Project {
        id: id.to_string(),
        name: format!("Project {}", id),
        description: None,
        address: "1 Main St".to_string(),
        city: "Anytown".to_string(),
        state: "CA".to_string(),
        zip_code: "12345".to_string(),
        client_name: "Client".to_string(),
        start_date: ts(0),
        end_date: None,
        status: ProjectStatus::InProgress,
        created_by: "u1".to_string(),
        assigned_users: vec!["u1".to_string()],
        created_at: ts(0),
        updated_at: ts(updated),
    }
}

pub fn item(id: &str, project_id: &str, updated: i64) -> PunchlistItem {
    PunchlistItem {
        id: id.to_string(),
        project_id: project_id.to_string(),
        title: format!("Item {}", id),
        description: "desc".to_string(),
        location: "Room 101".to_string(),
        trade: Trade::Plumbing,
        priority: Priority::Low,
        status: ItemStatus::Open,
        assigned_to: None,
        created_by: "u1".to_string(),
        due_date: None,
        completed_date: None,
        verified_date: None,
        notes: Vec::new(),
        created_at: ts(0),
        updated_at: ts(updated),
    }
}

pub fn photo(id: &str, item_id: &str, updated: i64) -> Photo {
    Photo {
        id: id.to_string(),
        punchlist_item_id: item_id.to_string(),
        url: format!("https://cdn.example.com/{}.jpg", id),
        thumbnail_url: format!("https://cdn.example.com/{}_thumb.jpg", id),
        caption: None,
        taken_at: ts(0),
        uploaded_by: "u1".to_string(),
        uploaded_at: ts(0),
        updated_at: ts(updated),
    }
}

pub fn user(id: &str) -> User {
    User {
        id: id.to_string(),
        email: format!("{}@example.com", id),
        first_name: "Sam".to_string(),
        last_name: "Builder".to_string(),
        role: UserRole::Contractor,
        company: "Acme".to_string(),
        phone: None,
        avatar: None,
        created_at: ts(0),
        updated_at: ts(0),
    }
}

/// Pauses a remote call until released, to observe a pass mid-flight.
#[derive(Default)]
pub struct Gate {
    pub entered: Notify,
    pub release: Notify,
}

/// In-memory server with scriptable failures. Records every mutation as
/// `"KIND entity_type id"`.
#[derive(Default)]
pub struct FakeRemote {
    pub projects: Mutex<HashMap<String, Project>>,
    pub items: Mutex<HashMap<String, Vec<PunchlistItem>>>,
    pub photos: Mutex<HashMap<String, Vec<Photo>>>,
    pub users: Mutex<Vec<User>>,
    /// Project ids whose fetch fails with a server error.
    pub failing_fetches: Mutex<HashSet<String>>,
    /// Entity ids whose mutations are rejected.
    pub rejected: Mutex<HashSet<String>>,
    pub delete_not_found: AtomicBool,
    pub offline: AtomicBool,
    /// Only the user directory fetch reports the server unreachable.
    pub users_unreachable: AtomicBool,
    pub calls: Mutex<Vec<String>>,
    /// UPDATE payloads in the order they were sent.
    pub sent: Mutex<Vec<Value>>,
    /// Held by every `fetch_project`.
    pub gate: Option<Arc<Gate>>,
    /// Held by the first mutation only.
    pub mutation_gate: Mutex<Option<Arc<Gate>>>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gated(gate: Arc<Gate>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    pub fn gating_first_mutation(gate: Arc<Gate>) -> Self {
        Self {
            mutation_gate: Mutex::new(Some(gate)),
            ..Self::default()
        }
    }

    pub fn add_project(&self, project: Project) {
        self.projects
            .lock()
            .unwrap()
            .insert(project.id.clone(), project);
    }

    pub fn add_item(&self, item: PunchlistItem) {
        self.items
            .lock()
            .unwrap()
            .entry(item.project_id.clone())
            .or_default()
            .push(item);
    }

    pub fn add_photo(&self, photo: Photo) {
        self.photos
            .lock()
            .unwrap()
            .entry(photo.punchlist_item_id.clone())
            .or_default()
            .push(photo);
    }

    pub fn fail_fetch(&self, project_id: &str) {
        self.failing_fetches
            .lock()
            .unwrap()
            .insert(project_id.to_string());
    }

    pub fn reject(&self, entity_id: &str) {
        self.rejected.lock().unwrap().insert(entity_id.to_string());
    }

    pub fn accept(&self, entity_id: &str) {
        self.rejected.lock().unwrap().remove(entity_id);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn set_users_unreachable(&self, unreachable: bool) {
        self.users_unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn check_online(&self) -> Result<(), RemoteError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(RemoteError::Unavailable("connection refused".to_string()))
        } else {
            Ok(())
        }
    }

    async fn mutate(
        &self,
        kind: &str,
        entity_type: EntityType,
        id: &str,
    ) -> Result<(), RemoteError> {
        let gate = self.mutation_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        self.check_online()?;
        self.calls
            .lock()
            .unwrap()
            .push(format!("{} {} {}", kind, entity_type, id));
        if self.rejected.lock().unwrap().contains(id) {
            return Err(RemoteError::Rejected {
                status: 500,
                message: "Internal server error".to_string(),
            });
        }
        Ok(())
    }
}

fn id_of(payload: &Value) -> String {
    payload["id"].as_str().unwrap_or_default().to_string()
}

#[async_trait]
impl RemoteApi for FakeRemote {
    async fn fetch_project(&self, id: &str) -> Result<Project, RemoteError> {
        if let Some(gate) = &self.gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        self.check_online()?;
        if self.failing_fetches.lock().unwrap().contains(id) {
            return Err(RemoteError::Rejected {
                status: 500,
                message: "Failed to load project".to_string(),
            });
        }
        self.projects
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or(RemoteError::Rejected {
                status: 404,
                message: "Project not found".to_string(),
            })
    }

    async fn fetch_items(&self, project_id: &str) -> Result<Vec<PunchlistItem>, RemoteError> {
        self.check_online()?;
        Ok(self
            .items
            .lock()
            .unwrap()
            .get(project_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_photos(&self, item_id: &str) -> Result<Vec<Photo>, RemoteError> {
        self.check_online()?;
        Ok(self
            .photos
            .lock()
            .unwrap()
            .get(item_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_users(&self) -> Result<Vec<User>, RemoteError> {
        self.check_online()?;
        if self.users_unreachable.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable("connection reset".to_string()));
        }
        Ok(self.users.lock().unwrap().clone())
    }

    async fn create(
        &self,
        entity_type: EntityType,
        payload: &Value,
    ) -> Result<Option<Value>, RemoteError> {
        self.mutate("CREATE", entity_type, &id_of(payload)).await?;
        Ok(Some(payload.clone()))
    }

    async fn update(
        &self,
        entity_type: EntityType,
        id: &str,
        payload: &Value,
    ) -> Result<Option<Value>, RemoteError> {
        self.mutate("UPDATE", entity_type, id).await?;
        self.sent.lock().unwrap().push(payload.clone());
        Ok(None)
    }

    async fn delete(&self, entity_type: EntityType, id: &str) -> Result<(), RemoteError> {
        self.mutate("DELETE", entity_type, id).await?;
        if self.delete_not_found.load(Ordering::SeqCst) {
            return Err(RemoteError::Rejected {
                status: 404,
                message: "Not found".to_string(),
            });
        }
        Ok(())
    }
}
