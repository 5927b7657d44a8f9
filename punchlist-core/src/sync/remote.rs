//! Boundary to the server that owns the source of truth.

use async_trait::async_trait;
use serde_json::Value;

use crate::models::{EntityType, Photo, Project, PunchlistItem, User};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RemoteError {
    /// The server could not be reached at all.
    #[error("server unreachable: {0}")]
    Unavailable(String),
    #[error("server returned {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("invalid response from server: {0}")]
    InvalidResponse(String),
}

impl RemoteError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::Rejected { status: 404, .. })
    }
}

/// Remote data API consumed by the sync engine.
///
/// Mutations return the server's copy of the entity when the server sends
/// one back.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn fetch_project(&self, id: &str) -> Result<Project, RemoteError>;

    async fn fetch_items(&self, project_id: &str) -> Result<Vec<PunchlistItem>, RemoteError>;

    async fn fetch_photos(&self, item_id: &str) -> Result<Vec<Photo>, RemoteError>;

    async fn fetch_users(&self) -> Result<Vec<User>, RemoteError>;

    async fn create(
        &self,
        entity_type: EntityType,
        payload: &Value,
    ) -> Result<Option<Value>, RemoteError>;

    async fn update(
        &self,
        entity_type: EntityType,
        id: &str,
        payload: &Value,
    ) -> Result<Option<Value>, RemoteError>;

    async fn delete(&self, entity_type: EntityType, id: &str) -> Result<(), RemoteError>;
}
