use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use crate::models::{EntityKey, EntityType};

/// Default retry ceiling for queued operations.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Create => write!(f, "CREATE"),
            OperationKind::Update => write!(f, "UPDATE"),
            OperationKind::Delete => write!(f, "DELETE"),
        }
    }
}

/// A local mutation waiting to be uploaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub id: String,
    pub kind: OperationKind,
    pub entity_type: EntityType,
    pub entity_id: String,
    /// Full entity for CREATE, patch for UPDATE, `{id}` for DELETE.
    pub payload: Value,
    pub enqueued_at: DateTime<Utc>,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Earliest time the next attempt may run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_before: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Set while an upload pass is sending this operation. Never persisted,
    /// so a crash mid-upload leaves the operation claimable again.
    #[serde(skip)]
    pub in_flight: bool,
}

impl Operation {
    pub fn new(
        kind: OperationKind,
        entity_type: EntityType,
        entity_id: impl Into<String>,
        payload: Value,
        max_retries: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            entity_type,
            entity_id: entity_id.into(),
            payload,
            enqueued_at: Utc::now(),
            retry_count: 0,
            max_retries,
            not_before: None,
            last_error: None,
            in_flight: false,
        }
    }

    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.entity_type, self.entity_id.clone())
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.not_before.map_or(true, |at| at <= now)
    }

    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} (retries {}/{})",
            self.kind, self.entity_type, self.entity_id, self.retry_count, self.max_retries
        )
    }
}

/// An operation that exhausted its retry budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedOperation {
    pub operation: Operation,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}
