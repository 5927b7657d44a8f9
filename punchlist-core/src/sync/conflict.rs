//! Conflict model and resolution policies.
//!
//! A conflict is raised when an entity that still has queued local
//! operations arrives from the server with a version newer than the one
//! last confirmed in sync. A policy decides which side wins; anything the
//! policy cannot decide is parked as `PendingManual` until a person picks a
//! side.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::models::{EntityKey, EntityType};

/// Which copy of an entity is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Local,
    Remote,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Local => write!(f, "local"),
            Side::Remote => write!(f, "remote"),
        }
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Side::Local),
            "remote" => Ok(Side::Remote),
            _ => Err(format!("Invalid side '{}'. Valid options: local, remote", s)),
        }
    }
}

/// Resolution tag reported to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Local,
    Remote,
    Manual,
}

impl From<Side> for Resolution {
    fn from(side: Side) -> Self {
        match side {
            Side::Local => Resolution::Local,
            Side::Remote => Resolution::Remote,
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Local => write!(f, "local"),
            Resolution::Remote => write!(f, "remote"),
            Resolution::Manual => write!(f, "manual"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "side", rename_all = "snake_case")]
pub enum ConflictState {
    Detected,
    Resolved(Side),
    PendingManual,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConflictError {
    #[error("Conflict for {key} is already resolved")]
    AlreadyResolved { key: EntityKey },
    #[error("Conflict for {key} is not awaiting manual resolution")]
    NotPendingManual { key: EntityKey },
}

/// Local and remote copies of an entity that both changed since the last sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub entity_type: EntityType,
    pub entity_id: String,
    /// `None` when the local change is a pending delete.
    pub local: Option<Value>,
    pub remote: Value,
    pub local_updated_at: DateTime<Utc>,
    pub remote_updated_at: DateTime<Utc>,
    pub state: ConflictState,
    pub detected_at: DateTime<Utc>,
    /// Queued operations dropped because the remote copy won.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub discarded_operations: Vec<String>,
}

impl Conflict {
    pub fn detect(
        key: &EntityKey,
        local: Option<Value>,
        remote: Value,
        local_updated_at: DateTime<Utc>,
        remote_updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            entity_type: key.entity_type,
            entity_id: key.id.clone(),
            local,
            remote,
            local_updated_at,
            remote_updated_at,
            state: ConflictState::Detected,
            detected_at: Utc::now(),
            discarded_operations: Vec::new(),
        }
    }

    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.entity_type, self.entity_id.clone())
    }

    pub fn resolution(&self) -> Resolution {
        match self.state {
            ConflictState::Resolved(side) => side.into(),
            ConflictState::Detected | ConflictState::PendingManual => Resolution::Manual,
        }
    }

    pub fn is_pending_manual(&self) -> bool {
        self.state == ConflictState::PendingManual
    }

    /// Applies a policy decision to a freshly detected conflict.
    pub fn decide(&mut self, resolution: Resolution) -> Result<(), ConflictError> {
        if self.state != ConflictState::Detected {
            return Err(ConflictError::AlreadyResolved { key: self.key() });
        }
        self.state = match resolution {
            Resolution::Local => ConflictState::Resolved(Side::Local),
            Resolution::Remote => ConflictState::Resolved(Side::Remote),
            Resolution::Manual => ConflictState::PendingManual,
        };
        Ok(())
    }

    /// Records a person's choice for a conflict parked as pending manual.
    pub fn resolve_manually(&mut self, side: Side) -> Result<(), ConflictError> {
        if self.state != ConflictState::PendingManual {
            return Err(ConflictError::NotPendingManual { key: self.key() });
        }
        self.state = ConflictState::Resolved(side);
        Ok(())
    }
}

/// Decides which side of a conflict wins.
pub trait ConflictPolicy: Send + Sync {
    fn resolve(&self, conflict: &Conflict) -> Resolution;
}

/// Newer `updatedAt` wins. Ties cannot be ordered and go to manual review.
#[derive(Debug, Clone, Copy, Default)]
pub struct LastWriteWins;

impl ConflictPolicy for LastWriteWins {
    fn resolve(&self, conflict: &Conflict) -> Resolution {
        use std::cmp::Ordering;

        match conflict.local_updated_at.cmp(&conflict.remote_updated_at) {
            Ordering::Greater => Resolution::Local,
            Ordering::Less => Resolution::Remote,
            Ordering::Equal => Resolution::Manual,
        }
    }
}

/// The server copy always wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoteWins;

impl ConflictPolicy for RemoteWins {
    fn resolve(&self, _conflict: &Conflict) -> Resolution {
        Resolution::Remote
    }
}

/// Every conflict waits for a person.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManualReview;

impl ConflictPolicy for ManualReview {
    fn resolve(&self, _conflict: &Conflict) -> Resolution {
        Resolution::Manual
    }
}

/// Configuration-friendly selector for the built-in policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicyKind {
    #[default]
    LastWriteWins,
    RemoteWins,
    Manual,
}

impl ConflictPolicyKind {
    pub fn build(self) -> Box<dyn ConflictPolicy> {
        match self {
            ConflictPolicyKind::LastWriteWins => Box::new(LastWriteWins),
            ConflictPolicyKind::RemoteWins => Box::new(RemoteWins),
            ConflictPolicyKind::Manual => Box::new(ManualReview),
        }
    }
}

impl fmt::Display for ConflictPolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictPolicyKind::LastWriteWins => write!(f, "last_write_wins"),
            ConflictPolicyKind::RemoteWins => write!(f, "remote_wins"),
            ConflictPolicyKind::Manual => write!(f, "manual"),
        }
    }
}
