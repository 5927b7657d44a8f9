//! Sync error taxonomy.

use crate::models::EntityType;
use crate::offline::StoreError;

/// Failures of a sync pass.
///
/// Per-item failures are collected as messages in the pass result; only
/// [`SyncError::SyncAlreadyInProgress`] and store failures reject a call.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),
    #[error("Server rejected {entity_type} {id}: {message}")]
    RemoteRejected {
        entity_type: EntityType,
        id: String,
        message: String,
    },
    #[error("Giving up on {entity_type} {id} after exhausting retries")]
    RetryExhausted { entity_type: EntityType, id: String },
    #[error("Unresolved conflict on {entity_type} {id}")]
    ConflictUnresolved { entity_type: EntityType, id: String },
    #[error("Sync already in progress")]
    SyncAlreadyInProgress,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SyncError {
    /// True for errors a later pass may clear without user action.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::NetworkUnavailable(_)
                | SyncError::RemoteRejected { .. }
                | SyncError::SyncAlreadyInProgress
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_entity() {
        let err = SyncError::RetryExhausted {
            entity_type: EntityType::PunchlistItem,
            id: "i1".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Giving up on punchlist_item i1 after exhausting retries"
        );
        assert!(!err.is_retryable());
        assert!(SyncError::NetworkUnavailable("offline".to_string()).is_retryable());
    }
}
