//! Ordered log of pending local mutations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;

use super::operation::{FailedOperation, Operation, OperationKind};
use crate::models::EntityKey;

/// What happened to an operation handed to [`OperationQueue::enqueue_coalescing`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Appended at the tail under its own id.
    Appended(String),
    /// Merged into the existing queued UPDATE with this id.
    Coalesced(String),
}

impl EnqueueOutcome {
    pub fn operation_id(&self) -> &str {
        match self {
            EnqueueOutcome::Appended(id) | EnqueueOutcome::Coalesced(id) => id,
        }
    }
}

/// Result of recording a failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome {
    /// Still queued with the new retry count.
    Retrying { retry_count: u32 },
    /// Removed from the queue; will not be retried automatically.
    Exhausted(FailedOperation),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueueError {
    #[error("Operation not found in queue: {0}")]
    NotFound(String),
}

/// FIFO of operations. Per-entity order is the enqueue order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationQueue {
    operations: VecDeque<Operation>,
}

impl OperationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Operation> {
        self.operations.iter()
    }

    pub fn get(&self, id: &str) -> Option<&Operation> {
        self.operations.iter().find(|op| op.id == id)
    }

    /// Appends an operation at the tail.
    pub fn enqueue(&mut self, op: Operation) -> String {
        let id = op.id.clone();
        self.operations.push_back(op);
        id
    }

    /// Appends, unless both the new operation and the latest queued operation
    /// for the same entity are UPDATEs. In that case the new patch is merged
    /// into the queued one field by field and the queued entry keeps its
    /// position, id and retry state. An UPDATE already being sent is never
    /// merged into.
    pub fn enqueue_coalescing(&mut self, op: Operation) -> EnqueueOutcome {
        if op.kind == OperationKind::Update {
            let key = op.key();
            if let Some(existing) = self.operations.iter_mut().rev().find(|o| o.key() == key) {
                if existing.kind == OperationKind::Update && !existing.in_flight {
                    merge_patch(&mut existing.payload, op.payload);
                    return EnqueueOutcome::Coalesced(existing.id.clone());
                }
            }
        }
        EnqueueOutcome::Appended(self.enqueue(op))
    }

    /// Puts an operation back ahead of any later operation for the same
    /// entity, so a re-queued CREATE still precedes the UPDATEs behind it.
    pub fn reinsert(&mut self, op: Operation) -> String {
        let id = op.id.clone();
        let key = op.key();
        match self.operations.iter().position(|o| o.key() == key) {
            Some(index) => self.operations.insert(index, op),
            None => self.operations.push_back(op),
        }
        id
    }

    /// Marks an operation as being sent and returns its current copy, or
    /// `None` if it already left the queue.
    pub fn claim(&mut self, id: &str) -> Option<Operation> {
        let op = self.operations.iter_mut().find(|op| op.id == id)?;
        op.in_flight = true;
        Some(op.clone())
    }

    /// Clears the in-flight mark of an operation that was not sent.
    pub fn release(&mut self, id: &str) {
        if let Some(op) = self.operations.iter_mut().find(|op| op.id == id) {
            op.in_flight = false;
        }
    }

    pub fn has_in_flight(&self, key: &EntityKey) -> bool {
        self.operations
            .iter()
            .any(|op| op.in_flight && &op.key() == key)
    }

    /// Removes every operation whose id is in `ids`. Returns how many were removed.
    pub fn dequeue_succeeded(&mut self, ids: &[String]) -> usize {
        let before = self.operations.len();
        self.operations.retain(|op| !ids.contains(&op.id));
        before - self.operations.len()
    }

    /// Records a failed attempt.
    ///
    /// An operation whose retry count already reached its ceiling is removed
    /// and returned as exhausted instead of being incremented.
    pub fn increment_retry(
        &mut self,
        id: &str,
        error: &str,
        next_attempt: Option<DateTime<Utc>>,
    ) -> Result<RetryOutcome, QueueError> {
        let index = self
            .operations
            .iter()
            .position(|op| op.id == id)
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;

        if self.operations[index].retries_exhausted() {
            let mut operation = self
                .operations
                .remove(index)
                .ok_or_else(|| QueueError::NotFound(id.to_string()))?;
            operation.last_error = Some(error.to_string());
            operation.not_before = None;
            operation.in_flight = false;
            return Ok(RetryOutcome::Exhausted(FailedOperation {
                operation,
                error: error.to_string(),
                failed_at: Utc::now(),
            }));
        }

        let op = &mut self.operations[index];
        op.retry_count += 1;
        op.last_error = Some(error.to_string());
        op.not_before = next_attempt;
        op.in_flight = false;
        Ok(RetryOutcome::Retrying {
            retry_count: op.retry_count,
        })
    }

    pub fn has_pending(&self, key: &EntityKey) -> bool {
        self.operations.iter().any(|op| &op.key() == key)
    }

    /// Removes and returns all operations for an entity, in queue order.
    pub fn remove_for_entity(&mut self, key: &EntityKey) -> Vec<Operation> {
        let (removed, kept): (VecDeque<Operation>, VecDeque<Operation>) = self
            .operations
            .drain(..)
            .partition(|op| &op.key() == key);
        self.operations = kept;
        removed.into_iter().collect()
    }

    /// Timestamp of the newest queued mutation for an entity.
    pub fn latest_enqueued_at(&self, key: &EntityKey) -> Option<DateTime<Utc>> {
        self.operations
            .iter()
            .filter(|op| &op.key() == key)
            .map(|op| op.enqueued_at)
            .max()
    }
}

/// Shallow JSON merge: keys of `patch` overwrite keys of `target`.
pub(crate) fn merge_patch(target: &mut Value, patch: Value) {
    match (target.as_object_mut(), patch) {
        (Some(target), Value::Object(patch)) => {
            for (k, v) in patch {
                target.insert(k, v);
            }
        }
        (_, patch) => *target = patch,
    }
}
