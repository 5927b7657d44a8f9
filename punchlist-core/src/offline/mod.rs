//! Local state kept while the device is offline.

mod cache;
mod operation;
mod persistence;
mod photo_files;
mod queue;
mod store;

pub use cache::{Cached, CleanupReport, LocalCache};
pub use operation::{FailedOperation, Operation, OperationKind, DEFAULT_MAX_RETRIES};
pub use persistence::{
    JsonFilePersistence, MemoryPersistence, Persistence, PersistenceError, StoreSnapshot,
};
pub use photo_files::{file_uri, PhotoFileError, PhotoFiles, PhotoStorage};
pub use queue::{EnqueueOutcome, OperationQueue, QueueError, RetryOutcome};
pub use store::{ApplyOutcome, Claim, OfflineStore, StoreError, StoreSettings, StoreStatus};

#[cfg(test)]
pub(crate) use cache::fixtures;
