//! Punchlist Core Library
//!
//! Offline-first data layer for punchlist field capture: entity models, the
//! local cache and operation queue, and the sync engine that reconciles
//! them with the server.

pub mod models;
pub mod offline;
pub mod sync;

pub use models::{
    EntityKey, EntityType, ItemStatus, NewPhoto, NewPunchlistItem, Note, Photo, PhotoPatch,
    Priority, Project, ProjectStatus, PunchlistItem, PunchlistItemPatch, Trade, User, UserRole,
};
pub use offline::{
    CleanupReport, FailedOperation, JsonFilePersistence, MemoryPersistence, OfflineStore,
    Operation, OperationKind, Persistence, PersistenceError, PhotoStorage, StoreError,
    StoreSettings, StoreSnapshot, StoreStatus,
};
pub use sync::{
    check_server, Conflict, ConflictPolicyKind, ConnectivityMonitor, HttpRemote, RemoteApi,
    RemoteError, RetryPolicy, Side, SyncEngine, SyncError, SyncProgress, SyncResult, SyncStage,
    UploadResult,
};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
