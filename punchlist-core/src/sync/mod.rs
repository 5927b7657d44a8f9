//! Synchronization between the offline store and the server.
//!
//! [`SyncEngine`] runs download passes (server to cache) and upload passes
//! (operation queue to server). [`RemoteApi`] is the seam to the server,
//! implemented over REST by [`HttpRemote`].

mod conflict;
mod connectivity;
mod engine;
mod error;
mod http;
mod progress;
mod remote;
mod retry;

pub use conflict::{
    Conflict, ConflictError, ConflictPolicy, ConflictPolicyKind, ConflictState, LastWriteWins,
    ManualReview, RemoteWins, Resolution, Side,
};
pub use connectivity::{run_probe_loop, ConnectivityMonitor, ConnectivityProbe, Reachability};
pub use engine::{SyncEngine, SyncReport, SyncResult, SyncStatus, UploadResult};
pub use error::SyncError;
pub use http::{check_server, HttpRemote};
pub use progress::{ProgressFn, SyncProgress, SyncStage};
pub use remote::{RemoteApi, RemoteError};
pub use retry::RetryPolicy;
