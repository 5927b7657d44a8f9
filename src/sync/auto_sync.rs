//! Auto-upload after write commands.
//!
//! When `server.auto_sync` is enabled, queued changes are pushed right after
//! a command that queued them. Any failure leaves the queue for the next
//! `punch sync`; the command itself never fails because of it.

use punchlist_core::{check_server, OfflineStore, SyncError};
use std::sync::Arc;

use super::{build_engine, build_remote};
use crate::config::Config;

/// Uploads pending changes if auto-sync is enabled and the server answers.
pub async fn try_auto_upload(config: &Config, store: Arc<OfflineStore>) {
    if !config.server.auto_sync {
        return;
    }

    let remote = match build_remote(config) {
        Ok(remote) => remote,
        Err(_) => return,
    };

    if !check_server(remote.base_url()).await {
        eprintln!("Auto-sync: server unreachable, changes stay queued");
        return;
    }

    let engine = build_engine(config, store, remote);
    match engine.upload_offline_changes().await {
        Ok(result) if result.uploaded > 0 || !result.errors.is_empty() => {
            eprintln!(
                "Auto-sync: uploaded {} change(s), {} error(s)",
                result.uploaded,
                result.errors.len()
            );
        }
        Ok(_) => {}
        Err(e) => {
            if let Some(message) = failure_notice(&e) {
                eprintln!("{}", message);
            }
        }
    }
}

/// Message for a failed auto-upload. Failures the next sync may clear on
/// its own are only logged.
fn failure_notice(error: &SyncError) -> Option<String> {
    if error.is_retryable() {
        tracing::debug!(error = %error, "Auto-sync skipped");
        None
    } else {
        Some(format!("Auto-sync: {}", error))
    }
}
