//! Wiring between the CLI configuration and the core sync engine.

mod auto_sync;

pub use auto_sync::try_auto_upload;

use punchlist_core::{HttpRemote, OfflineStore, RemoteError, SyncEngine};
use std::sync::Arc;

use crate::config::Config;

/// Builds the HTTP client for the configured server.
pub fn build_remote(config: &Config) -> Result<HttpRemote, SyncSetupError> {
    let url = config
        .server
        .api_url
        .as_deref()
        .ok_or(SyncSetupError::NotConfigured)?;
    Ok(HttpRemote::with_options(
        url,
        config.server.api_token.clone(),
        config.server.timeout(),
    )?)
}

/// Builds a sync engine over `store` using the configured server and
/// conflict/retry policies.
pub fn build_engine(
    config: &Config,
    store: Arc<OfflineStore>,
    remote: HttpRemote,
) -> SyncEngine {
    SyncEngine::new(store, Arc::new(remote))
        .with_policy(config.sync.conflict_policy.build())
        .with_retry_policy(config.sync.retry_policy())
}

#[derive(Debug)]
pub enum SyncSetupError {
    NotConfigured,
    Remote(RemoteError),
}

impl std::fmt::Display for SyncSetupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncSetupError::NotConfigured => write!(
                f,
                "Sync is not configured. Set server.api_url in the config file or PUNCH_API_URL."
            ),
            SyncSetupError::Remote(e) => write!(f, "Failed to create HTTP client: {}", e),
        }
    }
}

impl std::error::Error for SyncSetupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SyncSetupError::NotConfigured => None,
            SyncSetupError::Remote(e) => Some(e),
        }
    }
}

impl From<RemoteError> for SyncSetupError {
    fn from(e: RemoteError) -> Self {
        SyncSetupError::Remote(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_build_remote_requires_url() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("config.yaml");
        std::fs::write(&path, "created_by: tester\n").unwrap();
        let mut config = Config::load(Some(path)).unwrap();
        config.server.api_url = None;

        assert!(matches!(
            build_remote(&config),
            Err(SyncSetupError::NotConfigured)
        ));
    }

    #[test]
    fn test_build_remote_trims_trailing_slash() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("config.yaml");
        std::fs::write(&path, "server:\n  api_url: http://localhost:3001/\n").unwrap();
        let config = Config::load(Some(path)).unwrap();

        let remote = build_remote(&config).unwrap();
        assert_eq!(remote.base_url(), "http://localhost:3001");
    }
}
