//! Sync CLI commands for reconciling the offline store with the server.

use clap::{Args, Subcommand};
use punchlist_core::sync::{
    run_probe_loop, ConnectivityProbe, ProgressFn, Reachability, SyncReport, SyncStatus,
};
use punchlist_core::{
    check_server, ConnectivityMonitor, OfflineStore, PhotoStorage, SyncEngine, SyncError,
    SyncProgress, SyncResult, UploadResult,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::OutputFormat;
use crate::config::Config;
use crate::sync::{build_engine, build_remote, SyncSetupError};

/// Sync with remote server
#[derive(Debug, Args)]
pub struct SyncCommand {
    #[command(subcommand)]
    command: Option<SyncSubcommand>,

    /// Project to refresh (repeatable; defaults to every cached project)
    #[arg(long = "project", short, value_name = "PROJECT_ID")]
    projects: Vec<String>,
}

#[derive(Debug, Subcommand)]
enum SyncSubcommand {
    /// Download projects, their items and photos, and the user directory
    Download {
        /// Project IDs (defaults to every cached project)
        project_ids: Vec<String>,
    },

    /// Upload queued local changes
    Upload,

    /// Show queue, conflict and server status
    Status {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Keep probing the server and upload whenever it comes back
    Watch,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusReport<'a> {
    server: Option<&'a str>,
    reachable: bool,
    auto_sync: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    photo_storage: Option<PhotoStorage>,
    #[serde(flatten)]
    status: SyncStatus,
}

impl SyncCommand {
    pub async fn run(
        &self,
        config: &Config,
        store: Arc<OfflineStore>,
    ) -> Result<(), SyncCommandError> {
        match &self.command {
            None => self.sync(config, store, &self.projects).await,
            Some(SyncSubcommand::Download { project_ids }) => {
                self.download(config, store, project_ids).await
            }
            Some(SyncSubcommand::Upload) => self.upload(config, store).await,
            Some(SyncSubcommand::Status { format }) => self.status(config, store, format).await,
            Some(SyncSubcommand::Watch) => self.watch(config, store).await,
        }
    }

    async fn sync(
        &self,
        config: &Config,
        store: Arc<OfflineStore>,
        requested: &[String],
    ) -> Result<(), SyncCommandError> {
        let project_ids = project_ids_or_cached(&store, requested).await;
        let engine = Arc::new(build_engine(config, store, build_remote(config)?));
        let interrupt = cancel_on_ctrl_c(&engine);

        println!("Syncing with server...");
        println!();

        let mut print_progress = |progress: SyncProgress| print_progress_line(&progress);
        let callback: &mut ProgressFn<'_> = &mut print_progress;
        let report = engine.sync(&project_ids, Some(callback)).await;
        interrupt.abort();

        let report: SyncReport = report?;
        println!();
        print_upload(&report.upload);
        print_download(&report.download);
        println!();
        if report.success() {
            println!("Sync complete.");
        } else {
            println!("Sync finished with errors.");
        }
        Ok(())
    }

    async fn download(
        &self,
        config: &Config,
        store: Arc<OfflineStore>,
        requested: &[String],
    ) -> Result<(), SyncCommandError> {
        let project_ids = project_ids_or_cached(&store, requested).await;
        if project_ids.is_empty() {
            println!("No projects given or cached; downloading the user directory only.");
        }

        let engine = Arc::new(build_engine(config, store, build_remote(config)?));
        let interrupt = cancel_on_ctrl_c(&engine);

        let mut print_progress = |progress: SyncProgress| print_progress_line(&progress);
        let callback: &mut ProgressFn<'_> = &mut print_progress;
        let result = engine.download_project_data(&project_ids, Some(callback)).await;
        interrupt.abort();

        println!();
        print_download(&result?);
        Ok(())
    }

    async fn upload(
        &self,
        config: &Config,
        store: Arc<OfflineStore>,
    ) -> Result<(), SyncCommandError> {
        let engine = Arc::new(build_engine(config, store, build_remote(config)?));
        let interrupt = cancel_on_ctrl_c(&engine);

        let result = engine.upload_offline_changes().await;
        interrupt.abort();

        print_upload(&result?);
        Ok(())
    }

    async fn status(
        &self,
        config: &Config,
        store: Arc<OfflineStore>,
        format: &OutputFormat,
    ) -> Result<(), SyncCommandError> {
        let server = config.server.api_url.as_deref();
        let reachable = match server {
            Some(url) => check_server(url).await,
            None => false,
        };
        let photo_storage = store
            .photo_storage()
            .await
            .map_err(|e| SyncCommandError::RuntimeError(e.to_string()))?;
        let status = match build_remote(config) {
            Ok(remote) => build_engine(config, store, remote).status().await,
            Err(SyncSetupError::NotConfigured) => SyncStatus {
                downloading: false,
                uploading: false,
                connectivity: Reachability::Unknown,
                store: store.status().await,
            },
            Err(e) => return Err(e.into()),
        };

        let report = StatusReport {
            server,
            reachable,
            auto_sync: config.server.auto_sync,
            photo_storage,
            status,
        };

        match format {
            OutputFormat::Json => {
                let json = serde_json::to_string_pretty(&report)
                    .map_err(|e| SyncCommandError::RuntimeError(e.to_string()))?;
                println!("{}", json);
            }
            OutputFormat::Text => print_status(&report),
        }
        Ok(())
    }

    async fn watch(
        &self,
        config: &Config,
        store: Arc<OfflineStore>,
    ) -> Result<(), SyncCommandError> {
        let remote = build_remote(config)?;
        let url = remote.base_url().to_string();
        let monitor = Arc::new(ConnectivityMonitor::new());
        let probe: Arc<dyn ConnectivityProbe> = Arc::new(remote.clone());

        let engine = Arc::new(build_engine(config, store, remote).with_connectivity(monitor.clone()));
        engine.attach();
        monitor.on_change(|state| println!("Server is {}", state));

        let (stop_tx, stop_rx) = watch::channel(false);
        let probe_task = tokio::spawn(run_probe_loop(
            probe,
            monitor,
            config.server.probe_interval(),
            stop_rx,
        ));

        println!("Watching {} (Ctrl-C to stop)...", url);
        tokio::signal::ctrl_c()
            .await
            .map_err(|e| SyncCommandError::RuntimeError(e.to_string()))?;

        engine.cancel();
        let _ = stop_tx.send(true);
        let _ = probe_task.await;
        println!("Stopped watching.");
        Ok(())
    }
}

async fn project_ids_or_cached(store: &OfflineStore, requested: &[String]) -> Vec<String> {
    if !requested.is_empty() {
        return requested.to_vec();
    }
    store.projects().await.into_iter().map(|p| p.id).collect()
}

/// Cancels running passes on Ctrl-C. Abort the handle once the pass ends.
fn cancel_on_ctrl_c(engine: &Arc<SyncEngine>) -> JoinHandle<()> {
    let engine = engine.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Cancelling...");
            engine.cancel();
        }
    })
}

fn print_progress_line(progress: &SyncProgress) {
    println!(
        "  [{}/{}] {}: {}",
        progress.current, progress.total, progress.stage, progress.message
    );
}

fn print_upload(result: &UploadResult) {
    let mark = if result.success { "✓" } else { "✗" };
    println!("  {} uploaded {} change(s)", mark, result.uploaded);
    if result.deferred > 0 {
        println!("    {} change(s) waiting for retry backoff", result.deferred);
    }
    for failed in &result.failed {
        println!(
            "    gave up on {} {} {}: {}",
            failed.operation.kind,
            failed.operation.entity_type,
            failed.operation.entity_id,
            failed.error
        );
    }
    for error in &result.errors {
        println!("    {}", error);
    }
    if result.cancelled {
        println!("    upload cancelled");
    }
}

fn print_download(result: &SyncResult) {
    let mark = if result.success { "✓" } else { "✗" };
    println!(
        "  {} downloaded {} project(s), {} item(s), {} photo(s), {} user(s)",
        mark,
        result.projects_downloaded,
        result.punchlist_items_downloaded,
        result.photos_downloaded,
        result.users_downloaded
    );
    for conflict in &result.conflicts {
        println!(
            "    conflict on {} {}: {}",
            conflict.entity_type,
            conflict.entity_id,
            conflict.resolution()
        );
    }
    for error in &result.errors {
        println!("    {}", error);
    }
    if result.cancelled {
        println!("    download cancelled");
    }
}

fn print_status(report: &StatusReport<'_>) {
    println!("Sync Status");
    println!("===========");
    println!();

    match report.server {
        Some(url) => {
            println!("Server:    {}", url);
            println!(
                "Reachable: {}",
                if report.reachable { "✓ yes" } else { "✗ no" }
            );
        }
        None => println!("Server:    not configured"),
    }
    println!(
        "Auto-sync: {}",
        if report.auto_sync {
            "enabled"
        } else {
            "disabled"
        }
    );
    println!();

    let store = &report.status.store;
    println!("Pending changes:      {}", store.pending_operations);
    println!("Failed changes:       {}", store.failed_operations);
    println!("Unresolved conflicts: {}", store.unresolved_conflicts);
    match store.last_sync_time {
        Some(at) => println!("Last sync:            {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("Last sync:            never"),
    }
    if let Some(storage) = &report.photo_storage {
        println!(
            "Captured photos:      {} file(s), {}",
            storage.files,
            format_bytes(storage.bytes)
        );
    }
}

fn format_bytes(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    let value = bytes as f64;
    if value < KIB {
        format!("{} B", bytes)
    } else if value < KIB * KIB {
        format!("{:.1} KiB", value / KIB)
    } else {
        format!("{:.1} MiB", value / (KIB * KIB))
    }
}

/// Errors from sync commands
#[derive(Debug)]
pub enum SyncCommandError {
    Setup(SyncSetupError),
    SyncError(SyncError),
    RuntimeError(String),
}

impl std::fmt::Display for SyncCommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncCommandError::Setup(e) => write!(f, "{}", e),
            SyncCommandError::SyncError(e) => write!(f, "{}", e),
            SyncCommandError::RuntimeError(e) => write!(f, "Runtime error: {}", e),
        }
    }
}

impl std::error::Error for SyncCommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SyncCommandError::Setup(e) => Some(e),
            SyncCommandError::SyncError(e) => Some(e),
            SyncCommandError::RuntimeError(_) => None,
        }
    }
}

impl From<SyncSetupError> for SyncCommandError {
    fn from(e: SyncSetupError) -> Self {
        SyncCommandError::Setup(e)
    }
}

impl From<SyncError> for SyncCommandError {
    fn from(e: SyncError) -> Self {
        SyncCommandError::SyncError(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use punchlist_core::StoreSettings;
    use tempfile::tempdir;

    fn unconfigured() -> Config {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("config.yaml");
        std::fs::write(&path, "created_by: tester\n").unwrap();
        let mut config = Config::load(Some(path)).unwrap();
        config.server.api_url = None;
        config
    }

    #[tokio::test]
    async fn test_upload_without_server_is_setup_error() {
        let store = Arc::new(OfflineStore::in_memory(StoreSettings::default()));
        let cmd = SyncCommand {
            command: Some(SyncSubcommand::Upload),
            projects: Vec::new(),
        };

        let err = cmd.run(&unconfigured(), store).await.unwrap_err();
        assert!(matches!(
            err,
            SyncCommandError::Setup(SyncSetupError::NotConfigured)
        ));
    }

    #[tokio::test]
    async fn test_status_works_offline() {
        let store = Arc::new(OfflineStore::in_memory(StoreSettings::default()));
        let cmd = SyncCommand {
            command: Some(SyncSubcommand::Status {
                format: OutputFormat::Json,
            }),
            projects: Vec::new(),
        };

        cmd.run(&unconfigured(), store).await.unwrap();
    }

    #[tokio::test]
    async fn test_status_reports_captured_photo_storage() {
        let temp_dir = tempdir().unwrap();
        let store = Arc::new(
            OfflineStore::in_memory(StoreSettings::default())
                .with_photo_dir(temp_dir.path().join("photos")),
        );
        let cmd = SyncCommand {
            command: Some(SyncSubcommand::Status {
                format: OutputFormat::Text,
            }),
            projects: Vec::new(),
        };

        cmd.run(&unconfigured(), store).await.unwrap();
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KiB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MiB");
    }

    #[tokio::test]
    async fn test_requested_projects_take_precedence() {
        let store = OfflineStore::in_memory(StoreSettings::default());
        let requested = vec!["p9".to_string()];

        assert_eq!(project_ids_or_cached(&store, &requested).await, requested);
        assert!(project_ids_or_cached(&store, &[]).await.is_empty());
    }
}
