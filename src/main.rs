use clap::{Parser, Subcommand};
use punchlist_core::{JsonFilePersistence, OfflineStore, Persistence};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;
mod db;
mod sync;

use commands::{
    CleanupCommand, ConfigCommand, ConflictCommand, ItemCommand, PhotoCommand, ProjectCommand,
    QueueCommand, SyncCommand,
};
use config::{Config, StorageBackend};
use db::{init_db, SqlitePersistence};
use sync::try_auto_upload;

#[derive(Parser)]
#[command(name = "punch")]
#[command(version)]
#[command(about = "Offline-first punchlist capture for construction sites", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Log sync activity to stderr (-vv for debug output)
    #[arg(long, short, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Browse projects cached on this device
    Project(ProjectCommand),

    /// Capture and edit punchlist items
    Item(ItemCommand),

    /// Attach and manage item photos
    Photo(PhotoCommand),

    /// Sync with the server
    Sync(SyncCommand),

    /// Inspect and retry queued changes
    Queue(QueueCommand),

    /// Review and resolve sync conflicts
    Conflict(ConflictCommand),

    /// Drop stale cached data
    Cleanup(CleanupCommand),

    /// Manage configuration
    Config(ConfigCommand),
}

impl Commands {
    fn queues_changes(&self) -> bool {
        match self {
            Commands::Item(cmd) => cmd.is_write(),
            Commands::Photo(cmd) => cmd.is_write(),
            Commands::Queue(cmd) => cmd.is_write(),
            Commands::Conflict(cmd) => cmd.is_write(),
            _ => false,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: u8) {
    let default_filter = match verbose {
        0 => "punch=warn,punchlist_core=warn",
        1 => "punch=info,punchlist_core=info",
        _ => "punch=debug,punchlist_core=debug",
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn open_store(config: &Config) -> Result<Arc<OfflineStore>, Box<dyn std::error::Error>> {
    let path = &config.database_path.value;
    let persistence: Arc<dyn Persistence> = match config.storage.value {
        StorageBackend::Sqlite => Arc::new(SqlitePersistence::new(init_db(path).await?)),
        StorageBackend::Json => Arc::new(JsonFilePersistence::new(path.clone())),
    };
    let photo_dir = path
        .parent()
        .map(|dir| dir.join("photos"))
        .unwrap_or_else(|| PathBuf::from("photos"));
    tracing::debug!(path = %path.display(), backend = %config.storage.value, "Opening offline store");
    let store = OfflineStore::open(persistence, config.sync.store_settings())
        .await?
        .with_photo_dir(photo_dir);
    Ok(Arc::new(store))
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load(cli.config.clone())?;

    let command = match cli.command {
        Some(Commands::Config(cmd)) => return cmd.run(&config, cli.config),
        Some(command) => command,
        None => {
            println!("Use --help to see available commands");
            return Ok(());
        }
    };

    let store = open_store(&config).await?;
    let queues_changes = command.queues_changes();

    match command {
        Commands::Project(cmd) => cmd.run(&store).await?,
        Commands::Item(cmd) => cmd.run(&store, &config).await?,
        Commands::Photo(cmd) => cmd.run(&store, &config).await?,
        Commands::Sync(cmd) => cmd.run(&config, store.clone()).await?,
        Commands::Queue(cmd) => cmd.run(&store).await?,
        Commands::Conflict(cmd) => cmd.run(&store).await?,
        Commands::Cleanup(cmd) => cmd.run(&store).await?,
        Commands::Config(_) => {}
    }

    if queues_changes {
        try_auto_upload(&config, store).await;
    }

    Ok(())
}
