use clap::{Args, Subcommand};
use std::path::{Path, PathBuf};

use super::OutputFormat;
use crate::config::Config;

const CONFIG_TEMPLATE: &str = "\
# Punchlist CLI configuration
# database_path: /path/to/punch.db
created_by: default
storage: sqlite

server:
  # api_url: http://localhost:3001
  # api_token: secret
  timeout_secs: 30
  auto_sync: false
  probe_interval_secs: 15

sync:
  max_retries: 3
  coalesce_updates: true
  conflict_policy: last_write_wins
  backoff_base_ms: 2000
  backoff_max_ms: 300000
";

#[derive(Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub command: ConfigSubcommand,
}

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Show current configuration values
    Show {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Write a starter config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

impl ConfigCommand {
    pub fn run(
        &self,
        config: &Config,
        config_path: Option<PathBuf>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            ConfigSubcommand::Show { format } => {
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(config)?);
                    }
                    OutputFormat::Text => print_config(config),
                }
                Ok(())
            }
            ConfigSubcommand::Init { force } => {
                let path = config_path.unwrap_or_else(Config::default_config_path);
                write_template(&path, *force)?;
                println!("Wrote {}", path.display());
                Ok(())
            }
        }
    }
}

fn print_config(config: &Config) {
    println!("Configuration");
    println!("=============\n");

    if let Some(path) = &config.config_file {
        println!("Config file: {}", path.display());
    } else {
        println!(
            "Config file: {} (not found)",
            Config::default_config_path().display()
        );
    }
    println!();

    println!("database_path: {}", config.database_path.value.display());
    println!("  source: {}", config.database_path.source);
    println!();

    println!("created_by: {}", config.created_by.value);
    println!("  source: {}", config.created_by.source);
    println!();

    println!("storage: {}", config.storage.value);
    println!("  source: {}", config.storage.source);
    println!();

    println!("server:");
    println!(
        "  api_url: {}",
        config.server.api_url.as_deref().unwrap_or("(not set)")
    );
    println!(
        "  api_token: {}",
        if config.server.api_token.is_some() {
            "(set)"
        } else {
            "(not set)"
        }
    );
    println!("  timeout_secs: {}", config.server.timeout_secs);
    println!("  auto_sync: {}", config.server.auto_sync);
    println!(
        "  probe_interval_secs: {}",
        config.server.probe_interval_secs
    );
    println!();

    println!("sync:");
    println!("  max_retries: {}", config.sync.max_retries);
    println!("  coalesce_updates: {}", config.sync.coalesce_updates);
    println!("  conflict_policy: {}", config.sync.conflict_policy);
    println!("  backoff_base_ms: {}", config.sync.backoff_base_ms);
    println!("  backoff_max_ms: {}", config.sync.backoff_max_ms);
}

fn write_template(path: &Path, force: bool) -> Result<(), std::io::Error> {
    if path.exists() && !force {
        return Err(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!(
                "{} already exists (use --force to overwrite)",
                path.display()
            ),
        ));
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, CONFIG_TEMPLATE)
}
