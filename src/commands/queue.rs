use clap::{Args, Subcommand};
use punchlist_core::{OfflineStore, Operation};

use super::OutputFormat;

#[derive(Args)]
pub struct QueueCommand {
    #[command(subcommand)]
    pub command: QueueSubcommand,
}

#[derive(Subcommand)]
pub enum QueueSubcommand {
    /// Show changes waiting to be uploaded
    List {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Show changes that gave up after exhausting their retries
    Failed {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Put failed changes back on the upload queue
    Retry {
        /// Operation ID
        #[arg(required_unless_present = "all")]
        id: Option<String>,

        /// Retry every failed change
        #[arg(long, conflicts_with = "id")]
        all: bool,
    },
}

impl QueueCommand {
    pub fn is_write(&self) -> bool {
        matches!(self.command, QueueSubcommand::Retry { .. })
    }

    pub async fn run(&self, store: &OfflineStore) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            QueueSubcommand::List { format } => {
                let pending = store.pending_operations().await;

                if pending.is_empty() {
                    println!("No pending changes");
                    return Ok(());
                }

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&pending)?);
                    }
                    OutputFormat::Text => {
                        print_header();
                        for op in &pending {
                            print_operation(op, op.last_error.as_deref().unwrap_or(""));
                        }
                        println!("\nTotal: {} pending change(s)", pending.len());
                    }
                }
                Ok(())
            }

            QueueSubcommand::Failed { format } => {
                let failed = store.failed_operations().await;

                if failed.is_empty() {
                    println!("No failed changes");
                    return Ok(());
                }

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&failed)?);
                    }
                    OutputFormat::Text => {
                        print_header();
                        for entry in &failed {
                            print_operation(&entry.operation, &entry.error);
                        }
                        println!("\nTotal: {} failed change(s)", failed.len());
                    }
                }
                Ok(())
            }

            QueueSubcommand::Retry { id, all } => {
                let ids: Vec<String> = if *all {
                    store
                        .failed_operations()
                        .await
                        .into_iter()
                        .map(|f| f.operation.id)
                        .collect()
                } else {
                    id.iter().cloned().collect()
                };

                if ids.is_empty() {
                    println!("No failed changes");
                    return Ok(());
                }

                for op_id in &ids {
                    let op = store.requeue_failed(op_id).await?;
                    println!("Requeued {} {} {}", op.kind, op.entity_type, op.entity_id);
                }
                Ok(())
            }
        }
    }
}

fn print_header() {
    println!(
        "{:<36}  {:<6}  {:<14}  {:<36}  {:<5}  ERROR",
        "OPERATION", "KIND", "TYPE", "ENTITY", "TRIES"
    );
    println!("{}", "-".repeat(120));
}

fn print_operation(op: &Operation, error: &str) {
    println!(
        "{:<36}  {:<6}  {:<14}  {:<36}  {:<5}  {}",
        op.id,
        op.kind.to_string(),
        op.entity_type.to_string(),
        op.entity_id,
        format!("{}/{}", op.retry_count, op.max_retries),
        error
    );
}
