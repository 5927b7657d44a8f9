use clap::{Args, Subcommand};
use punchlist_core::{EntityKey, EntityType, OfflineStore, Side};

use super::OutputFormat;

#[derive(Args)]
pub struct ConflictCommand {
    #[command(subcommand)]
    pub command: ConflictSubcommand,
}

#[derive(Subcommand)]
pub enum ConflictSubcommand {
    /// List conflicts waiting for a decision
    List {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Keep one side of a conflict
    Resolve {
        /// Entity type: project, punchlist_item, photo, user
        entity_type: String,

        /// Entity ID
        id: String,

        /// Which copy to keep: local or remote
        #[arg(long)]
        keep: String,
    },
}

impl ConflictCommand {
    pub fn is_write(&self) -> bool {
        matches!(self.command, ConflictSubcommand::Resolve { .. })
    }

    pub async fn run(&self, store: &OfflineStore) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            ConflictSubcommand::List { format } => {
                let conflicts = store.conflicts().await;

                if conflicts.is_empty() {
                    println!("No unresolved conflicts");
                    return Ok(());
                }

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&conflicts)?);
                    }
                    OutputFormat::Text => {
                        println!(
                            "{:<14}  {:<36}  {:<20}  REMOTE UPDATED",
                            "TYPE", "ID", "LOCAL UPDATED"
                        );
                        println!("{}", "-".repeat(96));
                        for conflict in &conflicts {
                            println!(
                                "{:<14}  {:<36}  {:<20}  {}",
                                conflict.entity_type.to_string(),
                                conflict.entity_id,
                                conflict.local_updated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                                conflict.remote_updated_at.format("%Y-%m-%d %H:%M:%S")
                            );
                        }
                        println!("\nTotal: {} conflict(s)", conflicts.len());
                    }
                }
                Ok(())
            }

            ConflictSubcommand::Resolve {
                entity_type,
                id,
                keep,
            } => {
                let key = EntityKey::new(entity_type.parse::<EntityType>()?, id.clone());
                let side = keep.parse::<Side>()?;

                store.resolve_conflict(&key, side).await?;
                println!("Resolved {}: kept {} copy", key, side);
                Ok(())
            }
        }
    }
}
