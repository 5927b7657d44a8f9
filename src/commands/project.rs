use clap::{Args, Subcommand};
use punchlist_core::OfflineStore;

use super::{truncate, OutputFormat};

#[derive(Args)]
pub struct ProjectCommand {
    #[command(subcommand)]
    pub command: ProjectSubcommand,
}

#[derive(Subcommand)]
pub enum ProjectSubcommand {
    /// List projects downloaded to this device
    List {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Show a cached project
    Show {
        /// Project ID
        id: String,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

impl ProjectCommand {
    pub async fn run(&self, store: &OfflineStore) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            ProjectSubcommand::List { format } => {
                let projects = store.projects().await;

                if projects.is_empty() {
                    println!("No projects cached. Run `punch sync download <PROJECT_ID>` first.");
                    return Ok(());
                }

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&projects)?);
                    }
                    OutputFormat::Text => {
                        println!("{:<36}  {:<30}  {:<12}  CLIENT", "ID", "NAME", "STATUS");
                        println!("{}", "-".repeat(100));
                        for project in &projects {
                            println!(
                                "{:<36}  {:<30}  {:<12}  {}",
                                project.id,
                                truncate(&project.name, 30),
                                project.status.to_string(),
                                project.client_name
                            );
                        }
                        println!("\nTotal: {} project(s)", projects.len());
                    }
                }
                Ok(())
            }

            ProjectSubcommand::Show { id, format } => {
                let project = store
                    .project(id)
                    .await
                    .ok_or_else(|| format!("Project not found: {}", id))?;

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&project)?);
                    }
                    OutputFormat::Text => {
                        print!("{}", project);
                        println!("Items: {}", store.punchlist_items(&project.id).await.len());
                    }
                }
                Ok(())
            }
        }
    }
}
