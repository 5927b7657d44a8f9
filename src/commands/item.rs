use clap::{Args, Subcommand};
use punchlist_core::{
    ItemStatus, NewPunchlistItem, OfflineStore, Priority, PunchlistItem, PunchlistItemPatch, Trade,
};

use super::{confirm, parse_date, truncate, OutputFormat};
use crate::config::Config;

#[derive(Args)]
pub struct ItemCommand {
    #[command(subcommand)]
    pub command: ItemSubcommand,
}

#[derive(Subcommand)]
pub enum ItemSubcommand {
    /// Capture a new punchlist item
    Create {
        /// Project ID the item belongs to
        #[arg(long, short)]
        project: String,

        /// Short title
        title: String,

        /// Longer description of the defect
        #[arg(long, default_value = "")]
        description: String,

        /// Where on site the item is
        #[arg(long, default_value = "")]
        location: String,

        /// Trade: electrical, plumbing, hvac, structural, finishes, landscaping, general
        #[arg(long, default_value = "general")]
        trade: String,

        /// Priority: low, medium, high, critical
        #[arg(long, default_value = "medium")]
        priority: String,

        /// User ID to assign
        #[arg(long)]
        assign: Option<String>,

        /// Due date (YYYY-MM-DD)
        #[arg(long)]
        due: Option<String>,
    },

    /// List cached items for a project
    List {
        /// Project ID
        #[arg(long, short)]
        project: String,

        /// Only show items with this status
        #[arg(long)]
        status: Option<String>,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Show an item's details
    Show {
        /// Item ID
        id: String,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Update an existing item
    Update {
        /// Item ID
        id: String,

        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        description: Option<String>,

        #[arg(long)]
        location: Option<String>,

        #[arg(long)]
        trade: Option<String>,

        #[arg(long)]
        priority: Option<String>,

        /// Status: open, in_progress, completed, verified, rejected
        #[arg(long)]
        status: Option<String>,

        /// User ID to assign
        #[arg(long)]
        assign: Option<String>,

        /// Due date (YYYY-MM-DD)
        #[arg(long)]
        due: Option<String>,
    },

    /// Delete an item and its photos
    Delete {
        /// Item ID
        id: String,

        /// Skip confirmation prompt
        #[arg(long, short)]
        force: bool,
    },
}

impl ItemCommand {
    /// Whether the command queues changes for upload.
    pub fn is_write(&self) -> bool {
        !matches!(
            self.command,
            ItemSubcommand::List { .. } | ItemSubcommand::Show { .. }
        )
    }

    pub async fn run(
        &self,
        store: &OfflineStore,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            ItemSubcommand::Create {
                project,
                title,
                description,
                location,
                trade,
                priority,
                assign,
                due,
            } => {
                if title.trim().is_empty() {
                    return Err("Item title cannot be empty".into());
                }

                let draft = NewPunchlistItem {
                    project_id: project.clone(),
                    title: title.trim().to_string(),
                    description: description.clone(),
                    location: location.clone(),
                    trade: trade.parse::<Trade>()?,
                    priority: priority.parse::<Priority>()?,
                    assigned_to: assign.clone(),
                    due_date: due.as_deref().map(parse_date).transpose()?,
                    created_by: config.created_by.value.clone(),
                };

                let item = store.create_punchlist_item(draft).await?;
                println!("Created item: {} ({})", item.title, item.id);
                Ok(())
            }

            ItemSubcommand::List {
                project,
                status,
                format,
            } => {
                let status = status.as_deref().map(str::parse::<ItemStatus>).transpose()?;
                let items: Vec<PunchlistItem> = store
                    .punchlist_items(project)
                    .await
                    .into_iter()
                    .filter(|item| status.map_or(true, |s| item.status == s))
                    .collect();

                if items.is_empty() {
                    println!("No items found");
                    return Ok(());
                }

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&items)?);
                    }
                    OutputFormat::Text => print_items(&items),
                }
                Ok(())
            }

            ItemSubcommand::Show { id, format } => {
                let item = store
                    .punchlist_item(id)
                    .await
                    .ok_or_else(|| format!("Item not found: {}", id))?;

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&item)?);
                    }
                    OutputFormat::Text => {
                        print!("{}", item);
                        let photos = store.photos(&item.id).await;
                        if !photos.is_empty() {
                            println!("\nPhotos: {}", photos.len());
                        }
                    }
                }
                Ok(())
            }

            ItemSubcommand::Update {
                id,
                title,
                description,
                location,
                trade,
                priority,
                status,
                assign,
                due,
            } => {
                let patch = PunchlistItemPatch {
                    title: title.clone(),
                    description: description.clone(),
                    location: location.clone(),
                    trade: trade.as_deref().map(str::parse::<Trade>).transpose()?,
                    priority: priority.as_deref().map(str::parse::<Priority>).transpose()?,
                    status: status.as_deref().map(str::parse::<ItemStatus>).transpose()?,
                    assigned_to: assign.clone(),
                    due_date: due.as_deref().map(parse_date).transpose()?,
                };

                if patch.is_empty() {
                    return Err("No updates specified. Use --help to see available options.".into());
                }

                let item = store.update_punchlist_item(id, patch).await?;
                println!("Updated item: {} ({})", item.title, item.id);
                Ok(())
            }

            ItemSubcommand::Delete { id, force } => {
                let item = store
                    .punchlist_item(id)
                    .await
                    .ok_or_else(|| format!("Item not found: {}", id))?;

                if !force && !confirm(&format!("Delete item '{}'?", item.title))? {
                    println!("Deletion cancelled.");
                    return Ok(());
                }

                store.delete_punchlist_item(&item.id).await?;
                println!("Deleted item: {}", item.title);
                Ok(())
            }
        }
    }
}

fn print_items(items: &[PunchlistItem]) {
    println!(
        "{:<36}  {:<30}  {:<12}  {:<8}  STATUS",
        "ID", "TITLE", "TRADE", "PRIORITY"
    );
    println!("{}", "-".repeat(104));
    for item in items {
        println!(
            "{:<36}  {:<30}  {:<12}  {:<8}  {}",
            item.id,
            truncate(&item.title, 30),
            item.trade.to_string(),
            item.priority.to_string(),
            item.status
        );
    }
    println!("\nTotal: {} item(s)", items.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use clap::Parser;
    use punchlist_core::StoreSettings;

    #[derive(Parser)]
    struct TestCli {
        #[command(subcommand)]
        command: ItemSubcommand,
    }

    fn command(args: &[&str]) -> ItemCommand {
        let mut argv = vec!["punch"];
        argv.extend_from_slice(args);
        ItemCommand {
            command: TestCli::parse_from(argv).command,
        }
    }

    fn test_config() -> Config {
        let temp_dir = tempfile::tempdir().unwrap();
        Config::load(Some(temp_dir.path().join("missing.yaml"))).unwrap()
    }

    #[tokio::test]
    async fn test_create_then_update_queues_operations() {
        let store = OfflineStore::in_memory(StoreSettings::default());
        let config = test_config();

        let create = command(&[
            "create",
            "--project",
            "p1",
            "Missing outlet cover",
            "--trade",
            "electrical",
            "--due",
            "2024-05-01",
        ]);
        assert!(create.is_write());
        create.run(&store, &config).await.unwrap();

        let items = store.punchlist_items("p1").await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].trade, Trade::Electrical);

        let update = command(&["update", items[0].id.as_str(), "--status", "in-progress"]);
        update.run(&store, &config).await.unwrap();

        let item = store.punchlist_item(&items[0].id).await.unwrap();
        assert_eq!(item.status, ItemStatus::InProgress);
        assert_eq!(store.pending_operations().await.len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_trade_is_rejected() {
        let store = OfflineStore::in_memory(StoreSettings::default());
        let cmd = command(&["create", "--project", "p1", "Leak", "--trade", "masonry"]);

        let err = cmd.run(&store, &test_config()).await.unwrap_err();
        assert!(err.to_string().contains("Invalid trade"));
        assert!(store.pending_operations().await.is_empty());
    }

    #[tokio::test]
    async fn test_update_without_changes_fails() {
        let store = OfflineStore::in_memory(StoreSettings::default());
        let cmd = command(&["update", "some-id"]);

        let err = cmd.run(&store, &test_config()).await.unwrap_err();
        assert!(err.to_string().contains("No updates specified"));
    }

    #[test]
    fn test_read_commands_are_not_writes() {
        assert!(!command(&["list", "--project", "p1"]).is_write());
        assert!(!command(&["show", "abc"]).is_write());
        assert!(command(&["delete", "abc", "--force"]).is_write());
    }
}
