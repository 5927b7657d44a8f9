use clap::{Args, Subcommand};
use punchlist_core::{NewPhoto, OfflineStore, PhotoPatch};
use std::path::PathBuf;

use super::{confirm, truncate, OutputFormat};
use crate::config::Config;

#[derive(Args)]
pub struct PhotoCommand {
    #[command(subcommand)]
    pub command: PhotoSubcommand,
}

#[derive(Subcommand)]
pub enum PhotoSubcommand {
    /// Attach a photo to an item
    Add {
        /// Item ID
        item: String,

        /// Photo URL
        #[arg(required_unless_present = "file")]
        url: Option<String>,

        /// Image file to copy into the local photo store
        #[arg(long, conflicts_with = "url")]
        file: Option<PathBuf>,

        /// Thumbnail URL (defaults to the photo URL)
        #[arg(long)]
        thumbnail: Option<String>,

        #[arg(long)]
        caption: Option<String>,
    },

    /// List photos attached to an item
    List {
        /// Item ID
        item: String,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Change a photo's caption
    Caption {
        /// Photo ID
        id: String,

        caption: String,
    },

    /// Remove a photo
    Delete {
        /// Photo ID
        id: String,

        /// Skip confirmation prompt
        #[arg(long, short)]
        force: bool,
    },
}

impl PhotoCommand {
    /// Whether the command queues changes for upload.
    pub fn is_write(&self) -> bool {
        !matches!(self.command, PhotoSubcommand::List { .. })
    }

    pub async fn run(
        &self,
        store: &OfflineStore,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            PhotoSubcommand::Add {
                item,
                url,
                file,
                thumbnail,
                caption,
            } => {
                if store.punchlist_item(item).await.is_none() {
                    return Err(format!("Item not found: {}", item).into());
                }

                let url = url.clone().unwrap_or_default();
                let draft = NewPhoto {
                    punchlist_item_id: item.clone(),
                    thumbnail_url: thumbnail.clone().unwrap_or_else(|| url.clone()),
                    url,
                    caption: caption.clone(),
                    uploaded_by: config.created_by.value.clone(),
                };

                match file {
                    Some(path) => {
                        let photo = store.capture_photo(draft, path).await?;
                        let stored = store.local_photo_path(&photo.id).await.unwrap_or_default();
                        println!("Captured photo: {} ({})", photo.id, stored.display());
                    }
                    None => {
                        let photo = store.create_photo(draft).await?;
                        println!("Added photo: {}", photo.id);
                    }
                }
                Ok(())
            }

            PhotoSubcommand::List { item, format } => {
                let photos = store.photos(item).await;

                if photos.is_empty() {
                    println!("No photos found");
                    return Ok(());
                }

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&photos)?);
                    }
                    OutputFormat::Text => {
                        println!("{:<36}  {:<16}  {:<5}  CAPTION", "ID", "TAKEN", "LOCAL");
                        println!("{}", "-".repeat(97));
                        for photo in &photos {
                            let local = store.local_photo_path(&photo.id).await.is_some();
                            println!(
                                "{:<36}  {:<16}  {:<5}  {}",
                                photo.id,
                                photo.taken_at.format("%Y-%m-%d %H:%M"),
                                if local { "yes" } else { "" },
                                truncate(photo.caption.as_deref().unwrap_or(""), 34)
                            );
                        }
                        println!("\nTotal: {} photo(s)", photos.len());
                    }
                }
                Ok(())
            }

            PhotoSubcommand::Caption { id, caption } => {
                let photo = store
                    .update_photo(
                        id,
                        PhotoPatch {
                            caption: Some(caption.clone()),
                        },
                    )
                    .await?;
                println!("Updated photo: {}", photo.id);
                Ok(())
            }

            PhotoSubcommand::Delete { id, force } => {
                if !force && !confirm(&format!("Delete photo '{}'?", id))? {
                    println!("Deletion cancelled.");
                    return Ok(());
                }

                store.delete_photo(id).await?;
                println!("Deleted photo: {}", id);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use punchlist_core::{NewPunchlistItem, Priority, StoreSettings, Trade};
    use tempfile::TempDir;

    #[derive(Parser)]
    struct TestCli {
        #[command(subcommand)]
        command: PhotoSubcommand,
    }

    fn command(args: &[&str]) -> PhotoCommand {
        let mut argv = vec!["punch"];
        argv.extend_from_slice(args);
        PhotoCommand {
            command: TestCli::parse_from(argv).command,
        }
    }

    fn test_config(dir: &TempDir) -> Config {
        Config::load(Some(dir.path().join("missing.yaml"))).unwrap()
    }

    async fn store_with_item(dir: &TempDir) -> (OfflineStore, String) {
        let store = OfflineStore::in_memory(StoreSettings::default())
            .with_photo_dir(dir.path().join("photos"));
        let item = store
            .create_punchlist_item(NewPunchlistItem {
                project_id: "p1".to_string(),
                title: "Scuffed door".to_string(),
                description: String::new(),
                location: "Unit 2".to_string(),
                trade: Trade::Finishes,
                priority: Priority::Low,
                assigned_to: None,
                due_date: None,
                created_by: "tester".to_string(),
            })
            .await
            .unwrap();
        (store, item.id)
    }

    #[tokio::test]
    async fn test_add_with_file_copies_into_photo_dir() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("door.jpg");
        std::fs::write(&source, b"jpeg").unwrap();
        let (store, item_id) = store_with_item(&dir).await;

        let source_arg = source.to_string_lossy().to_string();
        let cmd = command(&["add", item_id.as_str(), "--file", source_arg.as_str()]);
        assert!(cmd.is_write());
        cmd.run(&store, &test_config(&dir)).await.unwrap();

        let photos = store.photos(&item_id).await;
        assert_eq!(photos.len(), 1);
        let stored = store.local_photo_path(&photos[0].id).await.unwrap();
        assert!(stored.starts_with(dir.path().join("photos")));
        assert_eq!(std::fs::read(stored).unwrap(), b"jpeg");
    }

    #[tokio::test]
    async fn test_add_with_url_keeps_no_local_file() {
        let dir = TempDir::new().unwrap();
        let (store, item_id) = store_with_item(&dir).await;

        let cmd = command(&["add", item_id.as_str(), "https://cdn.example.com/door.jpg"]);
        cmd.run(&store, &test_config(&dir)).await.unwrap();

        let photos = store.photos(&item_id).await;
        assert_eq!(photos[0].thumbnail_url, "https://cdn.example.com/door.jpg");
        assert!(store.local_photo_path(&photos[0].id).await.is_none());
    }

    #[test]
    fn test_add_needs_url_or_file() {
        assert!(TestCli::try_parse_from(["punch", "add", "item-1"]).is_err());
        assert!(!command(&["list", "item-1"]).is_write());
    }
}
