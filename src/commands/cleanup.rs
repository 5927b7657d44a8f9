use clap::Args;
use punchlist_core::OfflineStore;

#[derive(Args)]
pub struct CleanupCommand {
    /// Remove cached data not updated in this many days
    #[arg(long, default_value_t = 30)]
    pub days: i64,
}

impl CleanupCommand {
    pub async fn run(&self, store: &OfflineStore) -> Result<(), Box<dyn std::error::Error>> {
        if self.days < 1 {
            return Err("--days must be at least 1".into());
        }

        let report = store
            .cleanup_older_than(chrono::Duration::days(self.days))
            .await?;
        println!(
            "Removed {} project(s), {} item(s), {} photo(s) older than {} day(s)",
            report.projects_removed, report.items_removed, report.photos_removed, self.days
        );
        if report.photo_files_removed > 0 {
            println!("Deleted {} captured photo file(s)", report.photo_files_removed);
        }
        Ok(())
    }
}
