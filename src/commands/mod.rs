use chrono::{DateTime, NaiveDate, Utc};
use clap::ValueEnum;
use std::io::{self, Write};

mod cleanup;
mod config_cmd;
mod conflict;
mod item;
mod photo;
mod project;
mod queue;
mod sync_cmd;

pub use cleanup::CleanupCommand;
pub use config_cmd::ConfigCommand;
pub use conflict::ConflictCommand;
pub use item::ItemCommand;
pub use photo::PhotoCommand;
pub use project::ProjectCommand;
pub use queue::QueueCommand;
pub use sync_cmd::SyncCommand;

#[derive(Debug, Clone, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Parses a `YYYY-MM-DD` date as midnight UTC.
pub(crate) fn parse_date(input: &str) -> Result<DateTime<Utc>, String> {
    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| format!("Invalid date '{}'. Use YYYY-MM-DD format.", input))
}

pub(crate) fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() > width {
        let head: String = text.chars().take(width.saturating_sub(3)).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}

/// Asks a yes/no question on stdin. Anything but `y` means no.
pub(crate) fn confirm(prompt: &str) -> io::Result<bool> {
    print!("{} [y/N] ", prompt);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("y"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    #[test]
    fn test_parse_date() {
        let due = parse_date("2024-03-15").unwrap();
        assert_eq!((due.year(), due.month(), due.day()), (2024, 3, 15));
        assert!(parse_date("15/03/2024").is_err());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a much longer title", 10), "a much ...");
    }
}
