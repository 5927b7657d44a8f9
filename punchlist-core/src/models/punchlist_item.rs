use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::entity::{Entity, EntityType};
use super::note::Note;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trade {
    Electrical,
    Plumbing,
    Hvac,
    Structural,
    Finishes,
    Landscaping,
    General,
}

impl fmt::Display for Trade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Trade::Electrical => "electrical",
            Trade::Plumbing => "plumbing",
            Trade::Hvac => "hvac",
            Trade::Structural => "structural",
            Trade::Finishes => "finishes",
            Trade::Landscaping => "landscaping",
            Trade::General => "general",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for Trade {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "electrical" => Ok(Trade::Electrical),
            "plumbing" => Ok(Trade::Plumbing),
            "hvac" => Ok(Trade::Hvac),
            "structural" => Ok(Trade::Structural),
            "finishes" => Ok(Trade::Finishes),
            "landscaping" => Ok(Trade::Landscaping),
            "general" => Ok(Trade::General),
            _ => Err(format!(
                "Invalid trade '{}'. Valid options: electrical, plumbing, hvac, structural, finishes, landscaping, general",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Medium => write!(f, "medium"),
            Priority::High => write!(f, "high"),
            Priority::Critical => write!(f, "critical"),
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "critical" => Ok(Priority::Critical),
            _ => Err(format!(
                "Invalid priority '{}'. Valid options: low, medium, high, critical",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Open,
    InProgress,
    Completed,
    Verified,
    Rejected,
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemStatus::Open => write!(f, "open"),
            ItemStatus::InProgress => write!(f, "in_progress"),
            ItemStatus::Completed => write!(f, "completed"),
            ItemStatus::Verified => write!(f, "verified"),
            ItemStatus::Rejected => write!(f, "rejected"),
        }
    }
}

impl FromStr for ItemStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "open" => Ok(ItemStatus::Open),
            "in_progress" => Ok(ItemStatus::InProgress),
            "completed" => Ok(ItemStatus::Completed),
            "verified" => Ok(ItemStatus::Verified),
            "rejected" => Ok(ItemStatus::Rejected),
            _ => Err(format!(
                "Invalid status '{}'. Valid options: open, in_progress, completed, verified, rejected",
                s
            )),
        }
    }
}

/// A tracked defect or task tied to a project.
///
/// Photos are cached as separate records keyed by `punchlist_item_id`
/// rather than embedded, so they can be synced independently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PunchlistItem {
    pub id: String,
    pub project_id: String,
    pub title: String,
    pub description: String,
    pub location: String,
    pub trade: Trade,
    pub priority: Priority,
    pub status: ItemStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    pub created_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: Vec<Note>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for PunchlistItem {
    const TYPE: EntityType = EntityType::PunchlistItem;

    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

impl fmt::Display for PunchlistItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.title)?;
        writeln!(f, "{}", "=".repeat(self.title.len()))?;
        writeln!(f, "ID: {}", self.id)?;
        writeln!(f, "Location: {}", self.location)?;
        writeln!(f, "Trade: {}", self.trade)?;
        writeln!(f, "Priority: {}", self.priority)?;
        writeln!(f, "Status: {}", self.status)?;
        if let Some(assignee) = &self.assigned_to {
            writeln!(f, "Assigned to: {}", assignee)?;
        }
        if let Some(due) = &self.due_date {
            writeln!(f, "Due: {}", due.format("%Y-%m-%d"))?;
        }
        if !self.description.is_empty() {
            writeln!(f, "\n{}", self.description)?;
        }
        if !self.notes.is_empty() {
            writeln!(f, "\nNotes: {}", self.notes.len())?;
        }
        Ok(())
    }
}

/// Fields supplied when capturing a new item in the field.
#[derive(Debug, Clone)]
pub struct NewPunchlistItem {
    pub project_id: String,
    pub title: String,
    pub description: String,
    pub location: String,
    pub trade: Trade,
    pub priority: Priority,
    pub assigned_to: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub created_by: String,
}

impl NewPunchlistItem {
    /// Builds the full item with a client-generated id. New items start open.
    pub fn into_item(self, now: DateTime<Utc>) -> PunchlistItem {
        PunchlistItem {
            id: Uuid::new_v4().to_string(),
            project_id: self.project_id,
            title: self.title,
            description: self.description,
            location: self.location,
            trade: self.trade,
            priority: self.priority,
            status: ItemStatus::Open,
            assigned_to: self.assigned_to,
            created_by: self.created_by,
            due_date: self.due_date,
            completed_date: None,
            verified_date: None,
            notes: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update; only `Some` fields are sent and applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PunchlistItemPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trade: Option<Trade>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ItemStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
}

impl PunchlistItemPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> NewPunchlistItem {
        NewPunchlistItem {
            project_id: "p1".to_string(),
            title: "Outlet missing cover".to_string(),
            description: String::new(),
            location: "Room 101".to_string(),
            trade: Trade::Electrical,
            priority: Priority::Medium,
            assigned_to: None,
            due_date: None,
            created_by: "u1".to_string(),
        }
    }

    #[test]
    fn test_new_item_starts_open() {
        let now = Utc::now();
        let item = draft().into_item(now);
        assert_eq!(item.status, ItemStatus::Open);
        assert_eq!(item.created_at, now);
        assert_eq!(item.updated_at, now);
        assert!(Uuid::parse_str(&item.id).is_ok());
    }

    #[test]
    fn test_patch_serializes_only_set_fields() {
        let patch = PunchlistItemPatch {
            status: Some(ItemStatus::Completed),
            assigned_to: Some("u2".to_string()),
            ..Default::default()
        };
        let value = serde_json::to_value(&patch).unwrap();
        let obj = value.as_object().unwrap();
        assert_eq!(obj.len(), 2);
        assert_eq!(obj["status"], "completed");
        assert_eq!(obj["assignedTo"], "u2");
    }

    #[test]
    fn test_patch_is_empty() {
        assert!(PunchlistItemPatch::default().is_empty());
        let patch = PunchlistItemPatch {
            title: Some("x".to_string()),
            ..Default::default()
        };
        assert!(!patch.is_empty());
    }

    #[test]
    fn test_enum_parsing() {
        assert_eq!(Trade::from_str("HVAC").unwrap(), Trade::Hvac);
        assert_eq!(Priority::from_str("critical").unwrap(), Priority::Critical);
        assert_eq!(
            ItemStatus::from_str("in-progress").unwrap(),
            ItemStatus::InProgress
        );
        assert!(Trade::from_str("masonry").is_err());
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::Low < Priority::Medium);
    }
}
