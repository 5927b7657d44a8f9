use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The kinds of records that are cached locally and synced with the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Project,
    PunchlistItem,
    Photo,
    User,
}

impl EntityType {
    pub const ALL: [EntityType; 4] = [
        EntityType::Project,
        EntityType::PunchlistItem,
        EntityType::Photo,
        EntityType::User,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Project => "project",
            EntityType::PunchlistItem => "punchlist_item",
            EntityType::Photo => "photo",
            EntityType::User => "user",
        }
    }

    /// REST collection segment under `/api`.
    pub fn api_path(&self) -> &'static str {
        match self {
            EntityType::Project => "projects",
            EntityType::PunchlistItem => "punchlist",
            EntityType::Photo => "photos",
            EntityType::User => "users",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "project" => Ok(EntityType::Project),
            "punchlist_item" | "item" => Ok(EntityType::PunchlistItem),
            "photo" => Ok(EntityType::Photo),
            "user" => Ok(EntityType::User),
            _ => Err(format!(
                "Invalid entity type '{}'. Valid options: project, punchlist_item, photo, user",
                s
            )),
        }
    }
}

/// Identifies one logical entity across the cache, the queue and conflicts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub entity_type: EntityType,
    pub id: String,
}

impl EntityKey {
    pub fn new(entity_type: EntityType, id: impl Into<String>) -> Self {
        Self {
            entity_type,
            id: id.into(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.id)
    }
}

/// A record that can be cached and versioned by its `updated_at` timestamp.
pub trait Entity: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    const TYPE: EntityType;

    fn id(&self) -> &str;

    /// Version timestamp used for conflict detection.
    fn updated_at(&self) -> DateTime<Utc>;

    fn key(&self) -> EntityKey {
        EntityKey::new(Self::TYPE, self.id())
    }
}

/// Reads the camelCase `updatedAt` field from a serialized entity.
pub fn updated_at_of(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    value
        .get("updatedAt")
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}
