use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::entity::{Entity, EntityType};

/// A photo documenting a punchlist item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Photo {
    pub id: String,
    pub punchlist_item_id: String,
    pub url: String,
    pub thumbnail_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    pub taken_at: DateTime<Utc>,
    pub uploaded_by: String,
    pub uploaded_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for Photo {
    const TYPE: EntityType = EntityType::Photo;

    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

/// A photo captured on the device, not yet known to the server.
#[derive(Debug, Clone)]
pub struct NewPhoto {
    pub punchlist_item_id: String,
    pub url: String,
    pub thumbnail_url: String,
    pub caption: Option<String>,
    pub uploaded_by: String,
}

impl NewPhoto {
    pub fn into_photo(self, now: DateTime<Utc>) -> Photo {
        Photo {
            id: Uuid::new_v4().to_string(),
            punchlist_item_id: self.punchlist_item_id,
            url: self.url,
            thumbnail_url: self.thumbnail_url,
            caption: self.caption,
            taken_at: now,
            uploaded_by: self.uploaded_by,
            uploaded_at: now,
            updated_at: now,
        }
    }
}

/// Metadata edits for an existing photo.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}
