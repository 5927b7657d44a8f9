//! Local mirror of server state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

use crate::models::{Entity, EntityKey, EntityType, Photo, Project, PunchlistItem, User};

/// Entity collections keyed by id, plus the version each entity had when it
/// was last confirmed in sync with the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalCache {
    #[serde(default)]
    pub projects: BTreeMap<String, Project>,
    #[serde(default)]
    pub punchlist_items: BTreeMap<String, PunchlistItem>,
    #[serde(default)]
    pub photos: BTreeMap<String, Photo>,
    #[serde(default)]
    pub users: BTreeMap<String, User>,
    /// Keyed by `EntityKey` display form (`type:id`).
    #[serde(default)]
    synced_at: BTreeMap<String, DateTime<Utc>>,
}

/// Typed access to the collection holding an entity type.
pub trait Cached: Entity {
    fn collection(cache: &LocalCache) -> &BTreeMap<String, Self>;
    fn collection_mut(cache: &mut LocalCache) -> &mut BTreeMap<String, Self>;
}

impl Cached for Project {
    fn collection(cache: &LocalCache) -> &BTreeMap<String, Self> {
        &cache.projects
    }
    fn collection_mut(cache: &mut LocalCache) -> &mut BTreeMap<String, Self> {
        &mut cache.projects
    }
}

impl Cached for PunchlistItem {
    fn collection(cache: &LocalCache) -> &BTreeMap<String, Self> {
        &cache.punchlist_items
    }
    fn collection_mut(cache: &mut LocalCache) -> &mut BTreeMap<String, Self> {
        &mut cache.punchlist_items
    }
}

impl Cached for Photo {
    fn collection(cache: &LocalCache) -> &BTreeMap<String, Self> {
        &cache.photos
    }
    fn collection_mut(cache: &mut LocalCache) -> &mut BTreeMap<String, Self> {
        &mut cache.photos
    }
}

impl Cached for User {
    fn collection(cache: &LocalCache) -> &BTreeMap<String, Self> {
        &cache.users
    }
    fn collection_mut(cache: &mut LocalCache) -> &mut BTreeMap<String, Self> {
        &mut cache.users
    }
}

/// Counts reported by [`LocalCache::prune_older_than`]. The store adds the
/// captured photo files it deleted along with their photos.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub projects_removed: usize,
    pub items_removed: usize,
    pub photos_removed: usize,
    pub photo_files_removed: usize,
}

impl LocalCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<T: Cached>(&self, id: &str) -> Option<&T> {
        T::collection(self).get(id)
    }

    /// Inserts or replaces an entity.
    pub fn upsert<T: Cached>(&mut self, entity: T) {
        T::collection_mut(self).insert(entity.id().to_string(), entity);
    }

    pub fn remove<T: Cached>(&mut self, id: &str) -> Option<T> {
        T::collection_mut(self).remove(id)
    }

    pub fn contains(&self, key: &EntityKey) -> bool {
        let id = key.id.as_str();
        match key.entity_type {
            EntityType::Project => self.projects.contains_key(id),
            EntityType::PunchlistItem => self.punchlist_items.contains_key(id),
            EntityType::Photo => self.photos.contains_key(id),
            EntityType::User => self.users.contains_key(id),
        }
    }

    /// Serialized form of a cached entity.
    pub fn get_value(&self, key: &EntityKey) -> Option<Value> {
        let id = key.id.as_str();
        let value = match key.entity_type {
            EntityType::Project => self.projects.get(id).map(serde_json::to_value),
            EntityType::PunchlistItem => self.punchlist_items.get(id).map(serde_json::to_value),
            EntityType::Photo => self.photos.get(id).map(serde_json::to_value),
            EntityType::User => self.users.get(id).map(serde_json::to_value),
        };
        value.and_then(Result::ok)
    }

    /// Stores a serialized entity in the collection for `entity_type`.
    pub fn put_value(
        &mut self,
        entity_type: EntityType,
        value: Value,
    ) -> Result<EntityKey, serde_json::Error> {
        let key = match entity_type {
            EntityType::Project => self.put_typed::<Project>(value)?,
            EntityType::PunchlistItem => self.put_typed::<PunchlistItem>(value)?,
            EntityType::Photo => self.put_typed::<Photo>(value)?,
            EntityType::User => self.put_typed::<User>(value)?,
        };
        Ok(key)
    }

    fn put_typed<T: Cached>(&mut self, value: Value) -> Result<EntityKey, serde_json::Error> {
        let entity: T = serde_json::from_value(value)?;
        let key = entity.key();
        self.upsert(entity);
        Ok(key)
    }

    /// Removes an entity of any type. Returns true if it was present.
    pub fn remove_key(&mut self, key: &EntityKey) -> bool {
        let id = key.id.as_str();
        match key.entity_type {
            EntityType::Project => self.projects.remove(id).is_some(),
            EntityType::PunchlistItem => self.punchlist_items.remove(id).is_some(),
            EntityType::Photo => self.photos.remove(id).is_some(),
            EntityType::User => self.users.remove(id).is_some(),
        }
    }

    pub fn mark_synced(&mut self, key: &EntityKey, version: DateTime<Utc>) {
        self.synced_at.insert(key.to_string(), version);
    }

    /// Version of the entity at its last confirmed sync, if it was ever synced.
    pub fn synced_at(&self, key: &EntityKey) -> Option<DateTime<Utc>> {
        self.synced_at.get(&key.to_string()).copied()
    }

    pub fn forget_synced(&mut self, key: &EntityKey) {
        self.synced_at.remove(&key.to_string());
    }

    pub fn items_for_project(&self, project_id: &str) -> Vec<&PunchlistItem> {
        self.punchlist_items
            .values()
            .filter(|item| item.project_id == project_id)
            .collect()
    }

    pub fn photos_for_item(&self, item_id: &str) -> Vec<&Photo> {
        self.photos
            .values()
            .filter(|photo| photo.punchlist_item_id == item_id)
            .collect()
    }

    /// Drops projects, items and photos last updated before `cutoff`.
    ///
    /// Entities in `protected` (typically those with queued operations) are
    /// kept. Removing an item also removes its photos.
    pub fn prune_older_than(
        &mut self,
        cutoff: DateTime<Utc>,
        protected: &HashSet<EntityKey>,
    ) -> CleanupReport {
        let mut report = CleanupReport::default();

        let stale_projects: Vec<String> = self
            .projects
            .values()
            .filter(|p| p.updated_at < cutoff && !protected.contains(&p.key()))
            .map(|p| p.id.clone())
            .collect();
        for id in stale_projects {
            self.projects.remove(&id);
            self.forget_synced(&EntityKey::new(EntityType::Project, id));
            report.projects_removed += 1;
        }

        let stale_items: Vec<String> = self
            .punchlist_items
            .values()
            .filter(|i| i.updated_at < cutoff && !protected.contains(&i.key()))
            .map(|i| i.id.clone())
            .collect();
        for id in &stale_items {
            self.punchlist_items.remove(id);
            self.forget_synced(&EntityKey::new(EntityType::PunchlistItem, id.clone()));
            report.items_removed += 1;
        }

        let stale_photos: Vec<String> = self
            .photos
            .values()
            .filter(|ph| {
                !protected.contains(&ph.key())
                    && (ph.updated_at < cutoff || stale_items.contains(&ph.punchlist_item_id))
            })
            .map(|ph| ph.id.clone())
            .collect();
        for id in stale_photos {
            self.photos.remove(&id);
            self.forget_synced(&EntityKey::new(EntityType::Photo, id));
            report.photos_removed += 1;
        }

        report
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::models::{ItemStatus, Priority, ProjectStatus, Trade, UserRole};
    use chrono::TimeZone;

    pub fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    pub fn project(id: &str, updated: i64) -> Project {
        Project {
            id: id.to_string(),
            name: format!("Project {}", id),
            description: None,
            address: "1 Main St".to_string(),
            city: "Anytown".to_string(),
            state: "CA".to_string(),
            zip_code: "12345".to_string(),
            client_name: "Client".to_string(),
            start_date: ts(0),
            end_date: None,
            status: ProjectStatus::InProgress,
            created_by: "u1".to_string(),
            assigned_users: vec!["u1".to_string()],
            created_at: ts(0),
            updated_at: ts(updated),
        }
    }

    pub fn item(id: &str, project_id: &str, updated: i64) -> PunchlistItem {
        PunchlistItem {
            id: id.to_string(),
            project_id: project_id.to_string(),
            title: format!("Item {}", id),
            description: "desc".to_string(),
            location: "Room 101".to_string(),
            trade: Trade::Electrical,
            priority: Priority::Medium,
            status: ItemStatus::Open,
            assigned_to: None,
            created_by: "u1".to_string(),
            due_date: None,
            completed_date: None,
            verified_date: None,
            notes: Vec::new(),
            created_at: ts(0),
            updated_at: ts(updated),
        }
    }

    pub fn photo(id: &str, item_id: &str, updated: i64) -> Photo {
        Photo {
            id: id.to_string(),
            punchlist_item_id: item_id.to_string(),
            url: format!("https://cdn.example.com/{}.jpg", id),
            thumbnail_url: format!("https://cdn.example.com/{}_thumb.jpg", id),
            caption: None,
            taken_at: ts(0),
            uploaded_by: "u1".to_string(),
            uploaded_at: ts(0),
            updated_at: ts(updated),
        }
    }

    pub fn user(id: &str, updated: i64) -> User {
        User {
            id: id.to_string(),
            email: format!("{}@example.com", id),
            first_name: "Jane".to_string(),
            last_name: "Doe".to_string(),
            role: UserRole::Inspector,
            company: "Acme".to_string(),
            phone: None,
            avatar: None,
            created_at: ts(0),
            updated_at: ts(updated),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use serde_json::json;

    #[test]
    fn test_upsert_replaces_existing() {
        let mut cache = LocalCache::new();
        cache.upsert(project("p1", 1));
        let mut updated = project("p1", 2);
        updated.name = "Renamed".to_string();
        cache.upsert(updated);

        assert_eq!(cache.projects.len(), 1);
        assert_eq!(cache.get::<Project>("p1").unwrap().name, "Renamed");
    }

    #[test]
    fn test_value_roundtrip_through_cache() {
        let mut cache = LocalCache::new();
        let value = serde_json::to_value(item("i1", "p1", 5)).unwrap();
        let key = cache.put_value(EntityType::PunchlistItem, value).unwrap();

        assert_eq!(key, EntityKey::new(EntityType::PunchlistItem, "i1"));
        assert!(cache.contains(&key));
        let stored = cache.get_value(&key).unwrap();
        assert_eq!(stored["projectId"], "p1");
        assert!(cache.remove_key(&key));
        assert!(!cache.contains(&key));
    }

    #[test]
    fn test_put_value_rejects_wrong_shape() {
        let mut cache = LocalCache::new();
        let result = cache.put_value(EntityType::Photo, json!({"id": "x"}));
        assert!(result.is_err());
        assert!(cache.photos.is_empty());
    }

    #[test]
    fn test_synced_at_tracking() {
        let mut cache = LocalCache::new();
        let key = EntityKey::new(EntityType::User, "u1");
        assert!(cache.synced_at(&key).is_none());
        cache.mark_synced(&key, ts(10));
        assert_eq!(cache.synced_at(&key), Some(ts(10)));
        cache.forget_synced(&key);
        assert!(cache.synced_at(&key).is_none());
    }

    #[test]
    fn test_relations() {
        let mut cache = LocalCache::new();
        cache.upsert(item("i1", "p1", 0));
        cache.upsert(item("i2", "p1", 0));
        cache.upsert(item("i3", "p2", 0));
        cache.upsert(photo("ph1", "i1", 0));
        cache.upsert(photo("ph2", "i3", 0));

        assert_eq!(cache.items_for_project("p1").len(), 2);
        let photos = cache.photos_for_item("i1");
        assert_eq!(photos.len(), 1);
        assert_eq!(photos[0].id, "ph1");
    }

    #[test]
    fn test_prune_older_than_cascades_and_protects() {
        let mut cache = LocalCache::new();
        cache.upsert(project("old", 0));
        cache.upsert(project("new", 100));
        cache.upsert(item("stale", "old", 0));
        cache.upsert(item("kept", "new", 0));
        cache.upsert(item("fresh", "new", 100));
        cache.upsert(photo("ph-fresh-on-stale", "stale", 100));
        cache.upsert(photo("ph-fresh", "fresh", 100));

        let mut protected = HashSet::new();
        protected.insert(EntityKey::new(EntityType::PunchlistItem, "kept"));

        let report = cache.prune_older_than(ts(50), &protected);
        assert_eq!(
            report,
            CleanupReport {
                projects_removed: 1,
                items_removed: 1,
                photos_removed: 1,
                photo_files_removed: 0,
            }
        );
        assert!(cache.projects.contains_key("new"));
        assert!(cache.punchlist_items.contains_key("kept"));
        assert!(cache.punchlist_items.contains_key("fresh"));
        assert!(cache.photos.contains_key("ph-fresh"));
    }
}
