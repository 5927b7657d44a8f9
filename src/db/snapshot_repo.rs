use async_trait::async_trait;
use chrono::Utc;
use punchlist_core::{Persistence, PersistenceError, StoreSnapshot};
use serde_json::{Map, Value};
use sqlx::SqlitePool;

/// Stores the offline snapshot in SQLite, one row per top-level section.
///
/// All sections are rewritten inside a single transaction, so a reader never
/// sees a cache from one save next to a queue from another.
pub struct SqlitePersistence {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct SectionRow {
    name: String,
    data: String,
}

impl SqlitePersistence {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn backend(e: sqlx::Error) -> PersistenceError {
    PersistenceError::Backend(e.to_string())
}

#[async_trait]
impl Persistence for SqlitePersistence {
    async fn load(&self) -> Result<Option<StoreSnapshot>, PersistenceError> {
        let rows: Vec<SectionRow> = sqlx::query_as("SELECT name, data FROM store_sections")
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

        if rows.is_empty() {
            return Ok(None);
        }

        let mut sections = Map::new();
        for row in rows {
            sections.insert(row.name, serde_json::from_str(&row.data)?);
        }
        Ok(Some(serde_json::from_value(Value::Object(sections))?))
    }

    async fn save(&self, snapshot: &StoreSnapshot) -> Result<(), PersistenceError> {
        let sections = match serde_json::to_value(snapshot)? {
            Value::Object(map) => map,
            other => {
                return Err(PersistenceError::Backend(format!(
                    "snapshot serialized to {} instead of an object",
                    other
                )))
            }
        };
        let updated_at = Utc::now().to_rfc3339();

        let mut tx = self.pool.begin().await.map_err(backend)?;

        sqlx::query("DELETE FROM store_sections")
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

        for (name, data) in sections {
            sqlx::query("INSERT INTO store_sections (name, data, updated_at) VALUES (?, ?, ?)")
                .bind(&name)
                .bind(data.to_string())
                .bind(&updated_at)
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
        }

        tx.commit().await.map_err(backend)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use punchlist_core::{
        NewPunchlistItem, OfflineStore, OperationKind, Priority, StoreSettings, Trade,
    };
    use std::sync::Arc;
    use tempfile::TempDir;

    struct TestContext {
        persistence: Arc<SqlitePersistence>,
        _temp_dir: TempDir,
    }

    async fn setup_repo() -> TestContext {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let pool = init_db(&db_path).await.unwrap();
        TestContext {
            persistence: Arc::new(SqlitePersistence::new(pool)),
            _temp_dir: temp_dir,
        }
    }

    fn draft(title: &str) -> NewPunchlistItem {
        NewPunchlistItem {
            project_id: "p1".to_string(),
            title: title.to_string(),
            description: "Outlet cover missing".to_string(),
            location: "Unit 4B".to_string(),
            trade: Trade::Electrical,
            priority: Priority::High,
            assigned_to: None,
            due_date: None,
            created_by: "inspector".to_string(),
        }
    }

    #[tokio::test]
    async fn test_load_empty_database() {
        let ctx = setup_repo().await;
        assert!(ctx.persistence.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_and_load_snapshot() {
        let ctx = setup_repo().await;
        let snapshot = StoreSnapshot {
            last_sync_time: Some(Utc::now()),
            ..StoreSnapshot::default()
        };

        ctx.persistence.save(&snapshot).await.unwrap();
        let loaded = ctx.persistence.load().await.unwrap().unwrap();

        assert_eq!(loaded, snapshot);
    }

    #[tokio::test]
    async fn test_store_survives_restart() {
        let ctx = setup_repo().await;

        let item = {
            let store = OfflineStore::open(ctx.persistence.clone(), StoreSettings::default())
                .await
                .unwrap();
            store.create_punchlist_item(draft("Missing cover")).await.unwrap()
        };

        let store = OfflineStore::open(ctx.persistence.clone(), StoreSettings::default())
            .await
            .unwrap();
        let cached = store.punchlist_item(&item.id).await.unwrap();
        assert_eq!(cached.title, "Missing cover");

        let pending = store.pending_operations().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].kind, OperationKind::Create);
        assert_eq!(pending[0].entity_id, item.id);
    }

    #[tokio::test]
    async fn test_save_replaces_previous_sections() {
        let ctx = setup_repo().await;
        let store = OfflineStore::open(ctx.persistence.clone(), StoreSettings::default())
            .await
            .unwrap();

        let item = store.create_punchlist_item(draft("Cracked tile")).await.unwrap();
        store.delete_punchlist_item(&item.id).await.unwrap();

        let loaded = ctx.persistence.load().await.unwrap().unwrap();
        assert!(loaded.cache.punchlist_items.is_empty());
    }
}
