use punchlist_core::models::{
    EntityType, NewPhoto, NewPunchlistItem, PhotoPatch, Priority, PunchlistItemPatch, Trade,
};
use punchlist_core::offline::{
    JsonFilePersistence, OfflineStore, OperationKind, PhotoStorage, StoreError, StoreSettings,
};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

fn draft() -> NewPunchlistItem {
    NewPunchlistItem {
        project_id: "p1".to_string(),
        title: "Missing outlet cover".to_string(),
        description: "North wall".to_string(),
        location: "Unit 4B".to_string(),
        trade: Trade::Electrical,
        priority: Priority::Critical,
        assigned_to: Some("u2".to_string()),
        due_date: None,
        created_by: "u1".to_string(),
    }
}

async fn open(dir: &TempDir) -> OfflineStore {
    let persistence = Arc::new(JsonFilePersistence::new(dir.path().join("offline-store.json")));
    OfflineStore::open(persistence, StoreSettings::default())
        .await
        .unwrap()
}

async fn open_with_photos(dir: &TempDir) -> OfflineStore {
    open(dir).await.with_photo_dir(dir.path().join("photos"))
}

fn snapshot_file(dir: &TempDir, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

fn site_photo(item_id: &str) -> NewPhoto {
    NewPhoto {
        punchlist_item_id: item_id.to_string(),
        url: String::new(),
        thumbnail_url: String::new(),
        caption: Some("Cracked drywall".to_string()),
        uploaded_by: "u1".to_string(),
    }
}

#[tokio::test]
async fn test_queue_and_cache_survive_restart() {
    let dir = TempDir::new().unwrap();
    let item_id = {
        let store = open(&dir).await;
        let item = store.create_punchlist_item(draft()).await.unwrap();
        store
            .update_punchlist_item(
                &item.id,
                PunchlistItemPatch {
                    priority: Some(Priority::High),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let photo = store
            .create_photo(NewPhoto {
                punchlist_item_id: item.id.clone(),
                url: "file:///photos/outlet.jpg".to_string(),
                thumbnail_url: "file:///thumbs/outlet.jpg".to_string(),
                caption: None,
                uploaded_by: "u1".to_string(),
            })
            .await
            .unwrap();
        store
            .update_photo(
                &photo.id,
                PhotoPatch {
                    caption: Some("Cover plate missing".to_string()),
                },
            )
            .await
            .unwrap();
        item.id
    };

    let store = open(&dir).await;
    let item = store.punchlist_item(&item_id).await.unwrap();
    assert_eq!(item.priority, Priority::High);
    let photos = store.photos(&item_id).await;
    assert_eq!(photos.len(), 1);
    assert_eq!(photos[0].caption.as_deref(), Some("Cover plate missing"));

    let ops: Vec<(OperationKind, EntityType)> = store
        .pending_operations()
        .await
        .iter()
        .map(|op| (op.kind, op.entity_type))
        .collect();
    assert_eq!(
        ops,
        vec![
            (OperationKind::Create, EntityType::PunchlistItem),
            (OperationKind::Update, EntityType::PunchlistItem),
            (OperationKind::Create, EntityType::Photo),
            (OperationKind::Update, EntityType::Photo),
        ]
    );
}

#[tokio::test]
async fn test_delete_photo_queues_delete() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir).await;
    let item = store.create_punchlist_item(draft()).await.unwrap();
    let photo = store
        .create_photo(NewPhoto {
            punchlist_item_id: item.id.clone(),
            url: "file:///photos/a.jpg".to_string(),
            thumbnail_url: "file:///thumbs/a.jpg".to_string(),
            caption: Some("Before".to_string()),
            uploaded_by: "u1".to_string(),
        })
        .await
        .unwrap();

    store.delete_photo(&photo.id).await.unwrap();

    assert!(store.photos(&item.id).await.is_empty());
    let last = store.pending_operations().await.pop().unwrap();
    assert_eq!(last.kind, OperationKind::Delete);
    assert_eq!(last.entity_id, photo.id);
    assert!(store.delete_photo(&photo.id).await.is_err());
}

#[tokio::test]
async fn test_captured_photo_is_stored_and_survives_restart() {
    let dir = TempDir::new().unwrap();
    let source = snapshot_file(&dir, "IMG_0007.jpg", b"0123456789abcdef");

    let (item_id, photo) = {
        let store = open_with_photos(&dir).await;
        let item = store.create_punchlist_item(draft()).await.unwrap();
        let photo = store
            .capture_photo(site_photo(&item.id), &source)
            .await
            .unwrap();
        (item.id, photo)
    };

    let stored = dir.path().join("photos").join(format!("{}.jpg", photo.id));
    assert!(stored.exists());
    assert!(photo.url.starts_with("file://"));
    assert_eq!(photo.url, photo.thumbnail_url);

    let store = open_with_photos(&dir).await;
    assert_eq!(store.local_photo_path(&photo.id).await, Some(stored));
    assert_eq!(store.photos(&item_id).await, vec![photo.clone()]);
    assert_eq!(
        store.photo_storage().await.unwrap(),
        Some(PhotoStorage { files: 1, bytes: 16 })
    );
    let create = store.pending_operations().await.pop().unwrap();
    assert_eq!(create.kind, OperationKind::Create);
    assert_eq!(create.payload["url"], photo.url.as_str());
}

#[tokio::test]
async fn test_capture_needs_cached_item_and_photo_dir() {
    let dir = TempDir::new().unwrap();
    let source = snapshot_file(&dir, "IMG_0008.jpg", b"jpeg");

    let without_dir = open(&dir).await;
    let item = without_dir.create_punchlist_item(draft()).await.unwrap();
    assert!(matches!(
        without_dir.capture_photo(site_photo(&item.id), &source).await,
        Err(StoreError::NoPhotoDirectory)
    ));
    assert_eq!(without_dir.photo_storage().await.unwrap(), None);

    let store = open_with_photos(&dir).await;
    assert!(matches!(
        store.capture_photo(site_photo("unknown-item"), &source).await,
        Err(StoreError::NotFound(_))
    ));
    assert_eq!(
        store.photo_storage().await.unwrap(),
        Some(PhotoStorage::default())
    );
    assert_eq!(store.pending_operations().await.len(), 1);
}

#[tokio::test]
async fn test_deleting_item_removes_captured_files() {
    let dir = TempDir::new().unwrap();
    let source = snapshot_file(&dir, "IMG_0009.png", b"png");
    let store = open_with_photos(&dir).await;
    let item = store.create_punchlist_item(draft()).await.unwrap();
    let photo = store
        .capture_photo(site_photo(&item.id), &source)
        .await
        .unwrap();
    let stored = store.local_photo_path(&photo.id).await.unwrap();
    assert_eq!(stored.extension().unwrap(), "png");

    store.delete_punchlist_item(&item.id).await.unwrap();

    assert!(!stored.exists());
    assert!(store.local_photo_path(&photo.id).await.is_none());
    assert!(source.exists());
}

#[tokio::test]
async fn test_cleanup_deletes_files_of_pruned_photos() {
    let dir = TempDir::new().unwrap();
    let source = snapshot_file(&dir, "IMG_0010.jpg", b"jpeg");
    let store = open_with_photos(&dir).await;
    let item = store.create_punchlist_item(draft()).await.unwrap();
    let photo = store
        .capture_photo(site_photo(&item.id), &source)
        .await
        .unwrap();
    for op in store.pending_operations().await {
        store.complete_operation(&op, None).await.unwrap();
    }
    let stored = store.local_photo_path(&photo.id).await.unwrap();

    // A negative age puts the cutoff in the future, so everything is stale.
    let report = store
        .cleanup_older_than(chrono::Duration::seconds(-60))
        .await
        .unwrap();

    assert_eq!(report.items_removed, 1);
    assert_eq!(report.photos_removed, 1);
    assert_eq!(report.photo_files_removed, 1);
    assert!(!stored.exists());
    assert_eq!(
        store.photo_storage().await.unwrap(),
        Some(PhotoStorage::default())
    );
}
