//! Integration tests for durable storage through SQLite
//!
//! Each test opens a database in a temp directory, mutates the collection,
//! then reopens it from disk.

use galleria_common::config::TomlConfig;
use galleria_common::db::{init_database_pool, SqliteKvStore};
use galleria_common::events::GalleryEvent;
use galleria_common::kv::KeyValueStore;
use galleria_core::codec::{ImageCodec, UploadFile};
use galleria_core::models::{ImageMetadata, People, TagInfo};
use galleria_core::repository::ImageRepository;
use galleria_core::store::{CollectionStore, COLLECTION_KEY};
use galleria_core::Gallery;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

async fn open_repository(db_path: &Path, quota: Option<usize>) -> ImageRepository {
    let pool = init_database_pool(db_path).await.unwrap();
    let kv: Arc<dyn KeyValueStore> = Arc::new(SqliteKvStore::new(pool).with_quota(quota));
    let bus = galleria_common::events::EventBus::new(64);
    ImageRepository::open(CollectionStore::new(kv, ImageCodec::new(), bus.clone()), bus).await
}

fn png(name: &str, fill: u8) -> UploadFile {
    UploadFile::from_bytes(name, "image/png", vec![fill; 64])
}

#[tokio::test]
async fn test_reopen_restores_durable_fields() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("galleria.db");

    let saved = {
        let repo = open_repository(&db_path, None).await;
        let added = repo
            .add_many(vec![png("one.png", 1), png("two.png", 2), png("three.png", 3)])
            .await
            .unwrap();

        repo.add_tag(added[0].id, TagInfo::new("favorite", "#ff0000"))
            .await
            .unwrap();
        repo.merge_analysis(
            added[1].id,
            ImageMetadata {
                medium: Some("Photography".to_string()),
                people: Some(People {
                    count: Some(2),
                    age_estimate: Some("30-40".to_string()),
                    gender: Some("mixed".to_string()),
                }),
                colors: vec!["green".to_string(), "gray".to_string()],
                scene: Some("Two hikers on a ridge".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        repo.remove(added[2].id).await.unwrap();

        let snapshot = repo.snapshot().await;
        repo.teardown().await;
        snapshot
    };

    let reopened = open_repository(&db_path, None).await.snapshot().await;

    assert_eq!(reopened.len(), 2);
    for (before, after) in saved.iter().zip(reopened.iter()) {
        assert_eq!(after.id, before.id);
        assert_eq!(after.filename, before.filename);
        assert_eq!(after.uploaded_at, before.uploaded_at);
        assert_eq!(after.analyzed, before.analyzed);
        assert_eq!(after.metadata, before.metadata);
        assert_eq!(after.custom_tags, before.custom_tags);
        assert_eq!(after.encoded_bytes, before.encoded_bytes);
    }
}

#[tokio::test]
async fn test_teardown_does_not_clear_durable_copy() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("galleria.db");

    let repo = open_repository(&db_path, None).await;
    repo.add_many(vec![png("keep.png", 9)]).await.unwrap();
    repo.teardown().await;
    assert!(repo.is_empty().await);

    let reopened = open_repository(&db_path, None).await;
    assert_eq!(reopened.len().await, 1);
}

#[tokio::test]
async fn test_quota_exceeded_keeps_collection_in_memory() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("galleria.db");

    let repo = open_repository(&db_path, Some(400)).await;
    let mut rx = repo.event_bus().subscribe();

    // Small enough to persist
    repo.add_many(vec![png("small.png", 1)]).await.unwrap();

    // Pushes the payload over the quota; in-memory state still advances
    repo.add_many(vec![png("big-1.png", 2), png("big-2.png", 3)])
        .await
        .unwrap();
    assert_eq!(repo.len().await, 3);

    let mut degraded = 0;
    while let Ok(event) = rx.try_recv() {
        if let GalleryEvent::StorageDegraded { .. } = event {
            degraded += 1;
        }
    }
    assert_eq!(degraded, 1);

    // Durable copy still holds the last save that fit
    let reopened = open_repository(&db_path, Some(400)).await;
    let names: Vec<_> = reopened
        .snapshot()
        .await
        .into_iter()
        .map(|r| r.filename)
        .collect();
    assert_eq!(names, vec!["small.png"]);
}

#[tokio::test]
async fn test_corrupt_payload_opens_empty_and_is_overwritten() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("galleria.db");

    let pool = init_database_pool(&db_path).await.unwrap();
    sqlx::query("INSERT INTO kv_store (key, value) VALUES (?, ?)")
        .bind(COLLECTION_KEY)
        .bind("[{\"id\": \"not-a-uuid\"")
        .execute(&pool)
        .await
        .unwrap();

    let repo = open_repository(&db_path, None).await;
    assert!(repo.is_empty().await);

    repo.add_many(vec![png("fresh.png", 4)]).await.unwrap();

    let (payload,): (String,) = sqlx::query_as("SELECT value FROM kv_store WHERE key = ?")
        .bind(COLLECTION_KEY)
        .fetch_one(&pool)
        .await
        .unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&payload).unwrap();
    assert_eq!(parsed.as_array().unwrap().len(), 1);
    assert_eq!(parsed[0]["filename"], "fresh.png");
    assert!(parsed[0].get("displayHandle").is_none());
}

#[tokio::test]
async fn test_gallery_open_shares_store_between_collection_and_key() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("nested").join("galleria.db");

    let gallery = Gallery::open(&db_path, &TomlConfig::default()).await.unwrap();
    gallery.credentials.set("abcd1234efgh5678").await.unwrap();
    gallery.repository.add_many(vec![png("a.png", 5)]).await.unwrap();

    let reopened = Gallery::open(&db_path, &TomlConfig::default()).await.unwrap();
    assert_eq!(
        reopened.credentials.get().await.unwrap().as_deref(),
        Some("abcd1234efgh5678")
    );
    assert_eq!(reopened.repository.len().await, 1);
}
