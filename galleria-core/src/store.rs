//! Persistent store adapter
//!
//! The whole collection is stored as one JSON array under a single key.
//! Display handles are stripped on save and minted again on load from each
//! record's data URI.
//!
//! **Failure policy:**
//! - Quota exceeded on save: warning + `StorageDegraded` event, the in-memory
//!   collection is unaffected (`SaveOutcome::MemoryOnly`)
//! - Any other save failure: returned to the caller
//! - Load never fails: missing, unreadable or corrupt payloads yield an empty
//!   collection

use crate::codec::ImageCodec;
use crate::models::{ImageMetadata, ImageRecord, TagInfo};
use chrono::{DateTime, Utc};
use galleria_common::events::{EventBus, GalleryEvent};
use galleria_common::kv::{KeyValueStore, KvError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Key holding the serialized collection
pub const COLLECTION_KEY: &str = "galleria_images";

/// Store adapter errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage write failed: {0}")]
    Write(#[source] KvError),

    #[error("Failed to serialize collection: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("Stored collection is corrupt: {0}")]
    Parse(#[source] serde_json::Error),
}

/// Result of a save cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Written to durable storage
    Persisted,
    /// Rejected by the storage quota; only the in-memory copy is current
    MemoryOnly,
}

/// Durable form of an `ImageRecord` (no display handle)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredImage {
    id: Uuid,
    filename: String,
    encoded_bytes: String,
    uploaded_at: DateTime<Utc>,
    #[serde(default)]
    analyzed: bool,
    #[serde(default)]
    metadata: Option<ImageMetadata>,
    #[serde(default)]
    custom_tags: Vec<TagInfo>,
}

impl From<&ImageRecord> for StoredImage {
    fn from(record: &ImageRecord) -> Self {
        Self {
            id: record.id,
            filename: record.filename.clone(),
            encoded_bytes: record.encoded_bytes.clone(),
            uploaded_at: record.uploaded_at,
            analyzed: record.analyzed,
            metadata: record.metadata.clone(),
            custom_tags: record.custom_tags.clone(),
        }
    }
}

/// Reads and writes the collection under one key
#[derive(Clone)]
pub struct CollectionStore {
    kv: Arc<dyn KeyValueStore>,
    codec: ImageCodec,
    event_bus: EventBus,
    key: String,
}

impl CollectionStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, codec: ImageCodec, event_bus: EventBus) -> Self {
        Self {
            kv,
            codec,
            event_bus,
            key: COLLECTION_KEY.to_string(),
        }
    }

    pub fn codec(&self) -> &ImageCodec {
        &self.codec
    }

    /// Serialize and write the full collection
    pub async fn save(&self, records: &[ImageRecord]) -> Result<SaveOutcome, StoreError> {
        let stored: Vec<StoredImage> = records.iter().map(StoredImage::from).collect();
        let payload = serde_json::to_string(&stored).map_err(StoreError::Serialize)?;

        match self.kv.set(&self.key, &payload).await {
            Ok(()) => {
                tracing::debug!(count = records.len(), bytes = payload.len(), "Collection saved");
                Ok(SaveOutcome::Persisted)
            }
            Err(e) if e.is_quota_exceeded() => {
                tracing::warn!(
                    count = records.len(),
                    bytes = payload.len(),
                    "Storage quota exceeded - operating in memory-only mode: {}",
                    e
                );
                self.event_bus.emit_lossy(GalleryEvent::StorageDegraded {
                    message: format!(
                        "Storage is full; {} are kept in memory only until space is freed.",
                        galleria_common::events::pluralize_images(records.len())
                    ),
                    timestamp: Utc::now(),
                });
                Ok(SaveOutcome::MemoryOnly)
            }
            Err(e) => Err(StoreError::Write(e)),
        }
    }

    /// Read the stored collection and mint display handles
    ///
    /// Never fails. Records whose data URI cannot be decoded, or whose id
    /// repeats an earlier record, are skipped with a warning.
    pub async fn load(&self) -> Vec<ImageRecord> {
        let payload = match self.kv.get(&self.key).await {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                tracing::debug!("No stored collection, starting empty");
                return Vec::new();
            }
            Err(e) => {
                tracing::error!("Failed to read stored collection, starting empty: {}", e);
                return Vec::new();
            }
        };

        let stored = match parse_payload(&payload) {
            Ok(stored) => stored,
            Err(e) => {
                tracing::error!("Failed to parse saved images, starting empty: {}", e);
                return Vec::new();
            }
        };

        let mut seen = HashSet::with_capacity(stored.len());
        let mut records = Vec::with_capacity(stored.len());

        for image in stored {
            if !seen.insert(image.id) {
                tracing::warn!(image_id = %image.id, "Skipping stored image with duplicate id");
                continue;
            }

            let display_handle = match self.codec.reencode(&image.encoded_bytes) {
                Ok(handle) => handle,
                Err(e) => {
                    tracing::warn!(
                        image_id = %image.id,
                        filename = %image.filename,
                        "Skipping stored image with unreadable data: {}",
                        e
                    );
                    continue;
                }
            };

            // analyzed and metadata travel together
            let analyzed = image.analyzed && image.metadata.is_some();
            let metadata = if analyzed { image.metadata } else { None };

            records.push(ImageRecord {
                id: image.id,
                display_handle,
                encoded_bytes: image.encoded_bytes,
                filename: image.filename,
                uploaded_at: image.uploaded_at,
                analyzed,
                metadata,
                custom_tags: image.custom_tags,
            });
        }

        tracing::info!(count = records.len(), "Loaded stored collection");
        records
    }
}

fn parse_payload(payload: &str) -> Result<Vec<StoredImage>, StoreError> {
    serde_json::from_str(payload).map_err(StoreError::Parse)
}

impl std::fmt::Debug for CollectionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionStore")
            .field("key", &self.key)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_data_uri;
    use galleria_common::kv::MemoryKvStore;

    fn record(codec: &ImageCodec, filename: &str, bytes: &[u8]) -> ImageRecord {
        let encoded_bytes = encode_data_uri("image/png", bytes);
        ImageRecord {
            id: Uuid::new_v4(),
            display_handle: codec.reencode(&encoded_bytes).unwrap(),
            encoded_bytes,
            filename: filename.to_string(),
            uploaded_at: Utc::now(),
            analyzed: false,
            metadata: None,
            custom_tags: vec![],
        }
    }

    fn store_over(kv: Arc<dyn KeyValueStore>) -> CollectionStore {
        CollectionStore::new(kv, ImageCodec::new(), EventBus::new(16))
    }

    #[tokio::test]
    async fn test_save_load_preserves_durable_fields() {
        let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryKvStore::new());
        let store = store_over(kv.clone());

        let mut analyzed = record(store.codec(), "beach.png", b"sand");
        analyzed.analyzed = true;
        analyzed.metadata = Some(ImageMetadata {
            medium: Some("Photography".to_string()),
            colors: vec!["blue".to_string()],
            ..Default::default()
        });
        analyzed.custom_tags = vec![TagInfo::new("summer", "#ff0000"), TagInfo::new("trip", "#00ff00")];
        let plain = record(store.codec(), "cat.png", b"meow");

        let saved = vec![analyzed, plain];
        assert_eq!(store.save(&saved).await.unwrap(), SaveOutcome::Persisted);

        // Fresh adapter, fresh codec: handles must be re-minted
        let reloaded = store_over(kv).load().await;
        assert_eq!(reloaded.len(), 2);
        for (before, after) in saved.iter().zip(reloaded.iter()) {
            assert_eq!(after.id, before.id);
            assert_eq!(after.filename, before.filename);
            assert_eq!(after.uploaded_at, before.uploaded_at);
            assert_eq!(after.analyzed, before.analyzed);
            assert_eq!(after.metadata, before.metadata);
            assert_eq!(after.custom_tags, before.custom_tags);
            assert_eq!(after.encoded_bytes, before.encoded_bytes);
            assert_ne!(after.display_handle, before.display_handle);
        }
    }

    #[tokio::test]
    async fn test_payload_has_no_display_handle() {
        let kv = Arc::new(MemoryKvStore::new());
        let store = store_over(kv.clone());
        let image = record(store.codec(), "a.png", b"abc");

        store.save(&[image.clone()]).await.unwrap();

        let payload = kv.get(COLLECTION_KEY).await.unwrap().unwrap();
        assert!(!payload.contains(&image.display_handle.url()));
        assert!(!payload.contains("displayHandle"));
        assert!(payload.contains("encodedBytes"));
    }

    #[tokio::test]
    async fn test_quota_exceeded_degrades_to_memory_only() {
        let kv = Arc::new(MemoryKvStore::with_quota(32));
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let store = CollectionStore::new(kv.clone(), ImageCodec::new(), bus);

        let big = record(store.codec(), "big.png", &[7u8; 256]);
        let outcome = store.save(&[big]).await.unwrap();

        assert_eq!(outcome, SaveOutcome::MemoryOnly);
        assert!(kv.get(COLLECTION_KEY).await.unwrap().is_none());
        assert!(matches!(
            rx.try_recv().unwrap(),
            GalleryEvent::StorageDegraded { .. }
        ));
    }

    #[tokio::test]
    async fn test_load_missing_and_corrupt_payloads_are_empty() {
        let kv = Arc::new(MemoryKvStore::new());
        let store = store_over(kv.clone());

        assert!(store.load().await.is_empty());

        kv.set(COLLECTION_KEY, "{not json").await.unwrap();
        assert!(store.load().await.is_empty());

        kv.set(COLLECTION_KEY, r#"{"id": 1}"#).await.unwrap();
        assert!(store.load().await.is_empty());
    }

    #[tokio::test]
    async fn test_load_skips_unreadable_and_duplicate_records() {
        let kv = Arc::new(MemoryKvStore::new());
        let store = store_over(kv.clone());

        let good = record(store.codec(), "good.png", b"ok");
        let mut broken = record(store.codec(), "broken.png", b"no");
        broken.encoded_bytes = "garbage".to_string();
        let duplicate = ImageRecord {
            filename: "dupe.png".to_string(),
            ..good.clone()
        };

        store.save(&[good.clone(), broken, duplicate]).await.unwrap();

        let loaded = store.load().await;
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, good.id);
        assert_eq!(loaded[0].filename, "good.png");
    }

    #[tokio::test]
    async fn test_load_drops_metadata_without_analyzed_flag() {
        let kv = Arc::new(MemoryKvStore::new());
        let store = store_over(kv.clone());

        let payload = serde_json::json!([{
            "id": Uuid::new_v4(),
            "filename": "x.png",
            "encodedBytes": encode_data_uri("image/png", b"x"),
            "uploadedAt": Utc::now(),
            "analyzed": true
        }]);
        kv.set(COLLECTION_KEY, &payload.to_string()).await.unwrap();

        let loaded = store.load().await;
        assert_eq!(loaded.len(), 1);
        assert!(!loaded[0].analyzed);
        assert!(loaded[0].custom_tags.is_empty());
    }
}
