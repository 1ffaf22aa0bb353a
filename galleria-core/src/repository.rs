//! Collection repository
//!
//! Owns the canonical ordered list of images. Every mutating operation:
//! 1. Updates the in-memory list under the write lock
//! 2. Emits `CollectionChanged` (plus an operation-specific event)
//! 3. Saves the full collection through `CollectionStore`
//!
//! Locks are never held across decoding, store I/O or remote calls. Saves are
//! serialized by a dedicated mutex and snapshot the list while holding it, so
//! the last completed save always reflects the newest state.
//!
//! Missing ids are never an error: remove/tag/merge on an unknown id is a
//! logged no-op that returns `Ok(false)`.

use crate::codec::{ImageCodec, UploadFile};
use crate::error::{GalleryError, GalleryResult};
use crate::filter::filter_images;
use crate::models::{ImageMetadata, ImageRecord, SearchFilters, TagInfo};
use crate::store::{CollectionStore, SaveOutcome};
use chrono::Utc;
use futures::future::join_all;
use galleria_common::events::{EventBus, GalleryEvent};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// An image waiting for analysis
#[derive(Debug, Clone)]
pub struct PendingImage {
    pub id: Uuid,
    pub filename: String,
    /// Data URI sent to the analysis service
    pub encoded_bytes: String,
}

#[derive(Debug, Default)]
struct CollectionState {
    images: Vec<ImageRecord>,
    /// Ids removed during this session; never handed out again
    retired_ids: HashSet<Uuid>,
}

impl CollectionState {
    fn position(&self, id: Uuid) -> Option<usize> {
        self.images.iter().position(|r| r.id == id)
    }

    fn find_mut(&mut self, id: Uuid) -> Option<&mut ImageRecord> {
        self.images.iter_mut().find(|r| r.id == id)
    }

    fn fresh_id(&self, taken: &mut HashSet<Uuid>) -> Uuid {
        loop {
            let id = Uuid::new_v4();
            if !self.retired_ids.contains(&id) && taken.insert(id) {
                return id;
            }
        }
    }
}

struct RepositoryInner {
    state: RwLock<CollectionState>,
    persist_lock: Mutex<()>,
    torn_down: AtomicBool,
    store: CollectionStore,
    codec: ImageCodec,
    event_bus: EventBus,
}

/// Shared handle to the image collection
///
/// Cloning is cheap and all clones see the same collection.
#[derive(Clone)]
pub struct ImageRepository {
    inner: Arc<RepositoryInner>,
}

impl ImageRepository {
    /// Load the stored collection and take ownership of its display handles
    pub async fn open(store: CollectionStore, event_bus: EventBus) -> Self {
        let images = store.load().await;
        let codec = store.codec().clone();

        info!(count = images.len(), "Image collection opened");

        Self {
            inner: Arc::new(RepositoryInner {
                state: RwLock::new(CollectionState {
                    images,
                    retired_ids: HashSet::new(),
                }),
                persist_lock: Mutex::new(()),
                torn_down: AtomicBool::new(false),
                store,
                codec,
                event_bus,
            }),
        }
    }

    pub fn codec(&self) -> &ImageCodec {
        &self.inner.codec
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.inner.event_bus
    }

    fn is_torn_down(&self) -> bool {
        self.inner.torn_down.load(Ordering::Acquire)
    }

    fn ensure_live(&self) -> GalleryResult<()> {
        if self.is_torn_down() {
            return Err(GalleryError::TornDown);
        }
        Ok(())
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Current collection, in upload order
    pub async fn snapshot(&self) -> Vec<ImageRecord> {
        self.inner.state.read().await.images.clone()
    }

    pub async fn get(&self, id: Uuid) -> Option<ImageRecord> {
        let state = self.inner.state.read().await;
        state.images.iter().find(|r| r.id == id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.inner.state.read().await.images.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Images not yet analyzed, in collection order
    pub async fn pending_analysis(&self) -> Vec<PendingImage> {
        let state = self.inner.state.read().await;
        state
            .images
            .iter()
            .filter(|r| !r.analyzed)
            .map(|r| PendingImage {
                id: r.id,
                filename: r.filename.clone(),
                encoded_bytes: r.encoded_bytes.clone(),
            })
            .collect()
    }

    /// Current collection narrowed by `criteria`
    pub async fn filtered(&self, criteria: &SearchFilters) -> Vec<ImageRecord> {
        let state = self.inner.state.read().await;
        filter_images(&state.images, criteria)
            .into_iter()
            .cloned()
            .collect()
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Decode and append a batch of uploads
    ///
    /// Files are decoded concurrently and appended in input order in one step.
    /// All-or-nothing: if any file fails to decode, the handles already minted
    /// for the batch are released, nothing is appended, and the error reports
    /// how many files did decode.
    pub async fn add_many(&self, files: Vec<UploadFile>) -> GalleryResult<Vec<ImageRecord>> {
        self.ensure_live()?;

        if files.is_empty() {
            return Ok(Vec::new());
        }

        let total = files.len();
        let codec = &self.inner.codec;
        let results = join_all(files.iter().map(|file| codec.decode(file))).await;

        let mut decoded = Vec::with_capacity(total);
        let mut failure = None;
        for (file, result) in files.iter().zip(results) {
            match result {
                Ok((encoded_bytes, handle)) => decoded.push((file, encoded_bytes, handle)),
                Err(e) => {
                    warn!(filename = %file.name(), "Failed to decode upload: {}", e);
                    if failure.is_none() {
                        failure = Some((file.name().to_string(), e));
                    }
                }
            }
        }

        if let Some((filename, source)) = failure {
            let succeeded = decoded.len();
            for (_, _, handle) in &decoded {
                codec.release(handle);
            }

            error!(succeeded, total, "Upload batch rejected");
            self.inner.event_bus.emit_lossy(GalleryEvent::UploadFailed {
                succeeded,
                total,
                message: format!("{} could not be read: {}", filename, source),
                timestamp: Utc::now(),
            });

            return Err(GalleryError::Upload {
                succeeded,
                total,
                filename,
                source,
            });
        }

        let uploaded_at = Utc::now();
        let new_records = {
            let mut state = self.inner.state.write().await;

            if self.is_torn_down() {
                for (_, _, handle) in &decoded {
                    codec.release(handle);
                }
                return Err(GalleryError::TornDown);
            }

            let mut taken: HashSet<Uuid> = state.images.iter().map(|r| r.id).collect();
            let new_records: Vec<ImageRecord> = decoded
                .into_iter()
                .map(|(file, encoded_bytes, display_handle)| ImageRecord {
                    id: state.fresh_id(&mut taken),
                    display_handle,
                    encoded_bytes,
                    filename: file.name().to_string(),
                    uploaded_at,
                    analyzed: false,
                    metadata: None,
                    custom_tags: Vec::new(),
                })
                .collect();

            state.images.extend(new_records.iter().cloned());
            new_records
        };

        info!(count = new_records.len(), "Images added");
        self.inner.event_bus.emit_lossy(GalleryEvent::ImagesAdded {
            image_ids: new_records.iter().map(|r| r.id).collect(),
            timestamp: Utc::now(),
        });

        self.persist().await?;
        Ok(new_records)
    }

    /// Delete an image and release its display handle
    ///
    /// Returns false (no-op) if the id is not present, so a repeated remove
    /// never revokes twice.
    pub async fn remove(&self, id: Uuid) -> GalleryResult<bool> {
        self.ensure_live()?;

        let removed = {
            let mut state = self.inner.state.write().await;
            self.ensure_live()?;
            match state.position(id) {
                Some(index) => {
                    let record = state.images.remove(index);
                    state.retired_ids.insert(record.id);
                    Some(record)
                }
                None => None,
            }
        };

        let Some(record) = removed else {
            debug!(image_id = %id, "Remove ignored: image not in collection");
            return Ok(false);
        };

        self.inner.codec.release(&record.display_handle);
        info!(image_id = %id, filename = %record.filename, "Image removed");
        self.inner.event_bus.emit_lossy(GalleryEvent::ImageRemoved {
            image_id: id,
            timestamp: Utc::now(),
        });

        self.persist().await?;
        Ok(true)
    }

    /// Append a tag unless one with the same text exists
    ///
    /// Tag text is taken as given; trimming and rejecting blank text is up
    /// to the caller. There is no replace at this layer; callers wanting to
    /// change a tag's color remove it first (see `recolor_tag`).
    pub async fn add_tag(&self, id: Uuid, tag: TagInfo) -> GalleryResult<bool> {
        self.ensure_live()?;

        let added = {
            let mut state = self.inner.state.write().await;
            self.ensure_live()?;
            match state.find_mut(id) {
                Some(record) if !record.has_tag(&tag.text) => {
                    record.custom_tags.push(tag);
                    true
                }
                Some(_) => {
                    debug!(image_id = %id, tag = %tag.text, "Tag already present");
                    false
                }
                None => {
                    debug!(image_id = %id, "Add tag ignored: image not in collection");
                    false
                }
            }
        };

        if added {
            self.persist().await?;
        }
        Ok(added)
    }

    /// Remove every tag with the given text
    pub async fn remove_tag(&self, id: Uuid, text: &str) -> GalleryResult<bool> {
        self.ensure_live()?;

        let removed = {
            let mut state = self.inner.state.write().await;
            self.ensure_live()?;
            match state.find_mut(id) {
                Some(record) => {
                    let before = record.custom_tags.len();
                    record.custom_tags.retain(|t| t.text != text);
                    record.custom_tags.len() != before
                }
                None => false,
            }
        };

        if removed {
            self.persist().await?;
        } else {
            debug!(image_id = %id, tag = text, "Remove tag ignored: no such tag");
        }
        Ok(removed)
    }

    /// Change a tag's color by removing it and adding it back
    ///
    /// Returns false if the image has no tag with that text.
    pub async fn recolor_tag(
        &self,
        id: Uuid,
        text: &str,
        color: impl Into<String>,
    ) -> GalleryResult<bool> {
        if !self.remove_tag(id, text).await? {
            return Ok(false);
        }
        self.add_tag(id, TagInfo::new(text, color)).await
    }

    /// Record a successful analysis
    ///
    /// No-op if the image was deleted in the meantime or already carries
    /// metadata.
    pub async fn merge_analysis(&self, id: Uuid, metadata: ImageMetadata) -> GalleryResult<bool> {
        self.ensure_live()?;

        let merged = {
            let mut state = self.inner.state.write().await;
            self.ensure_live()?;
            match state.find_mut(id) {
                Some(record) if record.analyzed => {
                    warn!(image_id = %id, "Image already analyzed, keeping existing metadata");
                    false
                }
                Some(record) => {
                    record.analyzed = true;
                    record.metadata = Some(metadata);
                    true
                }
                None => {
                    debug!(image_id = %id, "Analysis result dropped: image no longer in collection");
                    false
                }
            }
        };

        if merged {
            self.persist().await?;
        }
        Ok(merged)
    }

    /// Release every outstanding display handle
    ///
    /// Clears the in-memory list without touching durable storage. Further
    /// mutations fail with `GalleryError::TornDown`. Calling twice releases
    /// nothing the second time.
    pub async fn teardown(&self) -> usize {
        self.inner.torn_down.store(true, Ordering::Release);

        let images = {
            let mut state = self.inner.state.write().await;
            std::mem::take(&mut state.images)
        };

        let released = images
            .iter()
            .filter(|r| self.inner.codec.release(&r.display_handle))
            .count();

        if released > 0 {
            info!(released, "Image collection torn down");
        }
        released
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Save the current list
    ///
    /// A save still queued when `teardown` runs is dropped with `TornDown`;
    /// the emptied list must never reach durable storage.
    async fn persist(&self) -> GalleryResult<SaveOutcome> {
        let _guard = self.inner.persist_lock.lock().await;
        let snapshot = {
            let state = self.inner.state.read().await;
            if self.is_torn_down() {
                warn!("Collection torn down before save, keeping stored copy");
                return Err(GalleryError::TornDown);
            }
            state.images.clone()
        };

        self.inner.event_bus.emit_lossy(GalleryEvent::CollectionChanged {
            count: snapshot.len(),
            timestamp: Utc::now(),
        });

        let outcome = self.inner.store.save(&snapshot).await?;
        Ok(outcome)
    }
}

impl std::fmt::Debug for ImageRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageRepository")
            .field("store", &self.inner.store)
            .field("torn_down", &self.inner.torn_down.load(Ordering::Relaxed))
            .finish()
    }
}
