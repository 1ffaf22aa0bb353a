//! Event types for the Galleria event system
//!
//! Provides the collection event definitions and the EventBus. The repository
//! and the analysis coordinator emit events after every state change; front
//! ends subscribe to re-render and to show notifications.

mod notification;

pub use notification::{pluralize_images, Notification, Severity};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Why an analysis run did not start
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisSkipReason {
    /// Another run is in progress
    AlreadyRunning,
    /// No analysis credential is configured
    MissingCredential,
    /// Every image is already analyzed
    NothingToAnalyze,
}

/// Galleria event types
///
/// Events are broadcast via EventBus and serialize with a `type` tag so they
/// can be forwarded to any front end as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GalleryEvent {
    /// Collection contents changed (notification only - pull a snapshot to render)
    CollectionChanged {
        /// Number of images after the change
        count: usize,
        timestamp: DateTime<Utc>,
    },

    /// A batch upload was appended to the collection
    ImagesAdded {
        image_ids: Vec<Uuid>,
        timestamp: DateTime<Utc>,
    },

    /// A batch upload was rejected; nothing was appended
    UploadFailed {
        /// Files decoded successfully before the batch was rejected
        succeeded: usize,
        total: usize,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// An image was deleted
    ImageRemoved {
        image_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// An analysis run started over `total` unanalyzed images
    AnalysisStarted {
        total: usize,
        timestamp: DateTime<Utc>,
    },

    /// One image finished analysis (successfully or not)
    AnalysisProgress {
        image_id: Uuid,
        /// 1-based position within the run
        current: usize,
        total: usize,
        success: bool,
        timestamp: DateTime<Utc>,
    },

    /// An analysis run finished; individual failures are only counted
    AnalysisCompleted {
        analyzed: usize,
        failed: usize,
        timestamp: DateTime<Utc>,
    },

    /// An analysis run did not start
    AnalysisSkipped {
        reason: AnalysisSkipReason,
        timestamp: DateTime<Utc>,
    },

    /// A save hit the storage quota; the collection is memory-only until the next successful save
    StorageDegraded {
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl GalleryEvent {
    /// Human-readable notification for this event, if it warrants one
    ///
    /// Change and progress events return `None`; front ends re-render on those
    /// instead of notifying.
    pub fn notification(&self) -> Option<Notification> {
        match self {
            GalleryEvent::CollectionChanged { .. } | GalleryEvent::AnalysisProgress { .. } => None,
            GalleryEvent::ImagesAdded { image_ids, .. } => Some(Notification::info(
                "Images added",
                format!("{} added successfully.", pluralize_images(image_ids.len())),
            )),
            GalleryEvent::UploadFailed { message, .. } => Some(Notification::error(
                "Error",
                format!("Failed to process images: {}", message),
            )),
            GalleryEvent::ImageRemoved { .. } => Some(Notification::info(
                "Image deleted",
                "Image removed successfully.",
            )),
            GalleryEvent::AnalysisStarted { total, .. } => Some(Notification::info(
                "Analysis started",
                format!("Analyzing {}...", pluralize_images(*total)),
            )),
            GalleryEvent::AnalysisCompleted { .. } => Some(Notification::info(
                "Analysis complete",
                "Image analysis completed successfully.",
            )),
            GalleryEvent::AnalysisSkipped { reason, .. } => Some(match reason {
                AnalysisSkipReason::AlreadyRunning => Notification::warning(
                    "Analysis in progress",
                    "Images are already being analyzed.",
                ),
                AnalysisSkipReason::MissingCredential => Notification::error(
                    "API Key Required",
                    "Please enter your Gemini API key in the settings.",
                ),
                AnalysisSkipReason::NothingToAnalyze => Notification::info(
                    "No images to analyze",
                    "All images have already been analyzed.",
                ),
            }),
            GalleryEvent::StorageDegraded { message, .. } => {
                Some(Notification::warning("Storage full", message.clone()))
            }
        }
    }

    /// Event timestamp
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            GalleryEvent::CollectionChanged { timestamp, .. }
            | GalleryEvent::ImagesAdded { timestamp, .. }
            | GalleryEvent::UploadFailed { timestamp, .. }
            | GalleryEvent::ImageRemoved { timestamp, .. }
            | GalleryEvent::AnalysisStarted { timestamp, .. }
            | GalleryEvent::AnalysisProgress { timestamp, .. }
            | GalleryEvent::AnalysisCompleted { timestamp, .. }
            | GalleryEvent::AnalysisSkipped { timestamp, .. }
            | GalleryEvent::StorageDegraded { timestamp, .. } => *timestamp,
        }
    }
}

// ========================================
// EventBus Implementation
// ========================================

/// Central event distribution bus
///
/// The EventBus uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Automatic cleanup when subscribers drop
/// - Lagged message detection for slow subscribers
///
/// # Examples
///
/// ```
/// use galleria_common::events::{EventBus, GalleryEvent};
///
/// let event_bus = EventBus::new(100);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(GalleryEvent::CollectionChanged {
///     count: 0,
///     timestamp: chrono::Utc::now(),
/// });
///
/// assert!(matches!(rx.try_recv(), Ok(GalleryEvent::CollectionChanged { count: 0, .. })));
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<GalleryEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// `capacity` is the number of events buffered before slow subscribers
    /// start lagging (oldest events dropped).
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<GalleryEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: GalleryEvent,
    ) -> Result<usize, broadcast::error::SendError<GalleryEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: GalleryEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.tx.receiver_count())
            .finish()
    }
}
