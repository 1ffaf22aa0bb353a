//! Analysis coordinator
//!
//! Runs the remote analyzer over every unanalyzed image, one request at a
//! time, in collection order.
//!
//! **Run lifecycle:** Idle → Running → Idle
//! - A second `run` while running: `AlreadyAnalyzing`, run not started
//! - No credential: `MissingCredential`, run not started
//! - Nothing unanalyzed: empty summary
//! - Per-image failures (analyzer or save) are logged and skipped; the run
//!   always completes with a single `AnalysisCompleted` event

use crate::error::{GalleryError, GalleryResult};
use crate::repository::ImageRepository;
use crate::services::credentials::CredentialStore;
use crate::services::gemini_client::ImageAnalyzer;
use chrono::Utc;
use galleria_common::config::TomlConfig;
use galleria_common::events::{AnalysisSkipReason, GalleryEvent};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome counts of one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnalysisSummary {
    /// Unanalyzed images when the run started
    pub requested: usize,
    /// Results merged into the collection
    pub analyzed: usize,
    /// Analyzer calls or result saves that failed
    pub failed: usize,
    /// Successful results dropped because the image was removed mid-run
    pub vanished: usize,
}

/// Clears the running flag when a run ends, including on early return
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Sequential, failure-isolating analysis pipeline
pub struct AnalysisCoordinator {
    repository: ImageRepository,
    analyzer: Arc<dyn ImageAnalyzer>,
    credentials: CredentialStore,
    toml_config: TomlConfig,
    running: AtomicBool,
}

impl AnalysisCoordinator {
    pub fn new(
        repository: ImageRepository,
        analyzer: Arc<dyn ImageAnalyzer>,
        credentials: CredentialStore,
        toml_config: TomlConfig,
    ) -> Self {
        Self {
            repository,
            analyzer,
            credentials,
            toml_config,
            running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn skip(&self, reason: AnalysisSkipReason) {
        self.repository.event_bus().emit_lossy(GalleryEvent::AnalysisSkipped {
            reason,
            timestamp: Utc::now(),
        });
    }

    /// Analyze every image not yet analyzed
    pub async fn run(&self) -> GalleryResult<AnalysisSummary> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("Analysis already running, ignoring request");
            self.skip(AnalysisSkipReason::AlreadyRunning);
            return Err(GalleryError::AlreadyAnalyzing);
        }
        let _guard = RunGuard(&self.running);

        let Some((credential, source)) = self.credentials.resolve(&self.toml_config).await else {
            warn!("Analysis requested without a Gemini API key");
            self.skip(AnalysisSkipReason::MissingCredential);
            return Err(GalleryError::MissingCredential);
        };
        debug!(source = %source, "Using Gemini API key");

        let pending = self.repository.pending_analysis().await;
        if pending.is_empty() {
            info!("No images to analyze");
            self.skip(AnalysisSkipReason::NothingToAnalyze);
            return Ok(AnalysisSummary::default());
        }

        let total = pending.len();
        let bus = self.repository.event_bus();
        let mut summary = AnalysisSummary {
            requested: total,
            ..Default::default()
        };

        info!(total, "Analysis started");
        bus.emit_lossy(GalleryEvent::AnalysisStarted {
            total,
            timestamp: Utc::now(),
        });

        for (index, image) in pending.into_iter().enumerate() {
            let current = index + 1;

            let success = match self.analyzer.analyze(&image.encoded_bytes, &credential).await {
                Ok(metadata) => match self.repository.merge_analysis(image.id, metadata).await {
                    Ok(true) => {
                        summary.analyzed += 1;
                        debug!(image_id = %image.id, current, total, "Image analyzed");
                        true
                    }
                    Ok(false) => {
                        summary.vanished += 1;
                        true
                    }
                    Err(e) => {
                        summary.failed += 1;
                        warn!(
                            image_id = %image.id,
                            filename = %image.filename,
                            "Error saving analysis result, continuing: {}",
                            e
                        );
                        false
                    }
                },
                Err(e) => {
                    summary.failed += 1;
                    warn!(
                        image_id = %image.id,
                        filename = %image.filename,
                        "Error analyzing image, continuing: {}",
                        e
                    );
                    false
                }
            };

            bus.emit_lossy(GalleryEvent::AnalysisProgress {
                image_id: image.id,
                current,
                total,
                success,
                timestamp: Utc::now(),
            });
        }

        info!(
            analyzed = summary.analyzed,
            failed = summary.failed,
            vanished = summary.vanished,
            "Analysis complete"
        );
        bus.emit_lossy(GalleryEvent::AnalysisCompleted {
            analyzed: summary.analyzed,
            failed: summary.failed,
            timestamp: Utc::now(),
        });

        Ok(summary)
    }
}
