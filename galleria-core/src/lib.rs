//! galleria-core library interface
//!
//! Image collection state manager: codec, persistent store adapter,
//! collection repository, analysis coordinator and filter engine.

pub mod codec;
pub mod error;
pub mod filter;
pub mod models;
pub mod repository;
pub mod services;
pub mod store;

pub use crate::error::{GalleryError, GalleryResult};

use crate::codec::ImageCodec;
use crate::repository::ImageRepository;
use crate::services::{AnalysisCoordinator, CredentialStore, GeminiClient, ImageAnalyzer};
use crate::store::CollectionStore;
use galleria_common::config::TomlConfig;
use galleria_common::db::SqliteKvStore;
use galleria_common::events::EventBus;
use galleria_common::kv::KeyValueStore;
use std::path::Path;
use std::sync::Arc;

/// Event bus capacity for a gallery instance
const EVENT_CAPACITY: usize = 100;

/// Wired-up collection state shared by front ends
#[derive(Clone)]
pub struct Gallery {
    pub repository: ImageRepository,
    pub coordinator: Arc<AnalysisCoordinator>,
    pub credentials: CredentialStore,
    pub event_bus: EventBus,
}

impl Gallery {
    /// Open the SQLite-backed gallery at `db_path`
    pub async fn open(db_path: &Path, config: &TomlConfig) -> GalleryResult<Self> {
        let pool = galleria_common::db::init_database_pool(db_path).await?;
        let kv: Arc<dyn KeyValueStore> =
            Arc::new(SqliteKvStore::new(pool).with_quota(config.storage.quota_bytes));

        let analyzer = GeminiClient::new(&config.analysis).map_err(GalleryError::AnalyzerSetup)?;

        Ok(Self::with_parts(kv, Arc::new(analyzer), config.clone()).await)
    }

    /// Assemble a gallery over an arbitrary store and analyzer
    pub async fn with_parts(
        kv: Arc<dyn KeyValueStore>,
        analyzer: Arc<dyn ImageAnalyzer>,
        config: TomlConfig,
    ) -> Self {
        let event_bus = EventBus::new(EVENT_CAPACITY);
        let store = CollectionStore::new(kv.clone(), ImageCodec::new(), event_bus.clone());
        let repository = ImageRepository::open(store, event_bus.clone()).await;
        let credentials = CredentialStore::new(kv);
        let coordinator = Arc::new(AnalysisCoordinator::new(
            repository.clone(),
            analyzer,
            credentials.clone(),
            config,
        ));

        Self {
            repository,
            coordinator,
            credentials,
            event_bus,
        }
    }
}
