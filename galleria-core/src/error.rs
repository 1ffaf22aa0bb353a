//! Error types for galleria-core
//!
//! Operation-level failures (upload batch, save) surface as `GalleryError`.
//! Per-item analysis failures never do: the coordinator logs and skips them.

use crate::codec::DecodeError;
use crate::services::AnalysisError;
use crate::store::StoreError;
use thiserror::Error;

/// Collection operation error
#[derive(Debug, Error)]
pub enum GalleryError {
    /// A file in an upload batch could not be decoded; nothing was appended
    #[error("Failed to process {filename} ({succeeded} of {total} files decoded): {source}")]
    Upload {
        /// Files in the batch that decoded successfully
        succeeded: usize,
        total: usize,
        /// First file that failed
        filename: String,
        #[source]
        source: DecodeError,
    },

    /// Durable storage failed for a reason other than quota
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    /// An analysis run is already in progress
    #[error("Images are already being analyzed")]
    AlreadyAnalyzing,

    /// No analysis credential is configured
    #[error("Gemini API key not configured")]
    MissingCredential,

    /// The analysis client could not be constructed
    #[error("Failed to create analysis client: {0}")]
    AnalyzerSetup(#[source] AnalysisError),

    /// The repository was torn down; its handles are released
    #[error("Image collection has been shut down")]
    TornDown,

    /// galleria-common error
    #[error("Common error: {0}")]
    Common(#[from] galleria_common::Error),
}

/// Result type for collection operations
pub type GalleryResult<T> = Result<T, GalleryError>;
