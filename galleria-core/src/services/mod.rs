//! Service modules
//!
//! - Remote image analysis client (Gemini)
//! - Analysis credential store
//! - Analysis coordinator driving the client over the collection

pub mod analysis_coordinator;
pub mod credentials;
pub mod gemini_client;

pub use analysis_coordinator::{AnalysisCoordinator, AnalysisSummary};
pub use credentials::{mask_key, CredentialSource, CredentialStore};
pub use gemini_client::{AnalysisError, GeminiClient, ImageAnalyzer};
