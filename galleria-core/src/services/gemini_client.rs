//! Gemini vision API client
//!
//! Sends one image per request to the `generateContent` endpoint and parses
//! the model's JSON answer into `ImageMetadata`.

use crate::codec::split_data_uri;
use crate::models::ImageMetadata;
use async_trait::async_trait;
use galleria_common::config::AnalysisConfig;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;

const USER_AGENT: &str = concat!("Galleria/", env!("CARGO_PKG_VERSION"));

const ANALYSIS_PROMPT: &str = "\
Analyze this image in detail and provide the following information in a structured JSON format:

1. medium: What type of image is this? (Photography, Painting, Digital Art, etc.)
2. people: Information about people in the image
   - count: Number of people
   - ageEstimate: Estimated age range
   - gender: Gender(s) present
3. actions: What actions are being performed? (list)
4. clothes: What type of clothing is visible? (list)
5. environment: Is it indoor, outdoor, city, nature, etc.?
6. colors: Top 3 dominant colors (list)
7. style: The style of the image (abstract, realistic, vintage, modern, etc.)
8. mood: The overall mood of the image (happy, dramatic, nostalgic, etc.)
9. scene: Short description of the scene (30-40 words maximum)

Return ONLY the JSON without any additional text.";

/// Per-image analysis errors
///
/// Never fatal to a run; the coordinator logs and moves on.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Invalid API key")]
    InvalidCredential,

    #[error("API error {0}: {1}")]
    ApiError(u16, String),

    #[error("No response from Gemini API")]
    NoCandidates,

    #[error("Gemini response contained no text")]
    MissingText,

    #[error("Failed to parse API response: {0}")]
    ParseError(String),

    #[error("Image data is not a base64 data URI")]
    InvalidImage,
}

/// Remote image analysis collaborator
#[async_trait]
pub trait ImageAnalyzer: Send + Sync {
    /// Describe one image given as a `data:` URI
    async fn analyze(&self, data_uri: &str, credential: &str) -> Result<ImageMetadata, AnalysisError>;
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text { text: &'a str },
    InlineData { inline_data: InlineData<'a> },
}

#[derive(Debug, Serialize)]
struct InlineData<'a> {
    mime_type: &'a str,
    data: &'a str,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: u32,
    max_output_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.4,
            top_p: 1.0,
            top_k: 32,
            max_output_tokens: 2048,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

fn build_request(data_uri: &str) -> Result<GenerateRequest<'_>, AnalysisError> {
    let (mime_type, data) = split_data_uri(data_uri).map_err(|_| AnalysisError::InvalidImage)?;

    Ok(GenerateRequest {
        contents: vec![Content {
            parts: vec![
                Part::Text {
                    text: ANALYSIS_PROMPT,
                },
                Part::InlineData {
                    inline_data: InlineData { mime_type, data },
                },
            ],
        }],
        generation_config: GenerationConfig::default(),
    })
}

/// First text part of the first candidate
fn response_text(response: GenerateResponse) -> Result<String, AnalysisError> {
    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or(AnalysisError::NoCandidates)?;

    candidate
        .content
        .and_then(|c| c.parts.into_iter().next())
        .and_then(|p| p.text)
        .ok_or(AnalysisError::MissingText)
}

/// Remove markdown code fence markers the model sometimes wraps JSON in
pub fn strip_code_fences(text: &str) -> &str {
    let text = text.trim();
    let text = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
        .unwrap_or(text);
    let text = text.trim_end();
    text.strip_suffix("```").unwrap_or(text).trim()
}

/// Parse the model's answer into metadata
pub fn parse_metadata_text(text: &str) -> Result<ImageMetadata, AnalysisError> {
    let json = strip_code_fences(text);
    serde_json::from_str(json).map_err(|e| {
        tracing::debug!(response = %text, "Unparsable analysis response");
        AnalysisError::ParseError(e.to_string())
    })
}

// ============================================================================
// Client
// ============================================================================

/// Enforces a minimum interval between requests
struct RateLimiter {
    last_request: Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl RateLimiter {
    fn new(min_interval_ms: u64) -> Self {
        Self {
            last_request: Mutex::new(None),
            min_interval: Duration::from_millis(min_interval_ms),
        }
    }

    async fn wait(&self) {
        let mut last = self.last_request.lock().await;

        if let Some(last_time) = *last {
            let elapsed = last_time.elapsed();
            if elapsed < self.min_interval {
                let wait_time = self.min_interval - elapsed;
                tracing::debug!("Gemini rate limiting: waiting {:?}", wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }

        *last = Some(Instant::now());
    }
}

/// Gemini API client
pub struct GeminiClient {
    http_client: reqwest::Client,
    rate_limiter: Arc<RateLimiter>,
    endpoint: String,
}

impl GeminiClient {
    pub fn new(config: &AnalysisConfig) -> Result<Self, AnalysisError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AnalysisError::NetworkError(e.to_string()))?;

        Ok(Self {
            http_client,
            rate_limiter: Arc::new(RateLimiter::new(config.rate_limit_ms)),
            endpoint: format!(
                "{}/models/{}:generateContent",
                config.base_url.trim_end_matches('/'),
                config.model
            ),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ImageAnalyzer for GeminiClient {
    async fn analyze(&self, data_uri: &str, credential: &str) -> Result<ImageMetadata, AnalysisError> {
        let request = build_request(data_uri)?;

        self.rate_limiter.wait().await;

        tracing::debug!(bytes = data_uri.len(), "Querying Gemini API");

        let response = self
            .http_client
            .post(&self.endpoint)
            .query(&[("key", credential)])
            .json(&request)
            .send()
            .await
            .map_err(|e| AnalysisError::NetworkError(e.to_string()))?;

        let status = response.status();
        tracing::debug!(status_code = status.as_u16(), "Gemini API response");

        if status == 401 || status == 403 {
            return Err(AnalysisError::InvalidCredential);
        }

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AnalysisError::ApiError(status.as_u16(), error_text));
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| AnalysisError::ParseError(e.to_string()))?;

        let metadata = parse_metadata_text(&response_text(body)?)?;

        tracing::info!(
            medium = metadata.medium.as_deref().unwrap_or("-"),
            "Gemini analysis successful"
        );

        Ok(metadata)
    }
}
