//! Image records and analysis metadata

use crate::codec::DisplayHandle;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// One uploaded image and its derived state
///
/// Records handed out by the repository are snapshots; all mutation goes
/// through `ImageRepository` so the id and handle invariants hold.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRecord {
    /// Unique id, assigned at creation and never reused
    pub id: Uuid,

    /// Ephemeral handle to the decoded bytes (never persisted)
    pub display_handle: DisplayHandle,

    /// `data:<mime>;base64,<payload>` encoding of the original file
    pub encoded_bytes: String,

    pub filename: String,

    /// Set once at creation
    pub uploaded_at: DateTime<Utc>,

    /// True once analysis succeeded; `metadata` is present iff this is true
    pub analyzed: bool,

    pub metadata: Option<ImageMetadata>,

    /// Tag texts are unique within a record
    pub custom_tags: Vec<TagInfo>,
}

impl ImageRecord {
    pub fn has_tag(&self, text: &str) -> bool {
        self.custom_tags.iter().any(|t| t.text == text)
    }

    pub fn tag(&self, text: &str) -> Option<&TagInfo> {
        self.custom_tags.iter().find(|t| t.text == text)
    }
}

/// User-defined tag; `color` is display-only and ignored by search
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagInfo {
    pub text: String,
    pub color: String,
}

impl TagInfo {
    /// Default badge color for new tags
    pub const DEFAULT_COLOR: &'static str = "#9b87f5";

    pub fn new(text: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            color: color.into(),
        }
    }
}

/// Structured analysis result
///
/// Every field is optional: the remote model omits what it cannot determine.
/// Field names match the JSON keys requested from the model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medium: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub people: Option<People>,

    #[serde(
        default,
        deserialize_with = "deserialize_list",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub actions: Vec<String>,

    #[serde(
        default,
        deserialize_with = "deserialize_list",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub clothes: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,

    #[serde(
        default,
        deserialize_with = "deserialize_list",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub colors: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mood: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene: Option<String>,
}

/// People visible in the image
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct People {
    #[serde(
        default,
        deserialize_with = "deserialize_count",
        skip_serializing_if = "Option::is_none"
    )]
    pub count: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age_estimate: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
}

/// Accepts `2`, `"2"` or `null`; the model is not consistent about quoting numbers
fn deserialize_count<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Count {
        Number(u32),
        Text(String),
    }

    match Option::<Count>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Count::Number(n)) => Ok(Some(n)),
        Some(Count::Text(s)) => Ok(s.trim().parse().ok()),
    }
}

/// Treats `null` like a missing list
fn deserialize_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Single-valued metadata fields usable as structured filters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetadataField {
    Medium,
    Environment,
    Style,
    Mood,
}

impl MetadataField {
    pub const ALL: [MetadataField; 4] = [
        MetadataField::Medium,
        MetadataField::Environment,
        MetadataField::Style,
        MetadataField::Mood,
    ];

    pub fn value<'a>(&self, metadata: &'a ImageMetadata) -> Option<&'a str> {
        match self {
            MetadataField::Medium => metadata.medium.as_deref(),
            MetadataField::Environment => metadata.environment.as_deref(),
            MetadataField::Style => metadata.style.as_deref(),
            MetadataField::Mood => metadata.mood.as_deref(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MetadataField::Medium => "medium",
            MetadataField::Environment => "environment",
            MetadataField::Style => "style",
            MetadataField::Mood => "mood",
        }
    }
}

impl std::fmt::Display for MetadataField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
