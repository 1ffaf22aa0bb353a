//! Data models for the image collection
//!
//! - `ImageRecord`: one uploaded image and its derived state
//! - `ImageMetadata`: structured result of remote analysis
//! - `SearchFilters`: query state for the filter engine

pub mod image_record;
pub mod search_filters;

pub use image_record::{ImageMetadata, ImageRecord, MetadataField, People, TagInfo};
pub use search_filters::{FilterUpdate, SearchFilters};
