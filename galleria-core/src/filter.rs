//! Filter/search over the collection
//!
//! Pure functions; output preserves input order.
//!
//! Per-record policy:
//! 1. Any structured filter set + record not analyzed: excluded
//! 2. Non-empty query: case-insensitive substring match against filename,
//!    tag text and (when analyzed) the descriptive metadata fields.
//!    Structured filters are not applied in this mode.
//! 3. No query: every set structured filter must match its metadata field
//!    (case-insensitive substring) when the record has that field, and, if
//!    required tags are set, at least one tag must contain at least one of
//!    them.

use crate::models::{ImageMetadata, ImageRecord, MetadataField, SearchFilters};
use std::collections::BTreeSet;

/// Records matching `criteria`, in input order
pub fn filter_images<'a>(records: &'a [ImageRecord], criteria: &SearchFilters) -> Vec<&'a ImageRecord> {
    if criteria.is_empty() {
        return records.iter().collect();
    }

    let query = criteria.query.to_lowercase();
    records
        .iter()
        .filter(|record| matches_lowered(record, criteria, &query))
        .collect()
}

/// True if a single record passes `criteria`
pub fn matches(record: &ImageRecord, criteria: &SearchFilters) -> bool {
    matches_lowered(record, criteria, &criteria.query.to_lowercase())
}

fn matches_lowered(record: &ImageRecord, criteria: &SearchFilters, query: &str) -> bool {
    if criteria.has_structured_filters() && !record.analyzed {
        return false;
    }

    if !query.is_empty() {
        return matches_query(record, query);
    }

    let structured_ok = MetadataField::ALL.iter().all(|field| {
        match structured_criterion(criteria, *field) {
            // A field the model left out does not exclude the record
            Some(wanted) => record
                .metadata
                .as_ref()
                .and_then(|m| field.value(m))
                .map_or(true, |value| contains_ignore_case(value, wanted)),
            None => true,
        }
    });
    if !structured_ok {
        return false;
    }

    match criteria.required_tags() {
        Some(required) => record.custom_tags.iter().any(|tag| {
            required
                .iter()
                .any(|wanted| contains_ignore_case(&tag.text, wanted))
        }),
        None => true,
    }
}

fn structured_criterion(criteria: &SearchFilters, field: MetadataField) -> Option<&str> {
    match field {
        MetadataField::Medium => criteria.medium(),
        MetadataField::Environment => criteria.environment(),
        MetadataField::Style => criteria.style(),
        MetadataField::Mood => criteria.mood(),
    }
}

/// `query` must already be lowercase
fn matches_query(record: &ImageRecord, query: &str) -> bool {
    let hit = |text: &str| text.to_lowercase().contains(query);

    if hit(&record.filename) || record.custom_tags.iter().any(|t| hit(&t.text)) {
        return true;
    }

    match (&record.metadata, record.analyzed) {
        (Some(metadata), true) => metadata_text(metadata).any(hit),
        _ => false,
    }
}

fn metadata_text(metadata: &ImageMetadata) -> impl Iterator<Item = &str> {
    [
        metadata.medium.as_deref(),
        metadata.environment.as_deref(),
        metadata.style.as_deref(),
        metadata.mood.as_deref(),
        metadata.scene.as_deref(),
    ]
    .into_iter()
    .flatten()
    .chain(metadata.colors.iter().map(String::as_str))
    .chain(metadata.actions.iter().map(String::as_str))
    .chain(metadata.clothes.iter().map(String::as_str))
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Distinct values of `field` across analyzed records, sorted
///
/// Used to populate structured filter choices.
pub fn facet_values(records: &[ImageRecord], field: MetadataField) -> Vec<String> {
    records
        .iter()
        .filter(|r| r.analyzed)
        .filter_map(|r| r.metadata.as_ref())
        .filter_map(|m| field.value(m))
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
