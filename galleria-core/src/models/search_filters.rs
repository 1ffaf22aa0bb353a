//! Search/filter query state

use serde::{Deserialize, Serialize};

/// Free-text query plus optional structured filters
///
/// Empty strings and empty tag lists count as unset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilters {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub medium: Option<String>,
    #[serde(default)]
    pub environment: Option<String>,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default)]
    pub mood: Option<String>,
    /// Required tag substrings (any one must match)
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

/// Partial update of `SearchFilters`
///
/// Outer `None` leaves a field alone; `Some(None)` clears it.
#[derive(Debug, Clone, Default)]
pub struct FilterUpdate {
    pub query: Option<String>,
    pub medium: Option<Option<String>>,
    pub environment: Option<Option<String>>,
    pub style: Option<Option<String>>,
    pub mood: Option<Option<String>>,
    pub tags: Option<Option<Vec<String>>>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

impl SearchFilters {
    pub fn with_query(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn medium(&self) -> Option<&str> {
        non_empty(&self.medium)
    }

    pub fn environment(&self) -> Option<&str> {
        non_empty(&self.environment)
    }

    pub fn style(&self) -> Option<&str> {
        non_empty(&self.style)
    }

    pub fn mood(&self) -> Option<&str> {
        non_empty(&self.mood)
    }

    /// Required tag substrings, `None` when unset or empty
    pub fn required_tags(&self) -> Option<&[String]> {
        self.tags.as_deref().filter(|tags| !tags.is_empty())
    }

    /// True if any of medium/environment/style/mood is set
    pub fn has_structured_filters(&self) -> bool {
        self.medium().is_some()
            || self.environment().is_some()
            || self.style().is_some()
            || self.mood().is_some()
    }

    /// True if nothing would narrow the collection
    pub fn is_empty(&self) -> bool {
        self.query.is_empty() && !self.has_structured_filters() && self.required_tags().is_none()
    }

    /// Apply a partial update
    pub fn merge(&mut self, update: FilterUpdate) {
        if let Some(query) = update.query {
            self.query = query;
        }
        if let Some(medium) = update.medium {
            self.medium = medium;
        }
        if let Some(environment) = update.environment {
            self.environment = environment;
        }
        if let Some(style) = update.style {
            self.style = style;
        }
        if let Some(mood) = update.mood {
            self.mood = mood;
        }
        if let Some(tags) = update.tags {
            self.tags = tags;
        }
    }

    /// Clear every filter
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
