//! Subject model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Top-level grouping of courses, listed by title.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Subject {
    pub id: i64,
    /// Unique when present
    pub title: Option<String>,
    /// URL-safe identifier, set once on creation
    pub slug: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title.as_deref().unwrap_or(""))
    }
}

/// Input for creating a subject.
///
/// Without an explicit slug one is generated from the title.
#[derive(Debug, Clone, Default)]
pub struct CreateSubjectInput {
    pub title: Option<String>,
    pub slug: Option<String>,
}

impl CreateSubjectInput {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            slug: None,
        }
    }

    /// A subject with no title
    pub fn untitled() -> Self {
        Self::default()
    }

    pub fn with_slug(mut self, slug: impl Into<String>) -> Self {
        self.slug = Some(slug.into());
        self
    }
}

/// Input for updating a subject. The slug is never changed.
#[derive(Debug, Clone, Default)]
pub struct UpdateSubjectInput {
    /// `Some(None)` clears the title
    pub title: Option<Option<String>>,
}

impl UpdateSubjectInput {
    pub fn title(title: Option<String>) -> Self {
        Self { title: Some(title) }
    }
}
