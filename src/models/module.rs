//! Module model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// An ordered section of a course.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Module {
    pub id: i64,
    pub course_id: i64,
    pub title: Option<String>,
    pub description: Option<String>,
    /// Position among the course's modules, starting at 0
    pub order: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}. {}", self.order, self.title.as_deref().unwrap_or(""))
    }
}

/// Input for creating a module
#[derive(Debug, Clone)]
pub struct CreateModuleInput {
    pub course_id: i64,
    pub title: Option<String>,
    pub description: Option<String>,
    /// Explicit position; next in the course when absent
    pub order: Option<i32>,
}

impl CreateModuleInput {
    pub fn new(course_id: i64, title: impl Into<String>) -> Self {
        Self {
            course_id,
            title: Some(title.into()),
            description: None,
            order: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = Some(order);
        self
    }
}

/// Input for updating a module. Order changes go through reorder.
#[derive(Debug, Clone, Default)]
pub struct UpdateModuleInput {
    pub title: Option<Option<String>>,
    pub description: Option<Option<String>>,
}
