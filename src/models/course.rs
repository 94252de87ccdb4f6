//! Course and enrollment models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A course within a subject, owned by an instructor. Listed newest first.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Course {
    pub id: i64,
    /// Instructor who created the course
    pub owner_id: i64,
    pub subject_id: i64,
    pub title: Option<String>,
    /// URL-safe identifier, set once on creation
    pub slug: String,
    pub overview: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl fmt::Display for Course {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title.as_deref().unwrap_or(""))
    }
}

/// A student's membership in a course
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Enrollment {
    pub course_id: i64,
    pub user_id: i64,
    pub enrolled_at: DateTime<Utc>,
}

/// Input for creating a course
#[derive(Debug, Clone)]
pub struct CreateCourseInput {
    pub owner_id: i64,
    pub subject_id: i64,
    pub title: Option<String>,
    /// Explicit slug; generated from the title when absent
    pub slug: Option<String>,
    pub overview: Option<String>,
}

impl CreateCourseInput {
    pub fn new(owner_id: i64, subject_id: i64, title: impl Into<String>) -> Self {
        Self {
            owner_id,
            subject_id,
            title: Some(title.into()),
            slug: None,
            overview: None,
        }
    }

    pub fn untitled(owner_id: i64, subject_id: i64) -> Self {
        Self {
            owner_id,
            subject_id,
            title: None,
            slug: None,
            overview: None,
        }
    }

    pub fn with_slug(mut self, slug: impl Into<String>) -> Self {
        self.slug = Some(slug.into());
        self
    }

    pub fn with_overview(mut self, overview: impl Into<String>) -> Self {
        self.overview = Some(overview.into());
        self
    }
}

/// Input for updating a course. The slug and owner are never changed.
#[derive(Debug, Clone, Default)]
pub struct UpdateCourseInput {
    pub title: Option<Option<String>>,
    pub overview: Option<Option<String>>,
    /// Move the course to another subject
    pub subject_id: Option<i64>,
}

/// The enroll form: a single hidden field carrying the course id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CourseEnrollInput {
    pub course_id: i64,
}

impl FromStr for CourseEnrollInput {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<i64>()
            .ok()
            .filter(|id| *id > 0)
            .map(|course_id| Self { course_id })
            .ok_or_else(|| format!("Invalid course id: {:?}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enroll_input_parses_hidden_field() {
        assert_eq!(" 42 ".parse::<CourseEnrollInput>(), Ok(CourseEnrollInput { course_id: 42 }));
        assert!("".parse::<CourseEnrollInput>().is_err());
        assert!("0".parse::<CourseEnrollInput>().is_err());
        assert!("abc".parse::<CourseEnrollInput>().is_err());
    }

    #[test]
    fn test_create_course_builder() {
        let input = CreateCourseInput::new(1, 2, "Rust").with_overview("Ownership").with_slug("rust-101");
        assert_eq!(input.title.as_deref(), Some("Rust"));
        assert_eq!(input.overview.as_deref(), Some("Ownership"));
        assert_eq!(input.slug.as_deref(), Some("rust-101"));

        let untitled = CreateCourseInput::untitled(1, 2);
        assert!(untitled.title.is_none());
    }
}
