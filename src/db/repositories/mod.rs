//! Database repositories
//!
//! One repository per aggregate. Each pairs a trait with a `Sqlx*` type that
//! dispatches to SQLite or MySQL implementations.

use anyhow::Result;
use async_trait::async_trait;

pub mod content;
pub mod course;
pub mod module;
pub mod subject;
pub mod user;

pub use content::{ContentRepository, SqlxContentRepository};
pub use course::{CourseRepository, SqlxCourseRepository};
pub use module::{ModuleRepository, SqlxModuleRepository};
pub use subject::{SqlxSubjectRepository, SubjectRepository};
pub use user::{SqlxUserRepository, UserRepository};

/// Existence check against a table's slug column
#[async_trait]
pub trait SlugLookup: Send + Sync {
    async fn slug_exists(&self, slug: &str) -> Result<bool>;
}
