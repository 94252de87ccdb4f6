//! Services layer - Business logic
//!
//! Services enforce the catalogue's rules on top of the repositories:
//! - slug generation and write-time collision retries
//! - scoped order assignment for modules and contents
//! - existence checks and input validation
//! - cache coordination

pub mod content;
pub mod course;
pub mod module;
pub mod password;
pub mod slug;
pub mod subject;
pub mod user;

pub use content::{ContentService, ContentServiceError};
pub use course::{CourseService, CourseServiceError};
pub use module::{ModuleService, ModuleServiceError};
pub use password::hash_password;
pub use slug::{slugify, validate_slug, SlugError, SlugGenerator};
pub use subject::{SubjectService, SubjectServiceError};
pub use user::{UserService, UserServiceError};

use crate::cache::Cache;
use crate::config::Config;
use crate::db::repositories::{
    SqlxContentRepository, SqlxCourseRepository, SqlxModuleRepository, SqlxSubjectRepository,
    SqlxUserRepository,
};
use crate::db::DynDatabasePool;
use std::sync::Arc;

/// Every service, wired to one pool and one cache
pub struct Catalogue {
    pub users: Arc<UserService>,
    pub subjects: Arc<SubjectService>,
    pub courses: Arc<CourseService>,
    pub modules: Arc<ModuleService>,
    pub contents: Arc<ContentService>,
}

impl Catalogue {
    pub fn new(pool: DynDatabasePool, cache: Arc<Cache>, config: &Config) -> Self {
        let user_repo = SqlxUserRepository::boxed(pool.clone());
        let subject_repo = SqlxSubjectRepository::boxed(pool.clone());
        let course_repo = SqlxCourseRepository::boxed(pool.clone());
        let module_repo = SqlxModuleRepository::boxed(pool.clone());
        let content_repo = SqlxContentRepository::boxed(pool);
        let slugs = SlugGenerator::new(&config.slug);

        Self {
            users: Arc::new(UserService::new(user_repo.clone())),
            subjects: Arc::new(SubjectService::new(subject_repo.clone(), cache.clone(), slugs.clone())),
            courses: Arc::new(CourseService::new(
                course_repo.clone(),
                subject_repo,
                user_repo.clone(),
                cache,
                slugs,
            )),
            modules: Arc::new(ModuleService::new(module_repo.clone(), course_repo, &config.ordering)),
            contents: Arc::new(ContentService::new(content_repo, module_repo, user_repo, &config.ordering)),
        }
    }
}
