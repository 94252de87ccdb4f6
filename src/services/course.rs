//! Course service
//!
//! Courses belong to a subject and an owner, carry a generated slug and keep
//! a roster of enrolled students.

use crate::cache::{Cache, CacheLayer};
use crate::db::is_unique_violation_on;
use crate::db::repositories::{CourseRepository, SubjectRepository, UserRepository};
use crate::models::{Course, CourseEnrollInput, CreateCourseInput, UpdateCourseInput, User};
use crate::services::slug::{validate_slug, SlugError, SlugGenerator};
use anyhow::Context;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

const CACHE_KEY_COURSE_BY_ID: &str = "course:id:";
const CACHE_KEY_COURSE_BY_SLUG: &str = "course:slug:";

#[derive(Debug, thiserror::Error)]
pub enum CourseServiceError {
    #[error("Could not find a free slug for course: {0}")]
    SlugConflict(String),

    #[error("Course slug already exists: {0}")]
    DuplicateSlug(String),

    #[error("Course not found: {0}")]
    NotFound(String),

    #[error("Subject not found: {0}")]
    SubjectNotFound(i64),

    #[error("Owner not found: {0}")]
    OwnerNotFound(i64),

    #[error("User not found: {0}")]
    UserNotFound(i64),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

impl From<SlugError> for CourseServiceError {
    fn from(err: SlugError) -> Self {
        match err {
            SlugError::Exhausted { base, .. } => CourseServiceError::SlugConflict(base),
            SlugError::Lookup(e) => CourseServiceError::InternalError(e),
        }
    }
}

pub struct CourseService {
    repo: Arc<dyn CourseRepository>,
    subjects: Arc<dyn SubjectRepository>,
    users: Arc<dyn UserRepository>,
    cache: Arc<Cache>,
    slugs: SlugGenerator,
    cache_ttl: Duration,
}

impl CourseService {
    pub fn new(
        repo: Arc<dyn CourseRepository>,
        subjects: Arc<dyn SubjectRepository>,
        users: Arc<dyn UserRepository>,
        cache: Arc<Cache>,
        slugs: SlugGenerator,
    ) -> Self {
        let cache_ttl = cache.default_ttl();
        Self {
            repo,
            subjects,
            users,
            cache,
            slugs,
            cache_ttl,
        }
    }

    /// Create a course under an existing subject and owner.
    ///
    /// # Errors
    /// - `SubjectNotFound` / `OwnerNotFound` for dangling references
    /// - `DuplicateSlug` when an explicit slug is taken
    /// - `SlugConflict` when no generated slug could be written
    pub async fn create(&self, input: CreateCourseInput) -> Result<Course, CourseServiceError> {
        self.ensure_subject(input.subject_id).await?;
        if !self.users.exists(input.owner_id).await.context("Failed to check owner")? {
            return Err(CourseServiceError::OwnerNotFound(input.owner_id));
        }

        let title = input
            .title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        let draft = |slug: String| {
            let now = Utc::now();
            Course {
                id: 0,
                owner_id: input.owner_id,
                subject_id: input.subject_id,
                title: title.clone(),
                slug,
                overview: input.overview.clone(),
                created_at: now,
                updated_at: now,
            }
        };

        if let Some(slug) = input.slug.clone() {
            validate_slug(&slug).map_err(CourseServiceError::ValidationError)?;
            return match self.repo.create(&draft(slug.clone())).await {
                Ok(created) => Ok(self.created(created)),
                Err(e) if is_unique_violation_on(&e, "slug") => Err(CourseServiceError::DuplicateSlug(slug)),
                Err(e) => Err(e.context("Failed to create course").into()),
            };
        }

        let mut attempt = 0;
        loop {
            let (slug, used) = self
                .slugs
                .generate(self.repo.as_ref(), title.as_deref(), attempt)
                .await?;

            match self.repo.create(&draft(slug.clone())).await {
                Ok(created) => return Ok(self.created(created)),
                Err(e) if is_unique_violation_on(&e, "slug") => {
                    attempt = used + 1;
                    if attempt >= self.slugs.max_attempts() {
                        tracing::warn!(slug = %slug, attempts = attempt, "Course slug still taken, giving up");
                        return Err(CourseServiceError::SlugConflict(slug));
                    }
                    tracing::debug!(slug = %slug, attempt, "Course slug taken at write time, retrying");
                }
                Err(e) => return Err(e.context("Failed to create course").into()),
            }
        }
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<Course>, CourseServiceError> {
        let cache_key = format!("{}{}", CACHE_KEY_COURSE_BY_ID, id);
        if let Some(course) = self.cache.get::<Course>(&cache_key).await.ok().flatten() {
            return Ok(Some(course));
        }

        let course = self.repo.get_by_id(id).await.context("Failed to get course by ID")?;
        if let Some(ref c) = course {
            let _ = self.cache.set(&cache_key, c, self.cache_ttl).await;
        }
        Ok(course)
    }

    pub async fn get_by_slug(&self, slug: &str) -> Result<Option<Course>, CourseServiceError> {
        let cache_key = format!("{}{}", CACHE_KEY_COURSE_BY_SLUG, slug);
        if let Some(course) = self.cache.get::<Course>(&cache_key).await.ok().flatten() {
            return Ok(Some(course));
        }

        let course = self.repo.get_by_slug(slug).await.context("Failed to get course by slug")?;
        if let Some(ref c) = course {
            let _ = self.cache.set(&cache_key, c, self.cache_ttl).await;
        }
        Ok(course)
    }

    /// All courses, newest first
    pub async fn list(&self) -> Result<Vec<Course>, CourseServiceError> {
        Ok(self.repo.list().await.context("Failed to list courses")?)
    }

    pub async fn list_by_subject(&self, subject_id: i64) -> Result<Vec<Course>, CourseServiceError> {
        Ok(self
            .repo
            .list_by_subject(subject_id)
            .await
            .context("Failed to list courses by subject")?)
    }

    pub async fn list_by_owner(&self, owner_id: i64) -> Result<Vec<Course>, CourseServiceError> {
        Ok(self
            .repo
            .list_by_owner(owner_id)
            .await
            .context("Failed to list courses by owner")?)
    }

    /// Change title, overview or subject. The slug stays what it was.
    pub async fn update(&self, id: i64, input: UpdateCourseInput) -> Result<Course, CourseServiceError> {
        let mut course = self.require(id).await?;

        if let Some(title) = input.title {
            course.title = title.map(|t| t.trim().to_string()).filter(|t| !t.is_empty());
        }
        if let Some(overview) = input.overview {
            course.overview = overview;
        }
        if let Some(subject_id) = input.subject_id {
            if subject_id != course.subject_id {
                self.ensure_subject(subject_id).await?;
                course.subject_id = subject_id;
            }
        }

        let updated = self.repo.update(&course).await.context("Failed to update course")?;
        self.forget(&updated).await;
        Ok(updated)
    }

    /// Delete a course with its modules, contents and enrollments
    pub async fn delete(&self, id: i64) -> Result<(), CourseServiceError> {
        if !self.repo.delete(id).await.context("Failed to delete course")? {
            return Err(CourseServiceError::NotFound(format!("Course with ID {} not found", id)));
        }
        self.invalidate_cache().await;
        tracing::info!(course_id = id, "Course deleted");
        Ok(())
    }

    pub async fn count(&self) -> Result<i64, CourseServiceError> {
        Ok(self.repo.count().await.context("Failed to count courses")?)
    }

    /// Enroll a user through the enroll form.
    ///
    /// Returns `false` when the user was already enrolled; enrolling twice
    /// changes nothing.
    pub async fn enroll(&self, form: CourseEnrollInput, user_id: i64) -> Result<bool, CourseServiceError> {
        self.require(form.course_id).await?;
        if !self.users.exists(user_id).await.context("Failed to check user")? {
            return Err(CourseServiceError::UserNotFound(user_id));
        }

        let enrolled = self
            .repo
            .enroll(form.course_id, user_id)
            .await
            .context("Failed to enroll user")?;
        if enrolled {
            tracing::info!(course_id = form.course_id, user_id, "User enrolled");
        }
        Ok(enrolled)
    }

    /// Returns whether an enrollment was removed
    pub async fn unenroll(&self, course_id: i64, user_id: i64) -> Result<bool, CourseServiceError> {
        Ok(self
            .repo
            .unenroll(course_id, user_id)
            .await
            .context("Failed to unenroll user")?)
    }

    pub async fn is_enrolled(&self, course_id: i64, user_id: i64) -> Result<bool, CourseServiceError> {
        Ok(self
            .repo
            .is_enrolled(course_id, user_id)
            .await
            .context("Failed to check enrollment")?)
    }

    pub async fn list_students(&self, course_id: i64) -> Result<Vec<User>, CourseServiceError> {
        self.require(course_id).await?;
        Ok(self
            .repo
            .list_students(course_id)
            .await
            .context("Failed to list students")?)
    }

    /// Courses a user is enrolled in, newest first
    pub async fn list_enrolled_courses(&self, user_id: i64) -> Result<Vec<Course>, CourseServiceError> {
        Ok(self
            .repo
            .list_enrolled(user_id)
            .await
            .context("Failed to list enrolled courses")?)
    }

    async fn require(&self, id: i64) -> Result<Course, CourseServiceError> {
        self.repo
            .get_by_id(id)
            .await
            .context("Failed to get course")?
            .ok_or_else(|| CourseServiceError::NotFound(format!("Course with ID {} not found", id)))
    }

    async fn ensure_subject(&self, subject_id: i64) -> Result<(), CourseServiceError> {
        match self.subjects.get_by_id(subject_id).await.context("Failed to get subject")? {
            Some(_) => Ok(()),
            None => Err(CourseServiceError::SubjectNotFound(subject_id)),
        }
    }

    fn created(&self, course: Course) -> Course {
        tracing::info!(course_id = course.id, slug = %course.slug, "Course created");
        course
    }

    /// Drop both cached lookups of one course
    async fn forget(&self, course: &Course) {
        let _ = self.cache.delete(&format!("{}{}", CACHE_KEY_COURSE_BY_ID, course.id)).await;
        let _ = self.cache.delete(&format!("{}{}", CACHE_KEY_COURSE_BY_SLUG, course.slug)).await;
    }

    async fn invalidate_cache(&self) {
        let _ = self.cache.delete_pattern("course:*").await;
    }
}
