//! Subject service
//!
//! Subjects group courses. Slugs are generated once, on creation, from the
//! title; two subjects may share a title but never a slug.

use crate::cache::{Cache, CacheLayer};
use crate::db::is_unique_violation_on;
use crate::db::repositories::SubjectRepository;
use crate::models::{CreateSubjectInput, Subject, UpdateSubjectInput};
use crate::services::slug::{validate_slug, SlugError, SlugGenerator};
use anyhow::Context;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

const CACHE_KEY_SUBJECT_BY_ID: &str = "subject:id:";
const CACHE_KEY_SUBJECT_BY_SLUG: &str = "subject:slug:";

#[derive(Debug, thiserror::Error)]
pub enum SubjectServiceError {
    /// No free slug could be written within the attempt limit
    #[error("Could not find a free slug for subject: {0}")]
    SlugConflict(String),

    /// An explicitly requested slug is taken
    #[error("Subject slug already exists: {0}")]
    DuplicateSlug(String),

    #[error("Subject not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

impl From<SlugError> for SubjectServiceError {
    fn from(err: SlugError) -> Self {
        match err {
            SlugError::Exhausted { base, .. } => SubjectServiceError::SlugConflict(base),
            SlugError::Lookup(e) => SubjectServiceError::InternalError(e),
        }
    }
}

pub struct SubjectService {
    repo: Arc<dyn SubjectRepository>,
    cache: Arc<Cache>,
    slugs: SlugGenerator,
    cache_ttl: Duration,
}

impl SubjectService {
    pub fn new(repo: Arc<dyn SubjectRepository>, cache: Arc<Cache>, slugs: SlugGenerator) -> Self {
        let cache_ttl = cache.default_ttl();
        Self {
            repo,
            cache,
            slugs,
            cache_ttl,
        }
    }

    /// Create a subject.
    ///
    /// Without an explicit slug one is generated from the title, and an
    /// insert that loses a race for it is retried with the next candidate.
    pub async fn create(&self, input: CreateSubjectInput) -> Result<Subject, SubjectServiceError> {
        let title = normalize_title(input.title);

        if let Some(slug) = input.slug {
            validate_slug(&slug).map_err(SubjectServiceError::ValidationError)?;
            return match self.repo.create(&new_subject(title.clone(), slug.clone())).await {
                Ok(created) => Ok(self.created(created)),
                Err(e) if is_unique_violation_on(&e, "slug") => Err(SubjectServiceError::DuplicateSlug(slug)),
                Err(e) => Err(e.context("Failed to create subject").into()),
            };
        }

        let mut attempt = 0;
        loop {
            let (slug, used) = self
                .slugs
                .generate(self.repo.as_ref(), title.as_deref(), attempt)
                .await?;

            match self.repo.create(&new_subject(title.clone(), slug.clone())).await {
                Ok(created) => return Ok(self.created(created)),
                Err(e) if is_unique_violation_on(&e, "slug") => {
                    attempt = used + 1;
                    if attempt >= self.slugs.max_attempts() {
                        tracing::warn!(slug = %slug, attempts = attempt, "Subject slug still taken, giving up");
                        return Err(SubjectServiceError::SlugConflict(slug));
                    }
                    tracing::debug!(slug = %slug, attempt, "Subject slug taken at write time, retrying");
                }
                Err(e) => return Err(e.context("Failed to create subject").into()),
            }
        }
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<Subject>, SubjectServiceError> {
        let cache_key = format!("{}{}", CACHE_KEY_SUBJECT_BY_ID, id);
        if let Some(subject) = self.cache.get::<Subject>(&cache_key).await.ok().flatten() {
            return Ok(Some(subject));
        }

        let subject = self.repo.get_by_id(id).await.context("Failed to get subject by ID")?;
        if let Some(ref s) = subject {
            let _ = self.cache.set(&cache_key, s, self.cache_ttl).await;
        }
        Ok(subject)
    }

    pub async fn get_by_slug(&self, slug: &str) -> Result<Option<Subject>, SubjectServiceError> {
        let cache_key = format!("{}{}", CACHE_KEY_SUBJECT_BY_SLUG, slug);
        if let Some(subject) = self.cache.get::<Subject>(&cache_key).await.ok().flatten() {
            return Ok(Some(subject));
        }

        let subject = self.repo.get_by_slug(slug).await.context("Failed to get subject by slug")?;
        if let Some(ref s) = subject {
            let _ = self.cache.set(&cache_key, s, self.cache_ttl).await;
        }
        Ok(subject)
    }

    /// All subjects by title, untitled last
    pub async fn list(&self) -> Result<Vec<Subject>, SubjectServiceError> {
        Ok(self.repo.list().await.context("Failed to list subjects")?)
    }

    /// Change the title. The slug stays what it was.
    pub async fn update(&self, id: i64, input: UpdateSubjectInput) -> Result<Subject, SubjectServiceError> {
        let mut subject = self
            .repo
            .get_by_id(id)
            .await
            .context("Failed to get subject")?
            .ok_or_else(|| SubjectServiceError::NotFound(format!("Subject with ID {} not found", id)))?;

        if let Some(title) = input.title {
            subject.title = normalize_title(title);
        }

        let updated = self.repo.update(&subject).await.context("Failed to update subject")?;
        self.forget(&updated).await;
        Ok(updated)
    }

    /// Delete a subject together with everything under it
    pub async fn delete(&self, id: i64) -> Result<(), SubjectServiceError> {
        let deleted = self.repo.delete(id).await.context("Failed to delete subject")?;
        if !deleted {
            return Err(SubjectServiceError::NotFound(format!("Subject with ID {} not found", id)));
        }

        self.invalidate_cache().await;
        // Courses went with it
        let _ = self.cache.delete_pattern("course:*").await;
        tracing::info!(subject_id = id, "Subject deleted");
        Ok(())
    }

    pub async fn count(&self) -> Result<i64, SubjectServiceError> {
        Ok(self.repo.count().await.context("Failed to count subjects")?)
    }

    fn created(&self, subject: Subject) -> Subject {
        tracing::info!(subject_id = subject.id, slug = %subject.slug, "Subject created");
        subject
    }

    /// Drop both cached lookups of one subject
    async fn forget(&self, subject: &Subject) {
        let _ = self.cache.delete(&format!("{}{}", CACHE_KEY_SUBJECT_BY_ID, subject.id)).await;
        let _ = self.cache.delete(&format!("{}{}", CACHE_KEY_SUBJECT_BY_SLUG, subject.slug)).await;
    }

    async fn invalidate_cache(&self) {
        let _ = self.cache.delete_pattern("subject:*").await;
    }
}

/// Blank titles are stored as no title
fn normalize_title(title: Option<String>) -> Option<String> {
    title
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

fn new_subject(title: Option<String>, slug: String) -> Subject {
    let now = Utc::now();
    Subject {
        id: 0,
        title,
        slug,
        created_at: now,
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::create_cache;
    use crate::config::{CacheConfig, SlugConfig};
    use crate::db::repositories::{SlugLookup, SqlxSubjectRepository};
    use crate::db::{create_test_pool, migrations};
    use anyhow::Result;
    use async_trait::async_trait;

    async fn setup_with(slug_config: SlugConfig, stale: bool) -> SubjectService {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool).await.expect("Failed to run migrations");

        let repo: Arc<dyn SubjectRepository> = if stale {
            Arc::new(StaleLookup(SqlxSubjectRepository::new(pool)))
        } else {
            SqlxSubjectRepository::boxed(pool)
        };
        let cache = create_cache(&CacheConfig::default());
        SubjectService::new(repo, cache, SlugGenerator::new(&slug_config))
    }

    async fn setup_test_service() -> SubjectService {
        setup_with(SlugConfig::default(), false).await
    }

    /// Claims every slug is free, as a check that raced with another writer would
    struct StaleLookup(SqlxSubjectRepository);

    #[async_trait]
    impl SlugLookup for StaleLookup {
        async fn slug_exists(&self, _slug: &str) -> Result<bool> {
            Ok(false)
        }
    }

    #[async_trait]
    impl SubjectRepository for StaleLookup {
        async fn create(&self, subject: &Subject) -> Result<Subject> {
            self.0.create(subject).await
        }
        async fn get_by_id(&self, id: i64) -> Result<Option<Subject>> {
            self.0.get_by_id(id).await
        }
        async fn get_by_slug(&self, slug: &str) -> Result<Option<Subject>> {
            self.0.get_by_slug(slug).await
        }
        async fn list(&self) -> Result<Vec<Subject>> {
            self.0.list().await
        }
        async fn update(&self, subject: &Subject) -> Result<Subject> {
            self.0.update(subject).await
        }
        async fn delete(&self, id: i64) -> Result<bool> {
            self.0.delete(id).await
        }
        async fn count(&self) -> Result<i64> {
            self.0.count().await
        }
    }

    #[tokio::test]
    async fn test_create_generates_slug() {
        let service = setup_test_service().await;
        let subject = service.create(CreateSubjectInput::new("Computer Science")).await.unwrap();

        assert!(subject.id > 0);
        assert_eq!(subject.slug, "computer-science");
        assert_eq!(subject.title.as_deref(), Some("Computer Science"));
    }

    #[tokio::test]
    async fn test_same_title_twice_gets_distinct_slugs() {
        let service = setup_test_service().await;
        let first = service.create(CreateSubjectInput::new("Python")).await.unwrap();
        let second = service.create(CreateSubjectInput::new("Python")).await.unwrap();

        assert_eq!(first.slug, "python");
        let token = second.slug.strip_prefix("python-").expect("suffixed slug");
        assert_eq!(token.len(), SlugConfig::default().suffix_length);
        assert_eq!(second.title.as_deref(), Some("Python"));
        assert_eq!(service.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_untitled_subjects() {
        let service = setup_test_service().await;
        let a = service.create(CreateSubjectInput::untitled()).await.unwrap();
        let b = service.create(CreateSubjectInput::new("   ")).await.unwrap();

        assert!(a.title.is_none() && b.title.is_none());
        assert_ne!(a.slug, b.slug);
        assert!(!a.slug.is_empty());
    }

    #[tokio::test]
    async fn test_explicit_slug() {
        let service = setup_test_service().await;
        let subject = service
            .create(CreateSubjectInput::new("Maths").with_slug("mathematics"))
            .await
            .unwrap();
        assert_eq!(subject.slug, "mathematics");

        let dup = service
            .create(CreateSubjectInput::new("Maths 2").with_slug("mathematics"))
            .await;
        assert!(matches!(dup, Err(SubjectServiceError::DuplicateSlug(s)) if s == "mathematics"));

        let bad = service.create(CreateSubjectInput::new("Bad").with_slug("Not Valid")).await;
        assert!(matches!(bad, Err(SubjectServiceError::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_stale_lookup_is_recovered_by_retry() {
        let service = setup_with(SlugConfig::default(), true).await;
        service.create(CreateSubjectInput::new("Physics")).await.unwrap();

        // The lookup offers "physics" again; the insert fails and the retry
        // moves on to a suffixed candidate.
        let second = service.create(CreateSubjectInput::new("physics")).await.unwrap();
        assert!(second.slug.starts_with("physics-"));
    }

    #[tokio::test]
    async fn test_stale_lookup_with_single_attempt_is_conflict() {
        let config = SlugConfig {
            max_attempts: 1,
            ..SlugConfig::default()
        };
        let service = setup_with(config, true).await;
        service.create(CreateSubjectInput::new("Physics")).await.unwrap();

        let result = service.create(CreateSubjectInput::new("physics")).await;
        assert!(matches!(result, Err(SubjectServiceError::SlugConflict(s)) if s == "physics"));
    }

    #[tokio::test]
    async fn test_update_keeps_slug() {
        let service = setup_test_service().await;
        let subject = service.create(CreateSubjectInput::new("Biology")).await.unwrap();

        // Prime the cache so the update has to invalidate it
        service.get_by_slug("biology").await.unwrap();
        service.get_by_id(subject.id).await.unwrap();

        let updated = service
            .update(subject.id, UpdateSubjectInput::title(Some("Life Sciences".to_string())))
            .await
            .unwrap();
        assert_eq!(updated.title.as_deref(), Some("Life Sciences"));
        assert_eq!(updated.slug, "biology");

        let cached = service.get_by_slug("biology").await.unwrap().unwrap();
        assert_eq!(cached.title.as_deref(), Some("Life Sciences"));
        let cached = service.get_by_id(subject.id).await.unwrap().unwrap();
        assert_eq!(cached.title.as_deref(), Some("Life Sciences"));
    }

    #[tokio::test]
    async fn test_list_orders_by_title() {
        let service = setup_test_service().await;
        service.create(CreateSubjectInput::new("Zoology")).await.unwrap();
        service.create(CreateSubjectInput::untitled()).await.unwrap();
        service.create(CreateSubjectInput::new("Astronomy")).await.unwrap();

        let titles: Vec<Option<String>> = service.list().await.unwrap().into_iter().map(|s| s.title).collect();
        assert_eq!(
            titles,
            vec![Some("Astronomy".to_string()), Some("Zoology".to_string()), None]
        );
    }

    #[tokio::test]
    async fn test_delete() {
        let service = setup_test_service().await;
        let subject = service.create(CreateSubjectInput::new("History")).await.unwrap();
        service.get_by_id(subject.id).await.unwrap();

        service.delete(subject.id).await.unwrap();
        assert!(service.get_by_id(subject.id).await.unwrap().is_none());
        assert!(matches!(
            service.delete(subject.id).await,
            Err(SubjectServiceError::NotFound(_))
        ));
    }
}
