//! Content service
//!
//! A content places one item (text, file, image or video) at a position in a
//! module. Item and content are created and removed together; positions
//! follow the same scoped ordering as modules, keyed by module.

use crate::config::OrderingConfig;
use crate::db::repositories::{ContentRepository, ModuleRepository, UserRepository};
use crate::db::{is_permutation, is_unique_violation_on, CONTENT_ORDER};
use crate::models::{ContentWithItem, CreateContentInput, Item, ItemPayload, UpdateItemInput};
use anyhow::Context;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum ContentServiceError {
    /// The order is already held by a sibling. `order` is `None` when it
    /// was being auto-assigned.
    #[error("Order {order:?} is already taken in module {scope}")]
    ScopeConflict { scope: i64, order: Option<i32> },

    #[error("Content not found: {0}")]
    NotFound(String),

    #[error("Module not found: {0}")]
    ModuleNotFound(i64),

    #[error("Owner not found: {0}")]
    OwnerNotFound(i64),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

pub struct ContentService {
    repo: Arc<dyn ContentRepository>,
    modules: Arc<dyn ModuleRepository>,
    users: Arc<dyn UserRepository>,
    max_attempts: u32,
}

impl ContentService {
    pub fn new(
        repo: Arc<dyn ContentRepository>,
        modules: Arc<dyn ModuleRepository>,
        users: Arc<dyn UserRepository>,
        ordering: &OrderingConfig,
    ) -> Self {
        Self {
            repo,
            modules,
            users,
            max_attempts: ordering.max_attempts.max(1),
        }
    }

    /// Create an item and place it in a module, last unless an order is given.
    ///
    /// A failed placement rolls the item back with it.
    pub async fn create(&self, input: CreateContentInput) -> Result<ContentWithItem, ContentServiceError> {
        input.payload.validate().map_err(ContentServiceError::ValidationError)?;
        if let Some(order) = input.order {
            if order < 0 {
                return Err(ContentServiceError::ValidationError(format!(
                    "Order must be non-negative, got {}",
                    order
                )));
            }
        }
        self.ensure_module(input.module_id).await?;
        if !self.users.exists(input.owner_id).await.context("Failed to check owner")? {
            return Err(ContentServiceError::OwnerNotFound(input.owner_id));
        }

        let mut attempt = 1;
        loop {
            match self.repo.create(&input).await {
                Ok(created) => {
                    tracing::info!(
                        content_id = created.content.id,
                        module_id = created.content.module_id,
                        kind = %created.content.kind,
                        order = created.content.order,
                        "Content created"
                    );
                    return Ok(created);
                }
                Err(e) if is_unique_violation_on(&e, CONTENT_ORDER.column) => {
                    if input.order.is_some() || attempt >= self.max_attempts {
                        return Err(ContentServiceError::ScopeConflict {
                            scope: input.module_id,
                            order: input.order,
                        });
                    }
                    tracing::debug!(module_id = input.module_id, attempt, "Content order taken, retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e.context("Failed to create content").into()),
            }
        }
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<ContentWithItem>, ContentServiceError> {
        Ok(self.repo.get_by_id(id).await.context("Failed to get content")?)
    }

    /// Contents of a module by order, each with its item
    pub async fn list_by_module(&self, module_id: i64) -> Result<Vec<ContentWithItem>, ContentServiceError> {
        Ok(self
            .repo
            .list_by_module(module_id)
            .await
            .context("Failed to list contents")?)
    }

    pub async fn next_order(&self, module_id: i64) -> Result<i32, ContentServiceError> {
        Ok(self
            .repo
            .next_order(module_id)
            .await
            .context("Failed to compute next content order")?)
    }

    /// Edit the item behind a content. The payload must be of the item's
    /// existing kind.
    pub async fn update_item(&self, content_id: i64, input: UpdateItemInput) -> Result<Item, ContentServiceError> {
        let mut item = self.require(content_id).await?.item;

        if let Some(title) = input.title {
            item.base_mut().title = title;
        }
        if let Some(payload) = input.payload {
            payload.validate().map_err(ContentServiceError::ValidationError)?;
            apply_payload(&mut item, payload)?;
        }

        let updated = self.repo.update_item(&item).await.context("Failed to update item")?;
        tracing::info!(content_id, item_id = updated.id(), kind = %updated.kind(), "Item updated");
        Ok(updated)
    }

    /// Put a module's contents in the given order
    pub async fn reorder(
        &self,
        module_id: i64,
        ordered_ids: &[i64],
    ) -> Result<Vec<ContentWithItem>, ContentServiceError> {
        self.ensure_module(module_id).await?;

        let current: Vec<i64> = self
            .list_by_module(module_id)
            .await?
            .iter()
            .map(|c| c.content.id)
            .collect();
        if !is_permutation(&current, ordered_ids) {
            return Err(ContentServiceError::ValidationError(format!(
                "Expected each of the {} contents of module {} exactly once",
                current.len(),
                module_id
            )));
        }

        self.repo
            .reorder(module_id, ordered_ids)
            .await
            .context("Failed to reorder contents")?;
        self.list_by_module(module_id).await
    }

    /// Delete a content and its item. Later contents move up one.
    pub async fn delete(&self, id: i64) -> Result<(), ContentServiceError> {
        if !self.repo.delete(id).await.context("Failed to delete content")? {
            return Err(ContentServiceError::NotFound(format!("Content with ID {} not found", id)));
        }
        tracing::info!(content_id = id, "Content deleted");
        Ok(())
    }

    async fn require(&self, id: i64) -> Result<ContentWithItem, ContentServiceError> {
        self.get_by_id(id)
            .await?
            .ok_or_else(|| ContentServiceError::NotFound(format!("Content with ID {} not found", id)))
    }

    async fn ensure_module(&self, module_id: i64) -> Result<(), ContentServiceError> {
        match self.modules.get_by_id(module_id).await.context("Failed to get module")? {
            Some(_) => Ok(()),
            None => Err(ContentServiceError::ModuleNotFound(module_id)),
        }
    }
}

fn apply_payload(item: &mut Item, payload: ItemPayload) -> Result<(), ContentServiceError> {
    match (item, payload) {
        (Item::Text(text), ItemPayload::Text { content }) => text.content = content,
        (Item::File(file), ItemPayload::File { file: reference }) => file.file = reference,
        (Item::Image(image), ItemPayload::Image { image: reference }) => image.image = reference,
        (Item::Video(video), ItemPayload::Video { url }) => video.url = url,
        (item, payload) => {
            return Err(ContentServiceError::ValidationError(format!(
                "Cannot change a {} item into a {} item",
                item.kind(),
                payload.kind()
            )))
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DatabaseConfig, DatabaseDriver};
    use crate::db::repositories::{
        CourseRepository, SqlxContentRepository, SqlxCourseRepository, SqlxModuleRepository, SqlxSubjectRepository,
        SqlxUserRepository, SubjectRepository,
    };
    use crate::db::{create_pool, create_test_pool, migrations, DynDatabasePool};
    use crate::models::{Course, CreateModuleInput, ItemKind, Subject, User};
    use chrono::Utc;
    use futures::future::join_all;
    use sqlx::Row;
    use tempfile::TempDir;

    struct Fixture {
        pool: DynDatabasePool,
        service: ContentService,
        modules: Arc<dyn ModuleRepository>,
        owner: i64,
        module: i64,
    }

    async fn setup_test_service() -> Fixture {
        setup_on(create_test_pool().await.expect("Failed to create test pool")).await
    }

    /// One owner and one module under a fresh subject and course
    async fn setup_on(pool: DynDatabasePool) -> Fixture {
        migrations::run_migrations(&pool).await.expect("Failed to run migrations");
        let now = Utc::now();

        let users = SqlxUserRepository::boxed(pool.clone());
        let owner = users
            .create(&User::new("author".into(), "a@example.com".into(), "x".into()))
            .await
            .unwrap();
        let subject = SqlxSubjectRepository::new(pool.clone())
            .create(&Subject {
                id: 0,
                title: Some("Languages".to_string()),
                slug: "languages".to_string(),
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
        let course = SqlxCourseRepository::new(pool.clone())
            .create(&Course {
                id: 0,
                owner_id: owner.id,
                subject_id: subject.id,
                title: Some("Spanish".to_string()),
                slug: "spanish".to_string(),
                overview: None,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();

        let modules = SqlxModuleRepository::boxed(pool.clone());
        let module = modules.create(&CreateModuleInput::new(course.id, "Greetings")).await.unwrap();

        let service = ContentService::new(
            SqlxContentRepository::boxed(pool.clone()),
            modules.clone(),
            users,
            &OrderingConfig::default(),
        );

        Fixture {
            pool,
            service,
            modules,
            owner: owner.id,
            module: module.id,
        }
    }

    async fn item_rows(pool: &DynDatabasePool) -> i64 {
        let sql = "SELECT (SELECT COUNT(*) FROM texts) + (SELECT COUNT(*) FROM files) \
                   + (SELECT COUNT(*) FROM images) + (SELECT COUNT(*) FROM videos) AS count";
        sqlx::query(sql)
            .fetch_one(pool.sqlite().unwrap())
            .await
            .unwrap()
            .get("count")
    }

    fn ids(contents: &[ContentWithItem]) -> Vec<i64> {
        contents.iter().map(|c| c.content.id).collect()
    }

    #[tokio::test]
    async fn test_create_assigns_orders_across_kinds() {
        let f = setup_test_service().await;

        let payloads = [
            ItemPayload::text("¡Hola!"),
            ItemPayload::image("images/wave.png"),
            ItemPayload::video("https://videos.example.com/hola"),
            ItemPayload::file("files/phrasebook.pdf"),
        ];
        for payload in payloads {
            f.service
                .create(CreateContentInput::new(f.module, f.owner, payload).with_title("Lesson"))
                .await
                .unwrap();
        }

        let contents = f.service.list_by_module(f.module).await.unwrap();
        let kinds: Vec<ItemKind> = contents.iter().map(|c| c.content.kind).collect();
        assert_eq!(kinds, vec![ItemKind::Text, ItemKind::Image, ItemKind::Video, ItemKind::File]);
        assert_eq!(contents.iter().map(|c| c.content.order).collect::<Vec<_>>(), vec![0, 1, 2, 3]);
        assert_eq!(contents[2].item.label(), "https://videos.example.com/hola");
        assert_eq!(f.service.next_order(f.module).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_invalid_payloads_write_nothing() {
        let f = setup_test_service().await;

        for payload in [
            ItemPayload::video("ftp://example.com/v"),
            ItemPayload::video("https://"),
            ItemPayload::file("  "),
            ItemPayload::image(""),
        ] {
            let result = f.service.create(CreateContentInput::new(f.module, f.owner, payload)).await;
            assert!(matches!(result, Err(ContentServiceError::ValidationError(_))));
        }
        assert_eq!(item_rows(&f.pool).await, 0);
    }

    #[tokio::test]
    async fn test_missing_module_or_owner() {
        let f = setup_test_service().await;

        let no_module = f
            .service
            .create(CreateContentInput::new(999, f.owner, ItemPayload::text("x")))
            .await;
        assert!(matches!(no_module, Err(ContentServiceError::ModuleNotFound(999))));

        let no_owner = f
            .service
            .create(CreateContentInput::new(f.module, 999, ItemPayload::text("x")))
            .await;
        assert!(matches!(no_owner, Err(ContentServiceError::OwnerNotFound(999))));
    }

    #[tokio::test]
    async fn test_explicit_order_collision_rolls_back_item() {
        let f = setup_test_service().await;
        f.service
            .create(CreateContentInput::new(f.module, f.owner, ItemPayload::text("first")))
            .await
            .unwrap();

        let result = f
            .service
            .create(CreateContentInput::new(f.module, f.owner, ItemPayload::text("clash")).with_order(0))
            .await;
        assert!(matches!(
            result,
            Err(ContentServiceError::ScopeConflict { order: Some(0), .. })
        ));
        assert_eq!(item_rows(&f.pool).await, 1);
    }

    #[tokio::test]
    async fn test_update_item() {
        let f = setup_test_service().await;
        let created = f
            .service
            .create(CreateContentInput::new(f.module, f.owner, ItemPayload::video("https://a.example.com/1")))
            .await
            .unwrap();

        let updated = f
            .service
            .update_item(
                created.content.id,
                UpdateItemInput {
                    title: Some(Some("Intro video".to_string())),
                    payload: Some(ItemPayload::video("https://b.example.com/2")),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.base().title.as_deref(), Some("Intro video"));
        assert_eq!(updated.label(), "https://b.example.com/2");

        let switched = f
            .service
            .update_item(
                created.content.id,
                UpdateItemInput {
                    title: None,
                    payload: Some(ItemPayload::text("now text")),
                },
            )
            .await;
        assert!(matches!(switched, Err(ContentServiceError::ValidationError(_))));

        let reloaded = f.service.get_by_id(created.content.id).await.unwrap().unwrap();
        assert_eq!(reloaded.item.kind(), ItemKind::Video);
        assert_eq!(reloaded.item.label(), "https://b.example.com/2");
    }

    #[tokio::test]
    async fn test_delete_removes_item_and_compacts() {
        let f = setup_test_service().await;
        let mut created = Vec::new();
        for body in ["a", "b", "c"] {
            created.push(
                f.service
                    .create(CreateContentInput::new(f.module, f.owner, ItemPayload::text(body)))
                    .await
                    .unwrap(),
            );
        }

        f.service.delete(created[1].content.id).await.unwrap();

        let contents = f.service.list_by_module(f.module).await.unwrap();
        assert_eq!(ids(&contents), vec![created[0].content.id, created[2].content.id]);
        assert_eq!(contents.iter().map(|c| c.content.order).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(item_rows(&f.pool).await, 2);
        assert!(matches!(
            f.service.delete(created[1].content.id).await,
            Err(ContentServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_deleting_module_removes_items() {
        let f = setup_test_service().await;
        for payload in [ItemPayload::text("t"), ItemPayload::file("files/f.txt")] {
            f.service
                .create(CreateContentInput::new(f.module, f.owner, payload))
                .await
                .unwrap();
        }
        assert_eq!(item_rows(&f.pool).await, 2);

        assert!(f.modules.delete(f.module).await.unwrap());
        assert_eq!(item_rows(&f.pool).await, 0);
    }

    #[tokio::test]
    async fn test_reorder() {
        let f = setup_test_service().await;
        let mut created = Vec::new();
        for body in ["a", "b", "c"] {
            created.push(
                f.service
                    .create(CreateContentInput::new(f.module, f.owner, ItemPayload::text(body)))
                    .await
                    .unwrap()
                    .content
                    .id,
            );
        }
        let wanted = vec![created[2], created[0], created[1]];

        let reordered = f.service.reorder(f.module, &wanted).await.unwrap();
        assert_eq!(ids(&reordered), wanted);

        let partial = f.service.reorder(f.module, &wanted[..2]).await;
        assert!(matches!(partial, Err(ContentServiceError::ValidationError(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_deletes_keep_orders_gapless() {
        let dir = TempDir::new().unwrap();
        let config = DatabaseConfig {
            driver: DatabaseDriver::Sqlite,
            url: dir.path().join("contents.db").to_string_lossy().to_string(),
        };
        let f = setup_on(create_pool(&config).await.expect("Failed to create file pool")).await;
        let (module, owner) = (f.module, f.owner);
        let service = Arc::new(f.service);

        const N: usize = 12;
        const REMOVED: usize = 8;
        let creates = (0..N).map(|i| {
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                service
                    .create(CreateContentInput::new(module, owner, ItemPayload::text(format!("body {}", i))))
                    .await
            })
        });
        let mut created = Vec::new();
        for result in join_all(creates).await {
            created.push(result.unwrap().unwrap().content.id);
        }

        let deletes = created.iter().take(REMOVED).map(|&id| {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.delete(id).await })
        });
        for result in join_all(deletes).await {
            result.unwrap().unwrap();
        }

        let remaining = service.list_by_module(module).await.unwrap();
        assert_eq!(
            remaining.iter().map(|c| c.content.order).collect::<Vec<_>>(),
            (0..(N - REMOVED) as i32).collect::<Vec<_>>()
        );
        assert_eq!(item_rows(&f.pool).await, (N - REMOVED) as i64);
    }
}
