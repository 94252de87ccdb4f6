//! Subject repository

use crate::config::DatabaseDriver;
use crate::db::repositories::content::{purge_items_mysql, purge_items_sqlite, ItemScope};
use crate::db::repositories::SlugLookup;
use crate::db::DynDatabasePool;
use crate::models::Subject;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{MySqlPool, Row, SqlitePool};
use std::sync::Arc;

#[async_trait]
pub trait SubjectRepository: SlugLookup {
    /// Insert a subject whose slug is already chosen
    async fn create(&self, subject: &Subject) -> Result<Subject>;
    async fn get_by_id(&self, id: i64) -> Result<Option<Subject>>;
    async fn get_by_slug(&self, slug: &str) -> Result<Option<Subject>>;
    /// All subjects ordered by title
    async fn list(&self) -> Result<Vec<Subject>>;
    /// Persist the title. The slug column is never written.
    async fn update(&self, subject: &Subject) -> Result<Subject>;
    /// Delete a subject with its courses, modules, contents and items
    async fn delete(&self, id: i64) -> Result<bool>;
    async fn count(&self) -> Result<i64>;
}

pub struct SqlxSubjectRepository {
    pool: DynDatabasePool,
}

impl SqlxSubjectRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn SubjectRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl SlugLookup for SqlxSubjectRepository {
    async fn slug_exists(&self, slug: &str) -> Result<bool> {
        Ok(self.get_by_slug(slug).await?.is_some())
    }
}

#[async_trait]
impl SubjectRepository for SqlxSubjectRepository {
    async fn create(&self, subject: &Subject) -> Result<Subject> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => create_sqlite(self.pool.sqlite()?, subject).await,
            DatabaseDriver::Mysql => create_mysql(self.pool.mysql()?, subject).await,
        }
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Subject>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => get_by_id_sqlite(self.pool.sqlite()?, id).await,
            DatabaseDriver::Mysql => get_by_id_mysql(self.pool.mysql()?, id).await,
        }
    }

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Subject>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => get_by_slug_sqlite(self.pool.sqlite()?, slug).await,
            DatabaseDriver::Mysql => get_by_slug_mysql(self.pool.mysql()?, slug).await,
        }
    }

    async fn list(&self) -> Result<Vec<Subject>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => list_sqlite(self.pool.sqlite()?).await,
            DatabaseDriver::Mysql => list_mysql(self.pool.mysql()?).await,
        }
    }

    async fn update(&self, subject: &Subject) -> Result<Subject> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => update_sqlite(self.pool.sqlite()?, subject).await,
            DatabaseDriver::Mysql => update_mysql(self.pool.mysql()?, subject).await,
        }
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => delete_sqlite(self.pool.sqlite()?, id).await,
            DatabaseDriver::Mysql => delete_mysql(self.pool.mysql()?, id).await,
        }
    }

    async fn count(&self) -> Result<i64> {
        let sql = "SELECT COUNT(*) AS count FROM subjects";
        let count = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .fetch_one(self.pool.sqlite()?)
                .await
                .context("Failed to count subjects")?
                .get("count"),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .fetch_one(self.pool.mysql()?)
                .await
                .context("Failed to count subjects")?
                .get("count"),
        };
        Ok(count)
    }
}

const SELECT_SUBJECT: &str = "SELECT id, title, slug, created_at, updated_at FROM subjects";

// Untitled subjects sort after titled ones on both drivers
const ORDER_BY_TITLE: &str = "ORDER BY title IS NULL, title, id";

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_sqlite(pool: &SqlitePool, subject: &Subject) -> Result<Subject> {
    let now = Utc::now();
    let result = sqlx::query("INSERT INTO subjects (title, slug, created_at, updated_at) VALUES (?, ?, ?, ?)")
        .bind(&subject.title)
        .bind(&subject.slug)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to create subject")?;

    Ok(Subject {
        id: result.last_insert_rowid(),
        title: subject.title.clone(),
        slug: subject.slug.clone(),
        created_at: now,
        updated_at: now,
    })
}

async fn get_by_id_sqlite(pool: &SqlitePool, id: i64) -> Result<Option<Subject>> {
    let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_SUBJECT))
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get subject by ID")?;
    Ok(row.as_ref().map(row_to_subject_sqlite))
}

async fn get_by_slug_sqlite(pool: &SqlitePool, slug: &str) -> Result<Option<Subject>> {
    let row = sqlx::query(&format!("{} WHERE slug = ?", SELECT_SUBJECT))
        .bind(slug)
        .fetch_optional(pool)
        .await
        .context("Failed to get subject by slug")?;
    Ok(row.as_ref().map(row_to_subject_sqlite))
}

async fn list_sqlite(pool: &SqlitePool) -> Result<Vec<Subject>> {
    let rows = sqlx::query(&format!("{} {}", SELECT_SUBJECT, ORDER_BY_TITLE))
        .fetch_all(pool)
        .await
        .context("Failed to list subjects")?;
    Ok(rows.iter().map(row_to_subject_sqlite).collect())
}

async fn update_sqlite(pool: &SqlitePool, subject: &Subject) -> Result<Subject> {
    let now = Utc::now();
    sqlx::query("UPDATE subjects SET title = ?, updated_at = ? WHERE id = ?")
        .bind(&subject.title)
        .bind(now)
        .bind(subject.id)
        .execute(pool)
        .await
        .context("Failed to update subject")?;
    get_by_id_sqlite(pool, subject.id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Subject not found after update"))
}

async fn delete_sqlite(pool: &SqlitePool, id: i64) -> Result<bool> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;
    purge_items_sqlite(&mut tx, ItemScope::Subject(id)).await?;
    let result = sqlx::query("DELETE FROM subjects WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await
        .context("Failed to delete subject")?;
    tx.commit().await.context("Failed to commit subject delete")?;
    Ok(result.rows_affected() > 0)
}

fn row_to_subject_sqlite(row: &sqlx::sqlite::SqliteRow) -> Subject {
    Subject {
        id: row.get("id"),
        title: row.get("title"),
        slug: row.get("slug"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_mysql(pool: &MySqlPool, subject: &Subject) -> Result<Subject> {
    let now = Utc::now();
    let result = sqlx::query("INSERT INTO subjects (title, slug, created_at, updated_at) VALUES (?, ?, ?, ?)")
        .bind(&subject.title)
        .bind(&subject.slug)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to create subject")?;

    Ok(Subject {
        id: result.last_insert_id() as i64,
        title: subject.title.clone(),
        slug: subject.slug.clone(),
        created_at: now,
        updated_at: now,
    })
}

async fn get_by_id_mysql(pool: &MySqlPool, id: i64) -> Result<Option<Subject>> {
    let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_SUBJECT))
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get subject by ID")?;
    Ok(row.as_ref().map(row_to_subject_mysql))
}

async fn get_by_slug_mysql(pool: &MySqlPool, slug: &str) -> Result<Option<Subject>> {
    let row = sqlx::query(&format!("{} WHERE slug = ?", SELECT_SUBJECT))
        .bind(slug)
        .fetch_optional(pool)
        .await
        .context("Failed to get subject by slug")?;
    Ok(row.as_ref().map(row_to_subject_mysql))
}

async fn list_mysql(pool: &MySqlPool) -> Result<Vec<Subject>> {
    let rows = sqlx::query(&format!("{} {}", SELECT_SUBJECT, ORDER_BY_TITLE))
        .fetch_all(pool)
        .await
        .context("Failed to list subjects")?;
    Ok(rows.iter().map(row_to_subject_mysql).collect())
}

async fn update_mysql(pool: &MySqlPool, subject: &Subject) -> Result<Subject> {
    let now = Utc::now();
    sqlx::query("UPDATE subjects SET title = ?, updated_at = ? WHERE id = ?")
        .bind(&subject.title)
        .bind(now)
        .bind(subject.id)
        .execute(pool)
        .await
        .context("Failed to update subject")?;
    get_by_id_mysql(pool, subject.id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Subject not found after update"))
}

async fn delete_mysql(pool: &MySqlPool, id: i64) -> Result<bool> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;
    purge_items_mysql(&mut tx, ItemScope::Subject(id)).await?;
    let result = sqlx::query("DELETE FROM subjects WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await
        .context("Failed to delete subject")?;
    tx.commit().await.context("Failed to commit subject delete")?;
    Ok(result.rows_affected() > 0)
}

fn row_to_subject_mysql(row: &sqlx::mysql::MySqlRow) -> Subject {
    Subject {
        id: row.get("id"),
        title: row.get("title"),
        slug: row.get("slug"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}
