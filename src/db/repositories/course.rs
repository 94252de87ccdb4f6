//! Course repository
//!
//! Courses plus their student roster (`course_students`).

use crate::config::DatabaseDriver;
use crate::db::repositories::content::{purge_items_mysql, purge_items_sqlite, ItemScope};
use crate::db::repositories::SlugLookup;
use crate::db::DynDatabasePool;
use crate::models::{Course, User};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{MySqlPool, Row, SqlitePool};
use std::sync::Arc;

#[async_trait]
pub trait CourseRepository: SlugLookup {
    /// Insert a course whose slug is already chosen
    async fn create(&self, course: &Course) -> Result<Course>;
    async fn get_by_id(&self, id: i64) -> Result<Option<Course>>;
    async fn get_by_slug(&self, slug: &str) -> Result<Option<Course>>;
    /// All courses, newest first
    async fn list(&self) -> Result<Vec<Course>>;
    async fn list_by_subject(&self, subject_id: i64) -> Result<Vec<Course>>;
    async fn list_by_owner(&self, owner_id: i64) -> Result<Vec<Course>>;
    /// Persist title, overview and subject. The slug column is never written.
    async fn update(&self, course: &Course) -> Result<Course>;
    /// Delete a course with its modules, contents, items and enrollments
    async fn delete(&self, id: i64) -> Result<bool>;
    async fn count(&self) -> Result<i64>;

    /// Add a student. Returns false when already enrolled.
    async fn enroll(&self, course_id: i64, user_id: i64) -> Result<bool>;
    async fn unenroll(&self, course_id: i64, user_id: i64) -> Result<bool>;
    async fn is_enrolled(&self, course_id: i64, user_id: i64) -> Result<bool>;
    /// Students of a course ordered by username
    async fn list_students(&self, course_id: i64) -> Result<Vec<User>>;
    /// Courses a user is enrolled in, newest first
    async fn list_enrolled(&self, user_id: i64) -> Result<Vec<Course>>;
}

pub struct SqlxCourseRepository {
    pool: DynDatabasePool,
}

impl SqlxCourseRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn CourseRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl SlugLookup for SqlxCourseRepository {
    async fn slug_exists(&self, slug: &str) -> Result<bool> {
        Ok(self.get_by_slug(slug).await?.is_some())
    }
}

/// Row filters for course listings, each with one placeholder
const BY_ID: &str = "id = ?";
const BY_SLUG: &str = "slug = ?";
const BY_SUBJECT: &str = "subject_id = ?";
const BY_OWNER: &str = "owner_id = ?";
const BY_STUDENT: &str = "id IN (SELECT course_id FROM course_students WHERE user_id = ?)";

#[async_trait]
impl CourseRepository for SqlxCourseRepository {
    async fn create(&self, course: &Course) -> Result<Course> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => create_sqlite(self.pool.sqlite()?, course).await,
            DatabaseDriver::Mysql => create_mysql(self.pool.mysql()?, course).await,
        }
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Course>> {
        Ok(self.select_where_id(BY_ID, id).await?.into_iter().next())
    }

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Course>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => get_by_slug_sqlite(self.pool.sqlite()?, slug).await,
            DatabaseDriver::Mysql => get_by_slug_mysql(self.pool.mysql()?, slug).await,
        }
    }

    async fn list(&self) -> Result<Vec<Course>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => list_sqlite(self.pool.sqlite()?).await,
            DatabaseDriver::Mysql => list_mysql(self.pool.mysql()?).await,
        }
    }

    async fn list_by_subject(&self, subject_id: i64) -> Result<Vec<Course>> {
        self.select_where_id(BY_SUBJECT, subject_id).await
    }

    async fn list_by_owner(&self, owner_id: i64) -> Result<Vec<Course>> {
        self.select_where_id(BY_OWNER, owner_id).await
    }

    async fn update(&self, course: &Course) -> Result<Course> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => update_sqlite(self.pool.sqlite()?, course).await?,
            DatabaseDriver::Mysql => update_mysql(self.pool.mysql()?, course).await?,
        }
        self.get_by_id(course.id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Course not found after update"))
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => delete_sqlite(self.pool.sqlite()?, id).await,
            DatabaseDriver::Mysql => delete_mysql(self.pool.mysql()?, id).await,
        }
    }

    async fn count(&self) -> Result<i64> {
        let sql = "SELECT COUNT(*) AS count FROM courses";
        let count = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .fetch_one(self.pool.sqlite()?)
                .await
                .context("Failed to count courses")?
                .get("count"),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .fetch_one(self.pool.mysql()?)
                .await
                .context("Failed to count courses")?
                .get("count"),
        };
        Ok(count)
    }

    async fn enroll(&self, course_id: i64, user_id: i64) -> Result<bool> {
        let now = Utc::now();
        let affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(
                "INSERT OR IGNORE INTO course_students (course_id, user_id, enrolled_at) VALUES (?, ?, ?)",
            )
            .bind(course_id)
            .bind(user_id)
            .bind(now)
            .execute(self.pool.sqlite()?)
            .await
            .context("Failed to enroll student")?
            .rows_affected(),
            DatabaseDriver::Mysql => sqlx::query(
                "INSERT IGNORE INTO course_students (course_id, user_id, enrolled_at) VALUES (?, ?, ?)",
            )
            .bind(course_id)
            .bind(user_id)
            .bind(now)
            .execute(self.pool.mysql()?)
            .await
            .context("Failed to enroll student")?
            .rows_affected(),
        };
        Ok(affected > 0)
    }

    async fn unenroll(&self, course_id: i64, user_id: i64) -> Result<bool> {
        let sql = "DELETE FROM course_students WHERE course_id = ? AND user_id = ?";
        let affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(course_id)
                .bind(user_id)
                .execute(self.pool.sqlite()?)
                .await
                .context("Failed to unenroll student")?
                .rows_affected(),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(course_id)
                .bind(user_id)
                .execute(self.pool.mysql()?)
                .await
                .context("Failed to unenroll student")?
                .rows_affected(),
        };
        Ok(affected > 0)
    }

    async fn is_enrolled(&self, course_id: i64, user_id: i64) -> Result<bool> {
        let sql = "SELECT COUNT(*) AS count FROM course_students WHERE course_id = ? AND user_id = ?";
        let count: i64 = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(course_id)
                .bind(user_id)
                .fetch_one(self.pool.sqlite()?)
                .await
                .context("Failed to check enrollment")?
                .get("count"),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(course_id)
                .bind(user_id)
                .fetch_one(self.pool.mysql()?)
                .await
                .context("Failed to check enrollment")?
                .get("count"),
        };
        Ok(count > 0)
    }

    async fn list_students(&self, course_id: i64) -> Result<Vec<User>> {
        let sql = r#"
            SELECT u.id, u.username, u.email, u.first_name, u.last_name, u.password_hash, u.created_at, u.updated_at
            FROM users u
            JOIN course_students cs ON cs.user_id = u.id
            WHERE cs.course_id = ?
            ORDER BY u.username
        "#;
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let rows = sqlx::query(sql)
                    .bind(course_id)
                    .fetch_all(self.pool.sqlite()?)
                    .await
                    .context("Failed to list students")?;
                Ok(rows.iter().map(row_to_student_sqlite).collect())
            }
            DatabaseDriver::Mysql => {
                let rows = sqlx::query(sql)
                    .bind(course_id)
                    .fetch_all(self.pool.mysql()?)
                    .await
                    .context("Failed to list students")?;
                Ok(rows.iter().map(row_to_student_mysql).collect())
            }
        }
    }

    async fn list_enrolled(&self, user_id: i64) -> Result<Vec<Course>> {
        self.select_where_id(BY_STUDENT, user_id).await
    }
}

impl SqlxCourseRepository {
    /// Courses matching one of the id filters above, newest first
    async fn select_where_id(&self, filter: &str, value: i64) -> Result<Vec<Course>> {
        let sql = format!("{} WHERE {} {}", SELECT_COURSE, filter, NEWEST_FIRST);
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let rows = sqlx::query(&sql)
                    .bind(value)
                    .fetch_all(self.pool.sqlite()?)
                    .await
                    .context("Failed to query courses")?;
                Ok(rows.iter().map(row_to_course_sqlite).collect())
            }
            DatabaseDriver::Mysql => {
                let rows = sqlx::query(&sql)
                    .bind(value)
                    .fetch_all(self.pool.mysql()?)
                    .await
                    .context("Failed to query courses")?;
                Ok(rows.iter().map(row_to_course_mysql).collect())
            }
        }
    }
}

const SELECT_COURSE: &str =
    "SELECT id, owner_id, subject_id, title, slug, overview, created_at, updated_at FROM courses";

const NEWEST_FIRST: &str = "ORDER BY created_at DESC, id DESC";

const INSERT_COURSE: &str = r#"
    INSERT INTO courses (owner_id, subject_id, title, slug, overview, created_at, updated_at)
    VALUES (?, ?, ?, ?, ?, ?, ?)
"#;

const UPDATE_COURSE: &str =
    "UPDATE courses SET title = ?, overview = ?, subject_id = ?, updated_at = ? WHERE id = ?";

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_sqlite(pool: &SqlitePool, course: &Course) -> Result<Course> {
    let now = Utc::now();
    let result = sqlx::query(INSERT_COURSE)
        .bind(course.owner_id)
        .bind(course.subject_id)
        .bind(&course.title)
        .bind(&course.slug)
        .bind(&course.overview)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to create course")?;

    Ok(Course {
        id: result.last_insert_rowid(),
        created_at: now,
        updated_at: now,
        ..course.clone()
    })
}

async fn get_by_slug_sqlite(pool: &SqlitePool, slug: &str) -> Result<Option<Course>> {
    let row = sqlx::query(&format!("{} WHERE {}", SELECT_COURSE, BY_SLUG))
        .bind(slug)
        .fetch_optional(pool)
        .await
        .context("Failed to get course by slug")?;
    Ok(row.as_ref().map(row_to_course_sqlite))
}

async fn list_sqlite(pool: &SqlitePool) -> Result<Vec<Course>> {
    let rows = sqlx::query(&format!("{} {}", SELECT_COURSE, NEWEST_FIRST))
        .fetch_all(pool)
        .await
        .context("Failed to list courses")?;
    Ok(rows.iter().map(row_to_course_sqlite).collect())
}

async fn update_sqlite(pool: &SqlitePool, course: &Course) -> Result<()> {
    sqlx::query(UPDATE_COURSE)
        .bind(&course.title)
        .bind(&course.overview)
        .bind(course.subject_id)
        .bind(Utc::now())
        .bind(course.id)
        .execute(pool)
        .await
        .context("Failed to update course")?;
    Ok(())
}

async fn delete_sqlite(pool: &SqlitePool, id: i64) -> Result<bool> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;
    purge_items_sqlite(&mut tx, ItemScope::Course(id)).await?;
    let result = sqlx::query("DELETE FROM courses WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await
        .context("Failed to delete course")?;
    tx.commit().await.context("Failed to commit course delete")?;
    Ok(result.rows_affected() > 0)
}

fn row_to_course_sqlite(row: &sqlx::sqlite::SqliteRow) -> Course {
    Course {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        subject_id: row.get("subject_id"),
        title: row.get("title"),
        slug: row.get("slug"),
        overview: row.get("overview"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn row_to_student_sqlite(row: &sqlx::sqlite::SqliteRow) -> User {
    User {
        id: row.get("id"),
        username: row.get("username"),
        email: row.get("email"),
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        password_hash: row.get("password_hash"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_mysql(pool: &MySqlPool, course: &Course) -> Result<Course> {
    let now = Utc::now();
    let result = sqlx::query(INSERT_COURSE)
        .bind(course.owner_id)
        .bind(course.subject_id)
        .bind(&course.title)
        .bind(&course.slug)
        .bind(&course.overview)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to create course")?;

    Ok(Course {
        id: result.last_insert_id() as i64,
        created_at: now,
        updated_at: now,
        ..course.clone()
    })
}

async fn get_by_slug_mysql(pool: &MySqlPool, slug: &str) -> Result<Option<Course>> {
    let row = sqlx::query(&format!("{} WHERE {}", SELECT_COURSE, BY_SLUG))
        .bind(slug)
        .fetch_optional(pool)
        .await
        .context("Failed to get course by slug")?;
    Ok(row.as_ref().map(row_to_course_mysql))
}

async fn list_mysql(pool: &MySqlPool) -> Result<Vec<Course>> {
    let rows = sqlx::query(&format!("{} {}", SELECT_COURSE, NEWEST_FIRST))
        .fetch_all(pool)
        .await
        .context("Failed to list courses")?;
    Ok(rows.iter().map(row_to_course_mysql).collect())
}

async fn update_mysql(pool: &MySqlPool, course: &Course) -> Result<()> {
    sqlx::query(UPDATE_COURSE)
        .bind(&course.title)
        .bind(&course.overview)
        .bind(course.subject_id)
        .bind(Utc::now())
        .bind(course.id)
        .execute(pool)
        .await
        .context("Failed to update course")?;
    Ok(())
}

async fn delete_mysql(pool: &MySqlPool, id: i64) -> Result<bool> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;
    purge_items_mysql(&mut tx, ItemScope::Course(id)).await?;
    let result = sqlx::query("DELETE FROM courses WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await
        .context("Failed to delete course")?;
    tx.commit().await.context("Failed to commit course delete")?;
    Ok(result.rows_affected() > 0)
}

fn row_to_course_mysql(row: &sqlx::mysql::MySqlRow) -> Course {
    Course {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        subject_id: row.get("subject_id"),
        title: row.get("title"),
        slug: row.get("slug"),
        overview: row.get("overview"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn row_to_student_mysql(row: &sqlx::mysql::MySqlRow) -> User {
    User {
        id: row.get("id"),
        username: row.get("username"),
        email: row.get("email"),
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        password_hash: row.get("password_hash"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}
