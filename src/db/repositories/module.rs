//! Module repository
//!
//! Module positions are maintained through [`MODULE_ORDER`]; see
//! `db::ordering` for the statements involved.

use crate::config::DatabaseDriver;
use crate::db::ordering::{self, MODULE_ORDER};
use crate::db::repositories::content::{purge_items_mysql, purge_items_sqlite, ItemScope};
use crate::db::DynDatabasePool;
use crate::models::{CreateModuleInput, Module};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{MySqlPool, Row, SqlitePool};
use std::sync::Arc;

#[async_trait]
pub trait ModuleRepository: Send + Sync {
    /// Insert a module. The order is auto-assigned when `input.order` is `None`.
    async fn create(&self, input: &CreateModuleInput) -> Result<Module>;
    async fn get_by_id(&self, id: i64) -> Result<Option<Module>>;
    /// Modules of a course by order
    async fn list_by_course(&self, course_id: i64) -> Result<Vec<Module>>;
    async fn next_order(&self, course_id: i64) -> Result<i32>;
    /// Persist title and description
    async fn update(&self, module: &Module) -> Result<Module>;
    async fn reorder(&self, course_id: i64, ordered_ids: &[i64]) -> Result<()>;
    /// Delete a module with its contents and items, closing the gap it leaves
    async fn delete(&self, id: i64) -> Result<bool>;
}

pub struct SqlxModuleRepository {
    pool: DynDatabasePool,
}

impl SqlxModuleRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn ModuleRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl ModuleRepository for SqlxModuleRepository {
    async fn create(&self, input: &CreateModuleInput) -> Result<Module> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => create_sqlite(self.pool.sqlite()?, input).await,
            DatabaseDriver::Mysql => create_mysql(self.pool.mysql()?, input).await,
        }
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Module>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => get_by_id_sqlite(self.pool.sqlite()?, id).await,
            DatabaseDriver::Mysql => get_by_id_mysql(self.pool.mysql()?, id).await,
        }
    }

    async fn list_by_course(&self, course_id: i64) -> Result<Vec<Module>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => list_by_course_sqlite(self.pool.sqlite()?, course_id).await,
            DatabaseDriver::Mysql => list_by_course_mysql(self.pool.mysql()?, course_id).await,
        }
    }

    async fn next_order(&self, course_id: i64) -> Result<i32> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => ordering::next_order_sqlite(self.pool.sqlite()?, &MODULE_ORDER, &[course_id]).await,
            DatabaseDriver::Mysql => ordering::next_order_mysql(self.pool.mysql()?, &MODULE_ORDER, &[course_id]).await,
        }
    }

    async fn update(&self, module: &Module) -> Result<Module> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => update_sqlite(self.pool.sqlite()?, module).await,
            DatabaseDriver::Mysql => update_mysql(self.pool.mysql()?, module).await,
        }
    }

    async fn reorder(&self, course_id: i64, ordered_ids: &[i64]) -> Result<()> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let mut tx = self.pool.sqlite()?.begin().await.context("Failed to begin transaction")?;
                ordering::reorder_sqlite(&mut tx, &MODULE_ORDER, &[course_id], ordered_ids).await?;
                tx.commit().await.context("Failed to commit module reorder")
            }
            DatabaseDriver::Mysql => {
                let mut tx = self.pool.mysql()?.begin().await.context("Failed to begin transaction")?;
                ordering::reorder_mysql(&mut tx, &MODULE_ORDER, &[course_id], ordered_ids).await?;
                tx.commit().await.context("Failed to commit module reorder")
            }
        }
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => delete_sqlite(self.pool.sqlite()?, id).await,
            DatabaseDriver::Mysql => delete_mysql(self.pool.mysql()?, id).await,
        }
    }
}

const SELECT_MODULE: &str =
    "SELECT id, course_id, title, description, sort_order, created_at, updated_at FROM modules";

const MODULE_COLUMNS: &[&str] = &["course_id", "title", "description", "created_at", "updated_at"];

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_sqlite(pool: &SqlitePool, input: &CreateModuleInput) -> Result<Module> {
    let now = Utc::now();
    let result = match input.order {
        Some(order) => sqlx::query(&MODULE_ORDER.explicit_insert_sql(MODULE_COLUMNS))
            .bind(input.course_id)
            .bind(&input.title)
            .bind(&input.description)
            .bind(now)
            .bind(now)
            .bind(order)
            .execute(pool)
            .await
            .context("Failed to create module")?,
        None => sqlx::query(&MODULE_ORDER.auto_insert_sql(MODULE_COLUMNS))
            .bind(input.course_id)
            .bind(&input.title)
            .bind(&input.description)
            .bind(now)
            .bind(now)
            .bind(input.course_id)
            .execute(pool)
            .await
            .context("Failed to create module")?,
    };

    get_by_id_sqlite(pool, result.last_insert_rowid())
        .await?
        .ok_or_else(|| anyhow!("Module not found after create"))
}

async fn get_by_id_sqlite(pool: &SqlitePool, id: i64) -> Result<Option<Module>> {
    let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_MODULE))
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get module")?;
    Ok(row.as_ref().map(row_to_module_sqlite))
}

async fn list_by_course_sqlite(pool: &SqlitePool, course_id: i64) -> Result<Vec<Module>> {
    let rows = sqlx::query(&format!("{} WHERE course_id = ? ORDER BY sort_order", SELECT_MODULE))
        .bind(course_id)
        .fetch_all(pool)
        .await
        .context("Failed to list modules")?;
    Ok(rows.iter().map(row_to_module_sqlite).collect())
}

async fn update_sqlite(pool: &SqlitePool, module: &Module) -> Result<Module> {
    sqlx::query("UPDATE modules SET title = ?, description = ?, updated_at = ? WHERE id = ?")
        .bind(&module.title)
        .bind(&module.description)
        .bind(Utc::now())
        .bind(module.id)
        .execute(pool)
        .await
        .context("Failed to update module")?;
    get_by_id_sqlite(pool, module.id)
        .await?
        .ok_or_else(|| anyhow!("Module not found after update"))
}

/// Writes first, like the content delete: items, then the module row, whose
/// contents go with it through the foreign key.
async fn delete_sqlite(pool: &SqlitePool, id: i64) -> Result<bool> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;
    purge_items_sqlite(&mut tx, ItemScope::Module(id)).await?;

    let row = sqlx::query("DELETE FROM modules WHERE id = ? RETURNING course_id, sort_order")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to delete module")?;
    let Some(row) = row else {
        return Ok(false);
    };
    let course_id: i64 = row.get("course_id");
    let order: i32 = row.get("sort_order");

    ordering::compact_sqlite(&mut tx, &MODULE_ORDER, &[course_id], order).await?;

    tx.commit().await.context("Failed to commit module delete")?;
    Ok(true)
}

fn row_to_module_sqlite(row: &sqlx::sqlite::SqliteRow) -> Module {
    Module {
        id: row.get("id"),
        course_id: row.get("course_id"),
        title: row.get("title"),
        description: row.get("description"),
        order: row.get("sort_order"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_mysql(pool: &MySqlPool, input: &CreateModuleInput) -> Result<Module> {
    let now = Utc::now();
    let result = match input.order {
        Some(order) => sqlx::query(&MODULE_ORDER.explicit_insert_sql(MODULE_COLUMNS))
            .bind(input.course_id)
            .bind(&input.title)
            .bind(&input.description)
            .bind(now)
            .bind(now)
            .bind(order)
            .execute(pool)
            .await
            .context("Failed to create module")?,
        None => sqlx::query(&MODULE_ORDER.auto_insert_sql(MODULE_COLUMNS))
            .bind(input.course_id)
            .bind(&input.title)
            .bind(&input.description)
            .bind(now)
            .bind(now)
            .bind(input.course_id)
            .execute(pool)
            .await
            .context("Failed to create module")?,
    };

    get_by_id_mysql(pool, result.last_insert_id() as i64)
        .await?
        .ok_or_else(|| anyhow!("Module not found after create"))
}

async fn get_by_id_mysql(pool: &MySqlPool, id: i64) -> Result<Option<Module>> {
    let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_MODULE))
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get module")?;
    Ok(row.as_ref().map(row_to_module_mysql))
}

async fn list_by_course_mysql(pool: &MySqlPool, course_id: i64) -> Result<Vec<Module>> {
    let rows = sqlx::query(&format!("{} WHERE course_id = ? ORDER BY sort_order", SELECT_MODULE))
        .bind(course_id)
        .fetch_all(pool)
        .await
        .context("Failed to list modules")?;
    Ok(rows.iter().map(row_to_module_mysql).collect())
}

async fn update_mysql(pool: &MySqlPool, module: &Module) -> Result<Module> {
    sqlx::query("UPDATE modules SET title = ?, description = ?, updated_at = ? WHERE id = ?")
        .bind(&module.title)
        .bind(&module.description)
        .bind(Utc::now())
        .bind(module.id)
        .execute(pool)
        .await
        .context("Failed to update module")?;
    get_by_id_mysql(pool, module.id)
        .await?
        .ok_or_else(|| anyhow!("Module not found after update"))
}

async fn delete_mysql(pool: &MySqlPool, id: i64) -> Result<bool> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;
    let row = sqlx::query("SELECT course_id, sort_order FROM modules WHERE id = ? FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to get module")?;
    let Some(row) = row else {
        return Ok(false);
    };
    let course_id: i64 = row.get("course_id");
    let order: i32 = row.get("sort_order");

    purge_items_mysql(&mut tx, ItemScope::Module(id)).await?;
    sqlx::query("DELETE FROM modules WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await
        .context("Failed to delete module")?;
    ordering::compact_mysql(&mut tx, &MODULE_ORDER, &[course_id], order).await?;

    tx.commit().await.context("Failed to commit module delete")?;
    Ok(true)
}

fn row_to_module_mysql(row: &sqlx::mysql::MySqlRow) -> Module {
    Module {
        id: row.get("id"),
        course_id: row.get("course_id"),
        title: row.get("title"),
        description: row.get("description"),
        order: row.get("sort_order"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_test_pool, is_unique_violation_on, migrations};

    async fn setup() -> (SqlxModuleRepository, i64, i64) {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        let sqlite = pool.sqlite().unwrap();

        let owner = sqlx::query("INSERT INTO users (username, password_hash) VALUES ('owner', 'x')")
            .execute(sqlite)
            .await
            .unwrap()
            .last_insert_rowid();
        let subject = sqlx::query("INSERT INTO subjects (title, slug) VALUES ('Maths', 'maths')")
            .execute(sqlite)
            .await
            .unwrap()
            .last_insert_rowid();
        let mut courses = Vec::new();
        for slug in ["algebra", "geometry"] {
            courses.push(
                sqlx::query("INSERT INTO courses (owner_id, subject_id, slug) VALUES (?, ?, ?)")
                    .bind(owner)
                    .bind(subject)
                    .bind(slug)
                    .execute(sqlite)
                    .await
                    .unwrap()
                    .last_insert_rowid(),
            );
        }

        (SqlxModuleRepository::new(pool.clone()), courses[0], courses[1])
    }

    #[tokio::test]
    async fn test_auto_order_per_course() {
        let (repo, first, second) = setup().await;

        let a = repo.create(&CreateModuleInput::new(first, "A")).await.unwrap();
        let b = repo.create(&CreateModuleInput::new(first, "B")).await.unwrap();
        let x = repo.create(&CreateModuleInput::new(second, "X")).await.unwrap();

        assert_eq!((a.order, b.order, x.order), (0, 1, 0));
        assert_eq!(repo.next_order(first).await.unwrap(), 2);
        assert_eq!(repo.next_order(second).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_explicit_order_then_auto() {
        let (repo, course, _) = setup().await;

        let explicit = repo.create(&CreateModuleInput::new(course, "Five").with_order(5)).await.unwrap();
        assert_eq!(explicit.order, 5);
        let next = repo.create(&CreateModuleInput::new(course, "Next")).await.unwrap();
        assert_eq!(next.order, 6);

        let err = repo.create(&CreateModuleInput::new(course, "Dup").with_order(5)).await.unwrap_err();
        assert!(is_unique_violation_on(&err, "sort_order"));
    }

    #[tokio::test]
    async fn test_update_keeps_order() {
        let (repo, course, _) = setup().await;
        let mut module = repo.create(&CreateModuleInput::new(course, "A")).await.unwrap();

        module.title = Some("Renamed".to_string());
        module.description = Some("About".to_string());
        module.order = 42;
        let updated = repo.update(&module).await.unwrap();

        assert_eq!(updated.title.as_deref(), Some("Renamed"));
        assert_eq!(updated.description.as_deref(), Some("About"));
        assert_eq!(updated.order, 0);
    }

    #[tokio::test]
    async fn test_delete_middle_compacts() {
        let (repo, course, _) = setup().await;
        let a = repo.create(&CreateModuleInput::new(course, "A")).await.unwrap();
        let b = repo.create(&CreateModuleInput::new(course, "B")).await.unwrap();
        let c = repo.create(&CreateModuleInput::new(course, "C")).await.unwrap();

        assert!(repo.delete(b.id).await.unwrap());
        let remaining: Vec<(i64, i32)> =
            repo.list_by_course(course).await.unwrap().iter().map(|m| (m.id, m.order)).collect();
        assert_eq!(remaining, vec![(a.id, 0), (c.id, 1)]);
        assert!(!repo.delete(b.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_reorder() {
        let (repo, course, _) = setup().await;
        let a = repo.create(&CreateModuleInput::new(course, "A")).await.unwrap();
        let b = repo.create(&CreateModuleInput::new(course, "B")).await.unwrap();
        let c = repo.create(&CreateModuleInput::new(course, "C")).await.unwrap();

        repo.reorder(course, &[c.id, a.id, b.id]).await.unwrap();
        let titles: Vec<String> = repo
            .list_by_course(course)
            .await
            .unwrap()
            .into_iter()
            .filter_map(|m| m.title)
            .collect();
        assert_eq!(titles, vec!["C", "A", "B"]);

        assert!(repo.reorder(course, &[a.id, b.id]).await.is_err());
        // A rejected reorder leaves the previous order intact
        let orders: Vec<i32> = repo.list_by_course(course).await.unwrap().iter().map(|m| m.order).collect();
        assert_eq!(orders, vec![0, 1, 2]);
    }
}
