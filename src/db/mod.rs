//! Database layer
//!
//! This module provides database abstraction for coursedesk.
//! It supports:
//! - SQLite (default, for single-binary deployment)
//! - MySQL (for larger deployments)
//!
//! The database driver is selected based on configuration.
//!
//! # Usage
//!
//! ```ignore
//! use coursedesk::config::DatabaseConfig;
//! use coursedesk::db::{create_pool, migrations};
//!
//! let pool = create_pool(&DatabaseConfig::default()).await?;
//! migrations::run_migrations(&pool).await?;
//! pool.ping().await?;
//! ```

pub mod migrations;
pub mod ordering;
pub mod pool;
pub mod repositories;

pub use ordering::{is_permutation, OrderField, CONTENT_ORDER, MODULE_ORDER};
pub use pool::{
    create_pool, create_test_pool, DatabasePool, DynDatabasePool, MysqlDatabase, SqliteDatabase,
};

/// Whether `err` was caused by a unique constraint on `column`.
///
/// Repositories wrap sqlx errors in `anyhow` context, so the chain is walked
/// until the driver error is found. SQLite reports `table.column` in the
/// message, MySQL reports the index name; every unique index is named after
/// the column it guards so both forms match.
pub fn is_unique_violation_on(err: &anyhow::Error, column: &str) -> bool {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<sqlx::Error>())
        .and_then(|e| e.as_database_error())
        .map(|e| e.is_unique_violation() && violated_target(e.message()).contains(column))
        .unwrap_or(false)
}

/// The part of a driver message that names the index or columns. MySQL also
/// quotes the offending value, which must not be matched against.
fn violated_target(message: &str) -> &str {
    message
        .rsplit_once(" for key ")
        .or_else(|| message.rsplit_once("constraint failed: "))
        .map(|(_, target)| target)
        .unwrap_or(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[tokio::test]
    async fn test_unique_violation_detected_through_context() {
        let pool = create_test_pool().await.unwrap();
        pool.execute("CREATE TABLE things (id INTEGER PRIMARY KEY, slug TEXT NOT NULL UNIQUE)")
            .await
            .unwrap();
        pool.execute("INSERT INTO things (slug) VALUES ('a')").await.unwrap();

        let err = sqlx::query("INSERT INTO things (slug) VALUES ('a')")
            .execute(pool.sqlite().unwrap())
            .await
            .context("Failed to insert thing")
            .unwrap_err();

        assert!(is_unique_violation_on(&err, "slug"));
        assert!(!is_unique_violation_on(&err, "title"));
    }

    #[test]
    fn test_violated_target_ignores_value() {
        assert_eq!(
            violated_target("Duplicate entry 'slug' for key 'subjects.title'"),
            "'subjects.title'"
        );
        assert_eq!(
            violated_target("UNIQUE constraint failed: modules.course_id, modules.sort_order"),
            "modules.course_id, modules.sort_order"
        );
    }

    #[test]
    fn test_non_database_error_is_not_a_violation() {
        let err = anyhow::anyhow!("slug went missing");
        assert!(!is_unique_violation_on(&err, "slug"));
    }
}
