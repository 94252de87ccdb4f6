//! Scoped ordering
//!
//! An [`OrderField`] describes an integer position column that is sequential
//! among the rows sharing the same values in `for_fields` (the scope). The
//! SQL it builds keeps every scope at `0..n` with no duplicates:
//!
//! - auto-assignment is a single `INSERT ... SELECT COALESCE(MAX(col) + 1, 0)`
//!   so the read and the write happen in one statement
//! - every table carrying an order column has a `UNIQUE(scope, col)` index as
//!   the backstop for whatever still races
//! - reorder and compaction go through negative temporaries so the unique
//!   index holds after every row update

use anyhow::{ensure, Context, Result};
use sqlx::{MySqlConnection, MySqlPool, Row, SqliteConnection, SqlitePool};

/// Order column of an entity table and the columns that scope it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderField {
    /// Table holding the rows
    pub table: &'static str,
    /// Integer position column
    pub column: &'static str,
    /// Columns whose values define a sibling group
    pub for_fields: &'static [&'static str],
}

/// Modules are ordered within their course
pub const MODULE_ORDER: OrderField = OrderField {
    table: "modules",
    column: "sort_order",
    for_fields: &["course_id"],
};

/// Contents are ordered within their module
pub const CONTENT_ORDER: OrderField = OrderField {
    table: "contents",
    column: "sort_order",
    for_fields: &["module_id"],
};

impl OrderField {
    /// `WHERE` predicate selecting one scope, one placeholder per scope field
    pub fn scope_clause(&self) -> String {
        if self.for_fields.is_empty() {
            return "1 = 1".to_string();
        }
        self.for_fields
            .iter()
            .map(|field| format!("{} = ?", field))
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    /// Expression for the next value in a scope (0 for an empty scope)
    fn next_value_expr(&self) -> String {
        format!("COALESCE(MAX({}) + 1, 0)", self.column)
    }

    /// Query returning the value the next auto-ordered insert would receive
    pub fn next_value_sql(&self) -> String {
        format!(
            "SELECT {} AS next_order FROM {} WHERE {}",
            self.next_value_expr(),
            self.table,
            self.scope_clause()
        )
    }

    /// Insert that computes the order column in the same statement.
    ///
    /// Binds: one value per entry of `columns`, then the scope values.
    pub fn auto_insert_sql(&self, columns: &[&str]) -> String {
        let placeholders = vec!["?"; columns.len()].join(", ");
        format!(
            "INSERT INTO {table} ({columns}, {order}) SELECT {placeholders}, {next} FROM {table} WHERE {scope}",
            table = self.table,
            columns = columns.join(", "),
            order = self.column,
            placeholders = placeholders,
            next = self.next_value_expr(),
            scope = self.scope_clause(),
        )
    }

    /// Plain insert with a caller-supplied order value bound last
    pub fn explicit_insert_sql(&self, columns: &[&str]) -> String {
        let placeholders = vec!["?"; columns.len() + 1].join(", ");
        format!(
            "INSERT INTO {} ({}, {}) VALUES ({})",
            self.table,
            columns.join(", "),
            self.column,
            placeholders
        )
    }

    /// Ids of one scope in their current order
    pub fn scope_ids_sql(&self) -> String {
        format!(
            "SELECT id FROM {} WHERE {} ORDER BY {}",
            self.table,
            self.scope_clause(),
            self.column
        )
    }

    /// Moves every row of a scope to a distinct negative temporary
    pub fn park_sql(&self) -> String {
        format!(
            "UPDATE {table} SET {col} = -{col} - 1 WHERE {scope}",
            table = self.table,
            col = self.column,
            scope = self.scope_clause()
        )
    }

    /// Sets one row's order. Binds: order, id, then the scope values.
    pub fn assign_sql(&self) -> String {
        format!(
            "UPDATE {} SET {} = ? WHERE id = ? AND {}",
            self.table,
            self.column,
            self.scope_clause()
        )
    }

    /// The two statements closing the gap left at a removed position.
    ///
    /// Binds for both: the scope values, then (first statement only) the
    /// removed position.
    pub fn compact_sql(&self) -> (String, String) {
        let lift = format!(
            "UPDATE {table} SET {col} = -{col} WHERE {scope} AND {col} > ?",
            table = self.table,
            col = self.column,
            scope = self.scope_clause()
        );
        let settle = format!(
            "UPDATE {table} SET {col} = -{col} - 1 WHERE {scope} AND {col} < 0",
            table = self.table,
            col = self.column,
            scope = self.scope_clause()
        );
        (lift, settle)
    }

    fn check_scope(&self, scope: &[i64]) -> Result<()> {
        ensure!(
            scope.len() == self.for_fields.len(),
            "{}.{} is scoped by {} field(s), got {} value(s)",
            self.table,
            self.column,
            self.for_fields.len(),
            scope.len()
        );
        Ok(())
    }
}

/// Whether `wanted` holds exactly the ids in `current`, each once
pub fn is_permutation(current: &[i64], wanted: &[i64]) -> bool {
    let mut current = current.to_vec();
    let mut wanted = wanted.to_vec();
    current.sort_unstable();
    wanted.sort_unstable();
    current == wanted
}

/// Narrow a computed order to the column type
fn to_order(value: i64) -> Result<i32> {
    i32::try_from(value).with_context(|| format!("Order value {} out of range", value))
}

// ============================================================================
// SQLite implementations
// ============================================================================

pub async fn next_order_sqlite(pool: &SqlitePool, field: &OrderField, scope: &[i64]) -> Result<i32> {
    field.check_scope(scope)?;
    let sql = field.next_value_sql();
    let mut query = sqlx::query(&sql);
    for value in scope {
        query = query.bind(*value);
    }
    let row = query
        .fetch_one(pool)
        .await
        .with_context(|| format!("Failed to compute next order for {}", field.table))?;
    to_order(row.get::<i64, _>("next_order"))
}

pub async fn scope_ids_sqlite(conn: &mut SqliteConnection, field: &OrderField, scope: &[i64]) -> Result<Vec<i64>> {
    field.check_scope(scope)?;
    let sql = field.scope_ids_sql();
    let mut query = sqlx::query(&sql);
    for value in scope {
        query = query.bind(*value);
    }
    let rows = query
        .fetch_all(&mut *conn)
        .await
        .with_context(|| format!("Failed to list {} in scope", field.table))?;
    Ok(rows.iter().map(|row| row.get("id")).collect())
}

/// Assign `0..n` following `ordered_ids`, which must be the whole scope.
///
/// Must run inside a transaction. Parking comes first so the transaction
/// takes the write lock before it reads; a read-then-write transaction can
/// be refused with `SQLITE_BUSY` while another writer holds the lock.
pub async fn reorder_sqlite(
    conn: &mut SqliteConnection,
    field: &OrderField,
    scope: &[i64],
    ordered_ids: &[i64],
) -> Result<()> {
    field.check_scope(scope)?;
    let park = field.park_sql();
    let mut query = sqlx::query(&park);
    for value in scope {
        query = query.bind(*value);
    }
    query
        .execute(&mut *conn)
        .await
        .with_context(|| format!("Failed to park {} orders", field.table))?;

    let current = scope_ids_sqlite(conn, field, scope).await?;
    ensure!(
        is_permutation(&current, ordered_ids),
        "Reorder ids do not match the {} in scope",
        field.table
    );

    let assign = field.assign_sql();
    for (position, id) in ordered_ids.iter().enumerate() {
        let mut query = sqlx::query(&assign).bind(to_order(position as i64)?).bind(*id);
        for value in scope {
            query = query.bind(*value);
        }
        query
            .execute(&mut *conn)
            .await
            .with_context(|| format!("Failed to assign order to {} {}", field.table, id))?;
    }

    Ok(())
}

/// Shift every sibling after `removed` down by one
pub async fn compact_sqlite(
    conn: &mut SqliteConnection,
    field: &OrderField,
    scope: &[i64],
    removed: i32,
) -> Result<()> {
    field.check_scope(scope)?;
    let (lift, settle) = field.compact_sql();

    let mut query = sqlx::query(&lift);
    for value in scope {
        query = query.bind(*value);
    }
    query
        .bind(removed)
        .execute(&mut *conn)
        .await
        .with_context(|| format!("Failed to lift {} orders", field.table))?;

    let mut query = sqlx::query(&settle);
    for value in scope {
        query = query.bind(*value);
    }
    query
        .execute(&mut *conn)
        .await
        .with_context(|| format!("Failed to settle {} orders", field.table))?;

    Ok(())
}

// ============================================================================
// MySQL implementations
// ============================================================================

pub async fn next_order_mysql(pool: &MySqlPool, field: &OrderField, scope: &[i64]) -> Result<i32> {
    field.check_scope(scope)?;
    let sql = field.next_value_sql();
    let mut query = sqlx::query(&sql);
    for value in scope {
        query = query.bind(*value);
    }
    let row = query
        .fetch_one(pool)
        .await
        .with_context(|| format!("Failed to compute next order for {}", field.table))?;
    to_order(row.get::<i64, _>("next_order"))
}

pub async fn scope_ids_mysql(conn: &mut MySqlConnection, field: &OrderField, scope: &[i64]) -> Result<Vec<i64>> {
    field.check_scope(scope)?;
    let sql = field.scope_ids_sql();
    let mut query = sqlx::query(&sql);
    for value in scope {
        query = query.bind(*value);
    }
    let rows = query
        .fetch_all(&mut *conn)
        .await
        .with_context(|| format!("Failed to list {} in scope", field.table))?;
    Ok(rows.iter().map(|row| row.get("id")).collect())
}

pub async fn reorder_mysql(
    conn: &mut MySqlConnection,
    field: &OrderField,
    scope: &[i64],
    ordered_ids: &[i64],
) -> Result<()> {
    let current = scope_ids_mysql(conn, field, scope).await?;
    ensure!(
        is_permutation(&current, ordered_ids),
        "Reorder ids do not match the {} in scope",
        field.table
    );

    let park = field.park_sql();
    let mut query = sqlx::query(&park);
    for value in scope {
        query = query.bind(*value);
    }
    query
        .execute(&mut *conn)
        .await
        .with_context(|| format!("Failed to park {} orders", field.table))?;

    let assign = field.assign_sql();
    for (position, id) in ordered_ids.iter().enumerate() {
        let mut query = sqlx::query(&assign).bind(to_order(position as i64)?).bind(*id);
        for value in scope {
            query = query.bind(*value);
        }
        query
            .execute(&mut *conn)
            .await
            .with_context(|| format!("Failed to assign order to {} {}", field.table, id))?;
    }

    Ok(())
}

pub async fn compact_mysql(
    conn: &mut MySqlConnection,
    field: &OrderField,
    scope: &[i64],
    removed: i32,
) -> Result<()> {
    field.check_scope(scope)?;
    let (lift, settle) = field.compact_sql();

    let mut query = sqlx::query(&lift);
    for value in scope {
        query = query.bind(*value);
    }
    query
        .bind(removed)
        .execute(&mut *conn)
        .await
        .with_context(|| format!("Failed to lift {} orders", field.table))?;

    let mut query = sqlx::query(&settle);
    for value in scope {
        query = query.bind(*value);
    }
    query
        .execute(&mut *conn)
        .await
        .with_context(|| format!("Failed to settle {} orders", field.table))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;
    use proptest::prelude::*;

    const SCRATCH: OrderField = OrderField {
        table: "scratch",
        column: "sort_order",
        for_fields: &["group_id"],
    };

    #[test]
    fn test_is_permutation() {
        assert!(is_permutation(&[1, 2, 3], &[3, 1, 2]));
        assert!(is_permutation(&[], &[]));
        assert!(!is_permutation(&[1, 2, 3], &[1, 2]));
        assert!(!is_permutation(&[1, 2, 3], &[1, 2, 2]));
        assert!(!is_permutation(&[1, 2], &[1, 2, 9]));
    }

    async fn scratch_pool() -> crate::db::DynDatabasePool {
        let pool = create_test_pool().await.unwrap();
        pool.execute(
            "CREATE TABLE scratch (id INTEGER PRIMARY KEY AUTOINCREMENT, group_id INTEGER NOT NULL, label TEXT, sort_order INTEGER NOT NULL)",
        )
        .await
        .unwrap();
        pool.execute("CREATE UNIQUE INDEX uq_scratch_sort_order ON scratch(group_id, sort_order)")
            .await
            .unwrap();
        pool
    }

    async fn insert_auto(pool: &SqlitePool, group: i64, label: &str) -> i64 {
        let sql = SCRATCH.auto_insert_sql(&["group_id", "label"]);
        sqlx::query(&sql)
            .bind(group)
            .bind(label)
            .bind(group)
            .execute(pool)
            .await
            .unwrap()
            .last_insert_rowid()
    }

    async fn orders(pool: &SqlitePool, group: i64) -> Vec<(String, i32)> {
        sqlx::query("SELECT label, sort_order FROM scratch WHERE group_id = ? ORDER BY sort_order")
            .bind(group)
            .fetch_all(pool)
            .await
            .unwrap()
            .iter()
            .map(|row| (row.get("label"), row.get("sort_order")))
            .collect()
    }

    #[test]
    fn test_scope_clause() {
        assert_eq!(MODULE_ORDER.scope_clause(), "course_id = ?");
        let two = OrderField {
            table: "t",
            column: "pos",
            for_fields: &["a", "b"],
        };
        assert_eq!(two.scope_clause(), "a = ? AND b = ?");
        let none = OrderField {
            table: "t",
            column: "pos",
            for_fields: &[],
        };
        assert_eq!(none.scope_clause(), "1 = 1");
    }

    #[test]
    fn test_auto_insert_sql_shape() {
        let sql = CONTENT_ORDER.auto_insert_sql(&["module_id", "item_kind", "object_id"]);
        assert_eq!(
            sql,
            "INSERT INTO contents (module_id, item_kind, object_id, sort_order) SELECT ?, ?, ?, COALESCE(MAX(sort_order) + 1, 0) FROM contents WHERE module_id = ?"
        );
    }

    #[test]
    fn test_explicit_insert_sql_shape() {
        let sql = MODULE_ORDER.explicit_insert_sql(&["course_id", "title"]);
        assert_eq!(sql, "INSERT INTO modules (course_id, title, sort_order) VALUES (?, ?, ?)");
    }

    #[tokio::test]
    async fn test_empty_scope_starts_at_zero() {
        let pool = scratch_pool().await;
        let next = next_order_sqlite(pool.sqlite().unwrap(), &SCRATCH, &[7]).await.unwrap();
        assert_eq!(next, 0);
    }

    #[tokio::test]
    async fn test_auto_insert_is_sequential_per_scope() {
        let pool = scratch_pool().await;
        let sqlite = pool.sqlite().unwrap();

        insert_auto(sqlite, 1, "a").await;
        insert_auto(sqlite, 1, "b").await;
        insert_auto(sqlite, 2, "x").await;
        insert_auto(sqlite, 1, "c").await;

        assert_eq!(
            orders(sqlite, 1).await,
            vec![("a".to_string(), 0), ("b".to_string(), 1), ("c".to_string(), 2)]
        );
        assert_eq!(orders(sqlite, 2).await, vec![("x".to_string(), 0)]);
        assert_eq!(next_order_sqlite(sqlite, &SCRATCH, &[1]).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_wrong_scope_arity_rejected() {
        let pool = scratch_pool().await;
        let result = next_order_sqlite(pool.sqlite().unwrap(), &SCRATCH, &[1, 2]).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_compact_closes_gap() {
        let pool = scratch_pool().await;
        let sqlite = pool.sqlite().unwrap();
        for label in ["a", "b", "c", "d"] {
            insert_auto(sqlite, 1, label).await;
        }

        let mut tx = sqlite.begin().await.unwrap();
        sqlx::query("DELETE FROM scratch WHERE label = 'b'")
            .execute(&mut *tx)
            .await
            .unwrap();
        compact_sqlite(&mut tx, &SCRATCH, &[1], 1).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(
            orders(sqlite, 1).await,
            vec![("a".to_string(), 0), ("c".to_string(), 1), ("d".to_string(), 2)]
        );
    }

    #[tokio::test]
    async fn test_reorder_requires_full_scope() {
        let pool = scratch_pool().await;
        let sqlite = pool.sqlite().unwrap();
        let a = insert_auto(sqlite, 1, "a").await;
        insert_auto(sqlite, 1, "b").await;

        let mut tx = sqlite.begin().await.unwrap();
        let result = reorder_sqlite(&mut tx, &SCRATCH, &[1], &[a]).await;
        assert!(result.is_err());
        tx.rollback().await.unwrap();

        // The parked orders went with the rollback
        assert_eq!(orders(sqlite, 1).await, vec![("a".to_string(), 0), ("b".to_string(), 1)]);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(20))]

        /// Any permutation of a scope is applied exactly and stays gapless
        #[test]
        fn reorder_applies_permutation(order in Just((0..6usize).collect::<Vec<_>>()).prop_shuffle()) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let pool = scratch_pool().await;
                let sqlite = pool.sqlite().unwrap();
                let mut ids = Vec::new();
                for i in 0..6 {
                    ids.push(insert_auto(sqlite, 1, &format!("n{}", i)).await);
                }
                let wanted: Vec<i64> = order.iter().map(|&i| ids[i]).collect();

                let mut tx = sqlite.begin().await.unwrap();
                reorder_sqlite(&mut tx, &SCRATCH, &[1], &wanted).await.unwrap();
                tx.commit().await.unwrap();

                let rows = orders(sqlite, 1).await;
                let labels: Vec<String> = rows.iter().map(|(l, _)| l.clone()).collect();
                let expected: Vec<String> = order.iter().map(|i| format!("n{}", i)).collect();
                prop_assert_eq!(labels, expected);
                let positions: Vec<i32> = rows.iter().map(|(_, p)| *p).collect();
                prop_assert_eq!(positions, (0..6).collect::<Vec<i32>>());
                Ok(())
            })?;
        }
    }
}
