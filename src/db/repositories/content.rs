//! Content repository
//!
//! Contents and their items are written together: the item row goes into the
//! table for its kind, then the content row pointing at it, in one
//! transaction. Deletes remove the item rows first because the
//! `(item_kind, object_id)` pair carries no foreign key.

use crate::config::DatabaseDriver;
use crate::db::ordering::{self, CONTENT_ORDER};
use crate::db::DynDatabasePool;
use crate::models::{
    Content, ContentWithItem, CreateContentInput, File, Image, Item, ItemBase, ItemKind, Text, Video,
};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{MySqlConnection, MySqlPool, Row, SqliteConnection, SqlitePool};
use std::sync::Arc;

#[async_trait]
pub trait ContentRepository: Send + Sync {
    /// Insert the item and its content. The order is auto-assigned when
    /// `input.order` is `None`.
    async fn create(&self, input: &CreateContentInput) -> Result<ContentWithItem>;
    async fn get_by_id(&self, id: i64) -> Result<Option<ContentWithItem>>;
    /// Contents of a module by order
    async fn list_by_module(&self, module_id: i64) -> Result<Vec<ContentWithItem>>;
    async fn next_order(&self, module_id: i64) -> Result<i32>;
    /// Persist an item's title and payload
    async fn update_item(&self, item: &Item) -> Result<Item>;
    /// Apply `ordered_ids` as the module's new order
    async fn reorder(&self, module_id: i64, ordered_ids: &[i64]) -> Result<()>;
    /// Delete a content and its item, closing the gap it leaves
    async fn delete(&self, id: i64) -> Result<bool>;
}

pub struct SqlxContentRepository {
    pool: DynDatabasePool,
}

impl SqlxContentRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn ContentRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl ContentRepository for SqlxContentRepository {
    async fn create(&self, input: &CreateContentInput) -> Result<ContentWithItem> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => create_sqlite(self.pool.sqlite()?, input).await,
            DatabaseDriver::Mysql => create_mysql(self.pool.mysql()?, input).await,
        }
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<ContentWithItem>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let mut conn = self.pool.sqlite()?.acquire().await.context("Failed to acquire connection")?;
                get_by_id_sqlite(&mut conn, id).await
            }
            DatabaseDriver::Mysql => {
                let mut conn = self.pool.mysql()?.acquire().await.context("Failed to acquire connection")?;
                get_by_id_mysql(&mut conn, id).await
            }
        }
    }

    async fn list_by_module(&self, module_id: i64) -> Result<Vec<ContentWithItem>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => list_by_module_sqlite(self.pool.sqlite()?, module_id).await,
            DatabaseDriver::Mysql => list_by_module_mysql(self.pool.mysql()?, module_id).await,
        }
    }

    async fn next_order(&self, module_id: i64) -> Result<i32> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => ordering::next_order_sqlite(self.pool.sqlite()?, &CONTENT_ORDER, &[module_id]).await,
            DatabaseDriver::Mysql => ordering::next_order_mysql(self.pool.mysql()?, &CONTENT_ORDER, &[module_id]).await,
        }
    }

    async fn update_item(&self, item: &Item) -> Result<Item> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => update_item_sqlite(self.pool.sqlite()?, item).await,
            DatabaseDriver::Mysql => update_item_mysql(self.pool.mysql()?, item).await,
        }
    }

    async fn reorder(&self, module_id: i64, ordered_ids: &[i64]) -> Result<()> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let mut tx = self.pool.sqlite()?.begin().await.context("Failed to begin transaction")?;
                ordering::reorder_sqlite(&mut tx, &CONTENT_ORDER, &[module_id], ordered_ids).await?;
                tx.commit().await.context("Failed to commit content reorder")
            }
            DatabaseDriver::Mysql => {
                let mut tx = self.pool.mysql()?.begin().await.context("Failed to begin transaction")?;
                ordering::reorder_mysql(&mut tx, &CONTENT_ORDER, &[module_id], ordered_ids).await?;
                tx.commit().await.context("Failed to commit content reorder")
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

// ============================================================================
// Item purging, shared with the module, course and subject repositories
// ============================================================================

/// The contents whose items a delete must remove
#[derive(Debug, Clone, Copy)]
pub(crate) enum ItemScope {
    Content(i64),
    Module(i64),
    Course(i64),
    Subject(i64),
}

impl ItemScope {
    /// Subquery selecting the object ids of one kind. Binds: kind, then id.
    fn object_ids_sql(&self) -> &'static str {
        match self {
            ItemScope::Content(_) => "SELECT object_id FROM contents WHERE item_kind = ? AND id = ?",
            ItemScope::Module(_) => "SELECT object_id FROM contents WHERE item_kind = ? AND module_id = ?",
            ItemScope::Course(_) => {
                "SELECT c.object_id FROM contents c JOIN modules m ON m.id = c.module_id WHERE c.item_kind = ? AND m.course_id = ?"
            }
            ItemScope::Subject(_) => {
                "SELECT c.object_id FROM contents c JOIN modules m ON m.id = c.module_id JOIN courses co ON co.id = m.course_id WHERE c.item_kind = ? AND co.subject_id = ?"
            }
        }
    }

    fn id(&self) -> i64 {
        match *self {
            ItemScope::Content(id) | ItemScope::Module(id) | ItemScope::Course(id) | ItemScope::Subject(id) => id,
        }
    }

    fn purge_sql(&self, kind: ItemKind) -> String {
        format!("DELETE FROM {} WHERE id IN ({})", kind.table(), self.object_ids_sql())
    }
}

pub(crate) async fn purge_items_sqlite(conn: &mut SqliteConnection, scope: ItemScope) -> Result<u64> {
    let mut removed = 0;
    for kind in ItemKind::ALL {
        removed += sqlx::query(&scope.purge_sql(kind))
            .bind(kind.as_str())
            .bind(scope.id())
            .execute(&mut *conn)
            .await
            .with_context(|| format!("Failed to purge {} items", kind))?
            .rows_affected();
    }
    Ok(removed)
}

pub(crate) async fn purge_items_mysql(conn: &mut MySqlConnection, scope: ItemScope) -> Result<u64> {
    let mut removed = 0;
    for kind in ItemKind::ALL {
        removed += sqlx::query(&scope.purge_sql(kind))
            .bind(kind.as_str())
            .bind(scope.id())
            .execute(&mut *conn)
            .await
            .with_context(|| format!("Failed to purge {} items", kind))?
            .rows_affected();
    }
    Ok(removed)
}

const SELECT_CONTENT: &str = "SELECT id, module_id, item_kind, object_id, sort_order, created_at FROM contents";

const CONTENT_COLUMNS: &[&str] = &["module_id", "item_kind", "object_id", "created_at"];

fn insert_item_sql(kind: ItemKind) -> String {
    format!(
        "INSERT INTO {} (owner_id, title, {}, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
        kind.table(),
        kind.payload_column()
    )
}

fn select_item_sql(kind: ItemKind) -> String {
    format!(
        "SELECT id, owner_id, title, {} AS payload, created_at, updated_at FROM {} WHERE id = ?",
        kind.payload_column(),
        kind.table()
    )
}

fn update_item_sql(kind: ItemKind) -> String {
    format!(
        "UPDATE {} SET title = ?, {} = ?, updated_at = ? WHERE id = ?",
        kind.table(),
        kind.payload_column()
    )
}

/// Build an item from the columns every item table shares
fn assemble_item(
    kind: ItemKind,
    id: i64,
    base: ItemBase,
    payload: Option<String>,
) -> Item {
    match kind {
        ItemKind::Text => Item::Text(Text { id, base, content: payload }),
        ItemKind::File => Item::File(File { id, base, file: payload.unwrap_or_default() }),
        ItemKind::Image => Item::Image(Image { id, base, image: payload.unwrap_or_default() }),
        ItemKind::Video => Item::Video(Video { id, base, url: payload.unwrap_or_default() }),
    }
}

fn payload_of(item: &Item) -> Option<&str> {
    match item {
        Item::Text(t) => t.content.as_deref(),
        Item::File(f) => Some(&f.file),
        Item::Image(i) => Some(&i.image),
        Item::Video(v) => Some(&v.url),
    }
}

fn parse_kind(raw: &str) -> Result<ItemKind> {
    raw.parse::<ItemKind>().map_err(|e| anyhow!(e))
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_sqlite(pool: &SqlitePool, input: &CreateContentInput) -> Result<ContentWithItem> {
    let kind = input.payload.kind();
    let now = Utc::now();
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let object_id = sqlx::query(&insert_item_sql(kind))
        .bind(input.owner_id)
        .bind(&input.title)
        .bind(input.payload.value())
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("Failed to create {} item", kind))?
        .last_insert_rowid();

    let content_id = match input.order {
        Some(order) => sqlx::query(&CONTENT_ORDER.explicit_insert_sql(CONTENT_COLUMNS))
            .bind(input.module_id)
            .bind(kind.as_str())
            .bind(object_id)
            .bind(now)
            .bind(order)
            .execute(&mut *tx)
            .await
            .context("Failed to create content")?
            .last_insert_rowid(),
        None => sqlx::query(&CONTENT_ORDER.auto_insert_sql(CONTENT_COLUMNS))
            .bind(input.module_id)
            .bind(kind.as_str())
            .bind(object_id)
            .bind(now)
            .bind(input.module_id)
            .execute(&mut *tx)
            .await
            .context("Failed to create content")?
            .last_insert_rowid(),
    };

    let created = get_by_id_sqlite(&mut tx, content_id)
        .await?
        .ok_or_else(|| anyhow!("Content not found after create"))?;
    tx.commit().await.context("Failed to commit content")?;
    Ok(created)
}

async fn get_by_id_sqlite(conn: &mut SqliteConnection, id: i64) -> Result<Option<ContentWithItem>> {
    let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_CONTENT))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to get content")?;
    match row {
        Some(row) => {
            let content = row_to_content_sqlite(&row)?;
            Ok(Some(with_item_sqlite(conn, content).await?))
        }
        None => Ok(None),
    }
}

async fn list_by_module_sqlite(pool: &SqlitePool, module_id: i64) -> Result<Vec<ContentWithItem>> {
    let mut conn = pool.acquire().await.context("Failed to acquire connection")?;
    let rows = sqlx::query(&format!("{} WHERE module_id = ? ORDER BY sort_order", SELECT_CONTENT))
        .bind(module_id)
        .fetch_all(&mut *conn)
        .await
        .context("Failed to list contents")?;

    let mut contents = Vec::with_capacity(rows.len());
    for row in &rows {
        let content = row_to_content_sqlite(row)?;
        contents.push(with_item_sqlite(&mut conn, content).await?);
    }
    Ok(contents)
}

async fn with_item_sqlite(conn: &mut SqliteConnection, content: Content) -> Result<ContentWithItem> {
    let row = sqlx::query(&select_item_sql(content.kind))
        .bind(content.object_id)
        .fetch_optional(&mut *conn)
        .await
        .with_context(|| format!("Failed to get {} item", content.kind))?
        .ok_or_else(|| anyhow!("Content {} points at missing {} {}", content.id, content.kind, content.object_id))?;
    let item = row_to_item_sqlite(content.kind, &row);
    Ok(ContentWithItem { content, item })
}

async fn update_item_sqlite(pool: &SqlitePool, item: &Item) -> Result<Item> {
    let kind = item.kind();
    let now = Utc::now();
    sqlx::query(&update_item_sql(kind))
        .bind(&item.base().title)
        .bind(payload_of(item))
        .bind(now)
        .bind(item.id())
        .execute(pool)
        .await
        .with_context(|| format!("Failed to update {} item", kind))?;

    let row = sqlx::query(&select_item_sql(kind))
        .bind(item.id())
        .fetch_optional(pool)
        .await
        .with_context(|| format!("Failed to get {} item", kind))?
        .ok_or_else(|| anyhow!("Item not found after update"))?;
    Ok(row_to_item_sqlite(kind, &row))
}

/// Every statement writes, so the transaction holds the write lock from its
/// first step and concurrent deletes queue on the busy timeout.
async fn delete_sqlite(pool: &SqlitePool, id: i64) -> Result<bool> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;
    purge_items_sqlite(&mut tx, ItemScope::Content(id)).await?;

    let row = sqlx::query("DELETE FROM contents WHERE id = ? RETURNING module_id, sort_order")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to delete content")?;
    let Some(row) = row else {
        return Ok(false);
    };
    let module_id: i64 = row.get("module_id");
    let order: i32 = row.get("sort_order");

    ordering::compact_sqlite(&mut tx, &CONTENT_ORDER, &[module_id], order).await?;

    tx.commit().await.context("Failed to commit content delete")?;
    Ok(true)
}

fn row_to_content_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<Content> {
    let kind: String = row.get("item_kind");
    Ok(Content {
        id: row.get("id"),
        module_id: row.get("module_id"),
        kind: parse_kind(&kind)?,
        object_id: row.get("object_id"),
        order: row.get("sort_order"),
        created_at: row.get("created_at"),
    })
}

fn row_to_item_sqlite(kind: ItemKind, row: &sqlx::sqlite::SqliteRow) -> Item {
    let base = ItemBase {
        owner_id: row.get("owner_id"),
        title: row.get("title"),
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
        updated_at: row.get::<DateTime<Utc>, _>("updated_at"),
    };
    assemble_item(kind, row.get("id"), base, row.get("payload"))
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_mysql(pool: &MySqlPool, input: &CreateContentInput) -> Result<ContentWithItem> {
    let kind = input.payload.kind();
    let now = Utc::now();
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let object_id = sqlx::query(&insert_item_sql(kind))
        .bind(input.owner_id)
        .bind(&input.title)
        .bind(input.payload.value())
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("Failed to create {} item", kind))?
        .last_insert_id() as i64;

    let content_id = match input.order {
        Some(order) => sqlx::query(&CONTENT_ORDER.explicit_insert_sql(CONTENT_COLUMNS))
            .bind(input.module_id)
            .bind(kind.as_str())
            .bind(object_id)
            .bind(now)
            .bind(order)
            .execute(&mut *tx)
            .await
            .context("Failed to create content")?
            .last_insert_id() as i64,
        None => sqlx::query(&CONTENT_ORDER.auto_insert_sql(CONTENT_COLUMNS))
            .bind(input.module_id)
            .bind(kind.as_str())
            .bind(object_id)
            .bind(now)
            .bind(input.module_id)
            .execute(&mut *tx)
            .await
            .context("Failed to create content")?
            .last_insert_id() as i64,
    };

    let created = get_by_id_mysql(&mut tx, content_id)
        .await?
        .ok_or_else(|| anyhow!("Content not found after create"))?;
    tx.commit().await.context("Failed to commit content")?;
    Ok(created)
}

async fn get_by_id_mysql(conn: &mut MySqlConnection, id: i64) -> Result<Option<ContentWithItem>> {
    let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_CONTENT))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to get content")?;
    match row {
        Some(row) => {
            let content = row_to_content_mysql(&row)?;
            Ok(Some(with_item_mysql(conn, content).await?))
        }
        None => Ok(None),
    }
}

async fn list_by_module_mysql(pool: &MySqlPool, module_id: i64) -> Result<Vec<ContentWithItem>> {
    let mut conn = pool.acquire().await.context("Failed to acquire connection")?;
    let rows = sqlx::query(&format!("{} WHERE module_id = ? ORDER BY sort_order", SELECT_CONTENT))
        .bind(module_id)
        .fetch_all(&mut *conn)
        .await
        .context("Failed to list contents")?;

    let mut contents = Vec::with_capacity(rows.len());
    for row in &rows {
        let content = row_to_content_mysql(row)?;
        contents.push(with_item_mysql(&mut conn, content).await?);
    }
    Ok(contents)
}

async fn with_item_mysql(conn: &mut MySqlConnection, content: Content) -> Result<ContentWithItem> {
    let row = sqlx::query(&select_item_sql(content.kind))
        .bind(content.object_id)
        .fetch_optional(&mut *conn)
        .await
        .with_context(|| format!("Failed to get {} item", content.kind))?
        .ok_or_else(|| anyhow!("Content {} points at missing {} {}", content.id, content.kind, content.object_id))?;
    let item = row_to_item_mysql(content.kind, &row);
    Ok(ContentWithItem { content, item })
}

async fn update_item_mysql(pool: &MySqlPool, item: &Item) -> Result<Item> {
    let kind = item.kind();
    let now = Utc::now();
    sqlx::query(&update_item_sql(kind))
        .bind(&item.base().title)
        .bind(payload_of(item))
        .bind(now)
        .bind(item.id())
        .execute(pool)
        .await
        .with_context(|| format!("Failed to update {} item", kind))?;

    let row = sqlx::query(&select_item_sql(kind))
        .bind(item.id())
        .fetch_optional(pool)
        .await
        .with_context(|| format!("Failed to get {} item", kind))?
        .ok_or_else(|| anyhow!("Item not found after update"))?;
    Ok(row_to_item_mysql(kind, &row))
}

async fn delete_mysql(pool: &MySqlPool, id: i64) -> Result<bool> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;
    let row = sqlx::query("SELECT module_id, sort_order FROM contents WHERE id = ? FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to get content")?;
    let Some(row) = row else {
        return Ok(false);
    };
    let module_id: i64 = row.get("module_id");
    let order: i32 = row.get("sort_order");

    purge_items_mysql(&mut tx, ItemScope::Content(id)).await?;
    sqlx::query("DELETE FROM contents WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await
        .context("Failed to delete content")?;
    ordering::compact_mysql(&mut tx, &CONTENT_ORDER, &[module_id], order).await?;

    tx.commit().await.context("Failed to commit content delete")?;
    Ok(true)
}

fn row_to_content_mysql(row: &sqlx::mysql::MySqlRow) -> Result<Content> {
    let kind: String = row.get("item_kind");
    Ok(Content {
        id: row.get("id"),
        module_id: row.get("module_id"),
        kind: parse_kind(&kind)?,
        object_id: row.get("object_id"),
        order: row.get("sort_order"),
        created_at: row.get("created_at"),
    })
}

fn row_to_item_mysql(kind: ItemKind, row: &sqlx::mysql::MySqlRow) -> Item {
    let base = ItemBase {
        owner_id: row.get("owner_id"),
        title: row.get("title"),
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
        updated_at: row.get::<DateTime<Utc>, _>("updated_at"),
    };
    assemble_item(kind, row.get("id"), base, row.get("payload"))
}
