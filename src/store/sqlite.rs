//! SQLite-backed content store.
//!
//! Table and column names come from configuration, which only admits plain
//! identifiers; they are still double-quoted here so mixed-case columns such
//! as `hasImage` resolve exactly.

use async_trait::async_trait;
use tracing::{debug, instrument};

use super::{ContentStore, StoreError};
use crate::config::TableSpec;
use crate::db::Database;
use crate::model::{ContentItem, StoredImageRecord};

/// Content store over the local database.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    db: Database,
    image_records_table: String,
}

impl SqliteStore {
    #[must_use]
    pub fn new(db: Database, image_records_table: impl Into<String>) -> Self {
        Self {
            db,
            image_records_table: image_records_table.into(),
        }
    }

    /// The underlying database.
    #[must_use]
    pub fn database(&self) -> &Database {
        &self.db
    }
}

fn quote(operation: &'static str, ident: &str) -> Result<String, StoreError> {
    if ident.is_empty() || ident.contains('"') || ident.contains('\0') {
        return Err(StoreError::Backend {
            operation,
            reason: format!("unsafe identifier '{ident}'"),
        });
    }
    Ok(format!("\"{ident}\""))
}

type ItemRow = (String, Option<String>, Option<String>);

fn into_item(table: &TableSpec, (id, content, cluster_id): ItemRow) -> Option<ContentItem> {
    Some(ContentItem {
        id,
        source_table: table.name.clone(),
        text_content: content?,
        cluster_id,
    })
}

#[async_trait]
impl ContentStore for SqliteStore {
    #[instrument(skip(self, table), fields(table = %table.name))]
    async fn fetch_items_without_image(&self, table: &TableSpec, limit: usize) -> Result<Vec<ContentItem>, StoreError> {
        let operation = "fetch_items_without_image";
        let sql = format!(
            "SELECT CAST({id} AS TEXT), {content}, CAST(cluster_id AS TEXT) FROM {table} \
             WHERE COALESCE({flag}, 0) = 0 AND cluster_id IS NOT NULL ORDER BY rowid LIMIT ?",
            id = quote(operation, &table.id_column)?,
            content = quote(operation, &table.content_column)?,
            table = quote(operation, &table.name)?,
            flag = quote(operation, &table.has_image_column)?,
        );
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows: Vec<ItemRow> = sqlx::query_as(&sql)
            .bind(limit)
            .fetch_all(self.db.pool())
            .await
            .map_err(|e| StoreError::database(operation, e))?;

        let items: Vec<ContentItem> = rows.into_iter().filter_map(|row| into_item(table, row)).collect();
        debug!(items = items.len(), "fetched items without image");
        Ok(items)
    }

    #[instrument(skip(self, table), fields(table = %table.name))]
    async fn fetch_one(&self, table: &TableSpec, id: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .fetch_item(table, id)
            .await?
            .map(|item| item.text_content))
    }

    #[instrument(skip(self, table), fields(table = %table.name))]
    async fn fetch_item(&self, table: &TableSpec, id: &str) -> Result<Option<ContentItem>, StoreError> {
        let operation = "fetch_item";
        let sql = format!(
            "SELECT CAST({id_col} AS TEXT), {content}, CAST(cluster_id AS TEXT) FROM {table} \
             WHERE {id_col} = ? LIMIT 1",
            id_col = quote(operation, &table.id_column)?,
            content = quote(operation, &table.content_column)?,
            table = quote(operation, &table.name)?,
        );
        let row: Option<ItemRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(self.db.pool())
            .await
            .map_err(|e| StoreError::database(operation, e))?;
        Ok(row.and_then(|row| into_item(table, row)))
    }

    #[instrument(skip(self, table, _image_url), fields(table = %table.name))]
    async fn mark_has_image(&self, table: &TableSpec, id: &str, _image_url: &str) -> Result<bool, StoreError> {
        let operation = "mark_has_image";
        let sql = format!(
            "UPDATE {table} SET {flag} = 1 WHERE {id_col} = ?",
            table = quote(operation, &table.name)?,
            flag = quote(operation, &table.has_image_column)?,
            id_col = quote(operation, &table.id_column)?,
        );
        let result = sqlx::query(&sql)
            .bind(id)
            .execute(self.db.pool())
            .await
            .map_err(|e| StoreError::database(operation, e))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, record), fields(cluster_id = %record.cluster_id, view = %record.view_tag))]
    async fn insert_image_record(&self, record: &StoredImageRecord) -> Result<bool, StoreError> {
        let operation = "insert_image_record";
        let sql = format!(
            "INSERT INTO {} (cluster_id, image_url, original_url, view) VALUES (?, ?, ?, ?)",
            quote(operation, &self.image_records_table)?
        );
        let result = sqlx::query(&sql)
            .bind(&record.cluster_id)
            .bind(&record.public_url)
            .bind(&record.original_url)
            .bind(&record.view_tag)
            .execute(self.db.pool())
            .await
            .map_err(|e| StoreError::database(operation, e))?;
        Ok(result.rows_affected() == 1)
    }
}
