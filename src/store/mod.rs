//! Content store seam.
//!
//! The pipeline reads text records and writes two things back: the
//! "has image" flag on the record and an insert-only image linkage row.
//! [`SupabaseStore`] talks to the hosted datastore; [`SqliteStore`] mirrors
//! the same schema locally.

mod sqlite;
mod supabase;

pub use sqlite::SqliteStore;
pub use supabase::SupabaseStore;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::config::TableSpec;
use crate::model::{ContentItem, StoredImageRecord};

/// Content store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("content store request for {operation} failed: {source}")]
    Transport {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("content store returned HTTP {status} for {operation}: {body}")]
    HttpStatus {
        operation: &'static str,
        status: u16,
        body: String,
    },

    #[error("could not decode content store response for {operation}: {reason}")]
    Decode {
        operation: &'static str,
        reason: String,
    },

    #[error("database error during {operation}: {source}")]
    Database {
        operation: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("content store {operation} failed: {reason}")]
    Backend {
        operation: &'static str,
        reason: String,
    },
}

impl StoreError {
    pub(crate) fn database(operation: &'static str, source: sqlx::Error) -> Self {
        Self::Database { operation, source }
    }

    pub(crate) fn decode(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::Decode {
            operation,
            reason: reason.into(),
        }
    }
}

/// Data-access contract for text records and image linkage.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Records whose has-image flag is false, in store order, at most `limit`.
    ///
    /// Records without a cluster id are skipped: they cannot take an image
    /// record, so they would never leave the pending set.
    async fn fetch_items_without_image(
        &self,
        table: &TableSpec,
        limit: usize,
    ) -> Result<Vec<ContentItem>, StoreError>;

    /// Text of a single record, if it exists.
    async fn fetch_one(&self, table: &TableSpec, id: &str) -> Result<Option<String>, StoreError>;

    /// A single record with its cluster id, if it exists.
    async fn fetch_item(&self, table: &TableSpec, id: &str) -> Result<Option<ContentItem>, StoreError>;

    /// Sets the has-image flag. Returns false when no row matched.
    async fn mark_has_image(&self, table: &TableSpec, id: &str, image_url: &str) -> Result<bool, StoreError>;

    /// Inserts one linkage row. Returns false when nothing was written.
    async fn insert_image_record(&self, record: &StoredImageRecord) -> Result<bool, StoreError>;
}

/// Renders a JSON id (string or number) as a string.
pub(crate) fn normalize_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
