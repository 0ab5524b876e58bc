//! Supabase (PostgREST + Storage API) backend.
//!
//! One client serves both roles: rows go through `/rest/v1/{table}` and image
//! bytes through `/storage/v1/object/{bucket}/{path}`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, header};
use serde_json::{Map, Value};
use tracing::{debug, instrument};
use url::Url;

use super::{ContentStore, StoreError, normalize_id};
use crate::config::TableSpec;
use crate::http::{HttpBuildError, Trust, build_client};
use crate::model::{ContentItem, StoredImageRecord};
use crate::storage::{BlobError, BlobStore};
use crate::user_agent::default_service_user_agent;

/// Column carrying the cluster a record belongs to.
const CLUSTER_ID_COLUMN: &str = "cluster_id";

/// Cache lifetime attached to uploaded objects, in seconds.
const UPLOAD_CACHE_SECONDS: u32 = 3600;

/// Longest error body kept in error values.
const MAX_ERROR_BODY_CHARS: usize = 500;

type Row = Map<String, Value>;

/// Hosted datastore and object storage.
pub struct SupabaseStore {
    client: Client,
    base_url: String,
    api_key: String,
    image_records_table: String,
}

impl SupabaseStore {
    /// Creates a store for the project at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`HttpBuildError`] if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        image_records_table: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, HttpBuildError> {
        let client = build_client("datastore", &default_service_user_agent(), timeout, Trust::Strict)?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            image_records_table: image_records_table.into(),
        })
    }

    /// Public URL of an object in `bucket`.
    #[must_use]
    pub fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/storage/v1/object/public/{bucket}/{path}", self.base_url)
    }

    fn url(&self, operation: &'static str, segments: &[&str]) -> Result<Url, StoreError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| StoreError::decode(operation, format!("invalid base URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| StoreError::decode(operation, "base URL cannot carry a path"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn rest_url(&self, operation: &'static str, table: &str) -> Result<Url, StoreError> {
        self.url(operation, &["rest", "v1", table])
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    async fn send(&self, operation: &'static str, builder: RequestBuilder) -> Result<Response, StoreError> {
        let response = self
            .authed(builder)
            .send()
            .await
            .map_err(|source| StoreError::Transport { operation, source })?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(StoreError::HttpStatus {
                operation,
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }
        Ok(response)
    }

    async fn rows(&self, operation: &'static str, builder: RequestBuilder) -> Result<Vec<Row>, StoreError> {
        let response = self.send(operation, builder).await?;
        response
            .json::<Vec<Row>>()
            .await
            .map_err(|e| StoreError::decode(operation, e.to_string()))
    }

    async fn select_by_id(
        &self,
        operation: &'static str,
        table: &TableSpec,
        id: &str,
        columns: &str,
    ) -> Result<Option<Row>, StoreError> {
        let mut url = self.rest_url(operation, &table.name)?;
        url.query_pairs_mut()
            .append_pair("select", columns)
            .append_pair(&table.id_column, &format!("eq.{id}"))
            .append_pair("limit", "1");
        let rows = self.rows(operation, self.client.get(url)).await?;
        Ok(rows.into_iter().next())
    }
}

impl std::fmt::Debug for SupabaseStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseStore")
            .field("base_url", &self.base_url)
            .field("image_records_table", &self.image_records_table)
            .finish_non_exhaustive()
    }
}

fn item_from_row(table: &TableSpec, row: &Row) -> Option<ContentItem> {
    let id = row.get(&table.id_column).and_then(normalize_id)?;
    let text_content = row.get(&table.content_column)?.as_str()?.to_string();
    let cluster_id = row.get(CLUSTER_ID_COLUMN).and_then(normalize_id);
    Some(ContentItem {
        id,
        source_table: table.name.clone(),
        text_content,
        cluster_id,
    })
}

#[async_trait]
impl ContentStore for SupabaseStore {
    #[instrument(skip(self, table), fields(table = %table.name))]
    async fn fetch_items_without_image(&self, table: &TableSpec, limit: usize) -> Result<Vec<ContentItem>, StoreError> {
        let operation = "fetch_items_without_image";
        let mut url = self.rest_url(operation, &table.name)?;
        url.query_pairs_mut()
            .append_pair(
                "select",
                &format!("{},{},{CLUSTER_ID_COLUMN}", table.id_column, table.content_column),
            )
            .append_pair(&table.has_image_column, "eq.false")
            .append_pair(CLUSTER_ID_COLUMN, "not.is.null")
            .append_pair("limit", &limit.to_string());

        let rows = self.rows(operation, self.client.get(url)).await?;
        let items: Vec<ContentItem> = rows.iter().filter_map(|row| item_from_row(table, row)).collect();
        debug!(rows = rows.len(), items = items.len(), "fetched items without image");
        Ok(items)
    }

    #[instrument(skip(self, table), fields(table = %table.name))]
    async fn fetch_one(&self, table: &TableSpec, id: &str) -> Result<Option<String>, StoreError> {
        let row = self
            .select_by_id("fetch_one", table, id, &table.content_column)
            .await?;
        Ok(row
            .as_ref()
            .and_then(|row| row.get(&table.content_column))
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    #[instrument(skip(self, table), fields(table = %table.name))]
    async fn fetch_item(&self, table: &TableSpec, id: &str) -> Result<Option<ContentItem>, StoreError> {
        let columns = format!("{},{},{CLUSTER_ID_COLUMN}", table.id_column, table.content_column);
        let row = self.select_by_id("fetch_item", table, id, &columns).await?;
        Ok(row.as_ref().and_then(|row| item_from_row(table, row)))
    }

    #[instrument(skip(self, table, _image_url), fields(table = %table.name))]
    async fn mark_has_image(&self, table: &TableSpec, id: &str, _image_url: &str) -> Result<bool, StoreError> {
        let operation = "mark_has_image";
        let mut url = self.rest_url(operation, &table.name)?;
        url.query_pairs_mut()
            .append_pair(&table.id_column, &format!("eq.{id}"));
        let mut body = Map::new();
        body.insert(table.has_image_column.clone(), Value::Bool(true));

        let builder = self
            .client
            .patch(url)
            .header("Prefer", "return=representation")
            .json(&body);
        let rows = self.rows(operation, builder).await?;
        Ok(!rows.is_empty())
    }

    #[instrument(skip(self, record), fields(cluster_id = %record.cluster_id, view = %record.view_tag))]
    async fn insert_image_record(&self, record: &StoredImageRecord) -> Result<bool, StoreError> {
        let operation = "insert_image_record";
        let url = self.rest_url(operation, &self.image_records_table)?;
        let builder = self
            .client
            .post(url)
            .header("Prefer", "return=representation")
            .json(&[record]);
        let rows = self.rows(operation, builder).await?;
        Ok(!rows.is_empty())
    }
}

#[async_trait]
impl BlobStore for SupabaseStore {
    fn name(&self) -> &str {
        "supabase"
    }

    #[instrument(skip(self, bytes), fields(len = bytes.len()))]
    async fn put(&self, bucket: &str, path: &str, bytes: &[u8], content_type: &str) -> Result<String, BlobError> {
        let object = format!("{bucket}/{path}");
        let mut segments = vec!["storage", "v1", "object", bucket];
        segments.extend(path.split('/').filter(|segment| !segment.is_empty()));
        let url = self
            .url("upload", &segments)
            .map_err(|_| BlobError::InvalidPath { path: object.clone() })?;

        let response = self
            .authed(self.client.post(url))
            .header(header::CONTENT_TYPE, content_type)
            .header(header::CACHE_CONTROL, format!("max-age={UPLOAD_CACHE_SECONDS}"))
            .header("x-upsert", "true")
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(|source| BlobError::Transport {
                path: object.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(BlobError::HttpStatus {
                path: object,
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }
        Ok(self.public_url(bucket, path))
    }
}
