//! Shared fakes and builders for pipeline integration tests.
//!
//! The search engine and the oracle are scripted in-process; image hosts are
//! a wiremock server; content lives in an in-memory SQLite store and blobs in
//! a temp directory.

#![allow(dead_code, clippy::unwrap_used)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream;
use illustrator_core::config::{RankingSettings, StorageSettings};
use illustrator_core::search::{HitStream, RawImageHit, RawTextHit};
use illustrator_core::{
    AppConfig, Backoff, Components, ContentItem, ContentStore, Database, FsBlobStore, Oracle,
    OracleError, OracleReply, OracleRequest, Pacing, PipelineOrchestrator, RankingClient,
    SearchBackend, SearchProvider, SqliteStore, StorageClient, StoreError, StoredImageRecord,
    TableSpec, Validator,
};
use tempfile::TempDir;

pub const TEAM_TABLE: &str = "cluster_team_view";

/// Search backend that answers image searches from a fixed hit list.
///
/// Queries are recorded. When `only_for` is set, other queries get nothing.
#[derive(Default)]
pub struct ScriptedSearch {
    hits: Vec<RawImageHit>,
    only_for: Option<String>,
    queries: Mutex<Vec<String>>,
}

impl ScriptedSearch {
    pub fn with_hits(hits: Vec<RawImageHit>) -> Self {
        Self {
            hits,
            ..Self::default()
        }
    }

    pub fn only_for(mut self, query: &str) -> Self {
        self.only_for = Some(query.to_string());
        self
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

impl SearchBackend for ScriptedSearch {
    fn name(&self) -> &str {
        "scripted"
    }

    fn images<'a>(&'a self, query: &'a str, max_results: usize) -> HitStream<'a, RawImageHit> {
        self.queries.lock().unwrap().push(query.to_string());
        let answer = match &self.only_for {
            Some(expected) if expected != query => Vec::new(),
            _ => self.hits.clone(),
        };
        stream::iter(answer.into_iter().map(Ok)).take(max_results).boxed()
    }

    fn text<'a>(&'a self, _query: &'a str, _max_results: usize) -> HitStream<'a, RawTextHit> {
        stream::empty().boxed()
    }
}

/// Oracle that pops prepared replies in order and records prompts.
#[derive(Default)]
pub struct ScriptedOracle {
    replies: Mutex<VecDeque<OracleReply>>,
    prompts: Mutex<Vec<OracleRequest>>,
}

impl ScriptedOracle {
    pub fn new(replies: impl IntoIterator<Item = &'static str>) -> Self {
        Self {
            replies: Mutex::new(
                replies
                    .into_iter()
                    .map(|reply| OracleReply::Text(reply.to_string()))
                    .collect(),
            ),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<OracleRequest> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &OracleRequest) -> Result<OracleReply, OracleError> {
        self.prompts.lock().unwrap().push(request.clone());
        Ok(self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(OracleReply::Blocked {
                reason: "script exhausted".to_string(),
            }))
    }
}

/// Content store that delegates to an inner store but can fail selected
/// operations.
pub struct FlakyStore {
    inner: Arc<dyn ContentStore>,
    failing_ids: Vec<String>,
    fail_insert: bool,
    fail_mark: bool,
    mark_matches_nothing: bool,
}

impl FlakyStore {
    /// Fails `fetch_item` for `failing_ids`.
    pub fn new(inner: Arc<dyn ContentStore>, failing_ids: &[&str]) -> Self {
        Self {
            inner,
            failing_ids: failing_ids.iter().map(ToString::to_string).collect(),
            fail_insert: false,
            fail_mark: false,
            mark_matches_nothing: false,
        }
    }

    /// Also fails every `insert_image_record`.
    pub fn failing_insert(mut self) -> Self {
        self.fail_insert = true;
        self
    }

    /// Also fails every `mark_has_image`.
    pub fn failing_mark(mut self) -> Self {
        self.fail_mark = true;
        self
    }

    /// Makes `mark_has_image` report that no row was updated.
    pub fn mark_matching_nothing(mut self) -> Self {
        self.mark_matches_nothing = true;
        self
    }
}

fn unavailable(operation: &'static str) -> StoreError {
    StoreError::Backend {
        operation,
        reason: "datastore unavailable".to_string(),
    }
}

#[async_trait]
impl ContentStore for FlakyStore {
    async fn fetch_items_without_image(&self, table: &TableSpec, limit: usize) -> Result<Vec<ContentItem>, StoreError> {
        self.inner.fetch_items_without_image(table, limit).await
    }

    async fn fetch_one(&self, table: &TableSpec, id: &str) -> Result<Option<String>, StoreError> {
        self.inner.fetch_one(table, id).await
    }

    async fn fetch_item(&self, table: &TableSpec, id: &str) -> Result<Option<ContentItem>, StoreError> {
        if self.failing_ids.iter().any(|failing| failing == id) {
            return Err(unavailable("fetch_item"));
        }
        self.inner.fetch_item(table, id).await
    }

    async fn mark_has_image(&self, table: &TableSpec, id: &str, image_url: &str) -> Result<bool, StoreError> {
        if self.fail_mark {
            return Err(unavailable("mark_has_image"));
        }
        if self.mark_matches_nothing {
            return Ok(false);
        }
        self.inner.mark_has_image(table, id, image_url).await
    }

    async fn insert_image_record(&self, record: &StoredImageRecord) -> Result<bool, StoreError> {
        if self.fail_insert {
            return Err(unavailable("insert_image_record"));
        }
        self.inner.insert_image_record(record).await
    }
}

/// An image hit of the given size hosted under `base`.
pub fn hit(base: &str, n: usize, width: u32, height: u32) -> RawImageHit {
    RawImageHit {
        image_url: Some(format!("{base}/img/{n}.jpg")),
        title: format!("image {n}"),
        thumbnail_url: format!("{base}/thumb/{n}.jpg"),
        width: Some(width),
        height: Some(height),
    }
}

/// In-memory SQLite store seeded with `(id, content, cluster_id)` rows in the
/// team table.
pub async fn seeded_store(rows: &[(&str, &str, Option<&str>)]) -> SqliteStore {
    let db = Database::new_in_memory().await.unwrap();
    for (id, content, cluster_id) in rows {
        sqlx::query(&format!(
            "INSERT INTO {TEAM_TABLE} (id, content, cluster_id) VALUES (?, ?, ?)"
        ))
        .bind(*id)
        .bind(*content)
        .bind(*cluster_id)
        .execute(db.pool())
        .await
        .unwrap();
    }
    SqliteStore::new(db, "cluster_images")
}

/// Count of image records for `cluster_id`.
pub async fn image_record_count(store: &SqliteStore, cluster_id: &str) -> i64 {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM cluster_images WHERE cluster_id = ?")
        .bind(cluster_id)
        .fetch_one(store.database().pool())
        .await
        .unwrap();
    count
}

/// Collaborators for one test pipeline.
pub struct Harness {
    pub pipeline: PipelineOrchestrator,
    pub blobs: TempDir,
}

/// Builds a pipeline with no pacing or backoff delays.
pub fn pipeline(
    content: Arc<dyn ContentStore>,
    search: Arc<dyn SearchBackend>,
    oracle: Arc<dyn Oracle>,
) -> Harness {
    let config = AppConfig::default();
    let blobs = tempfile::tempdir().unwrap();
    let blob_store = Arc::new(FsBlobStore::new(blobs.path(), "http://blobs.local"));

    let search = SearchProvider::new(search, config.search.min_dimension, Pacing::disabled())
        .with_backoff(Backoff::None);
    let validator = Validator::new(&config.search.blacklist, Duration::from_secs(5)).unwrap();
    let ranking = RankingClient::new(Some(oracle), RankingSettings::default());
    let storage = StorageClient::new(blob_store, Arc::clone(&content), StorageSettings::default())
        .unwrap()
        .with_retry_backoff(Backoff::None);

    let pipeline = PipelineOrchestrator::new(
        config,
        Components {
            content,
            search,
            validator,
            ranking,
            storage,
        },
        Duration::ZERO,
    );
    Harness { pipeline, blobs }
}
