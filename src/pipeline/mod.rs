//! Per-item illustration pipeline and batch driver.
//!
//! ```text
//! Fetch -> GenerateQuery -> Search(+Fallback) -> Validate -> Rank
//!       -> Download/Upload -> PersistMetadata -> MarkIllustrated
//! ```
//!
//! Each arrow is a gate: a stage that yields nothing ends the item with
//! [`PipelineError::StageGate`]. The only pipeline-level retry is one
//! degraded search (first two query words plus "photos") after an empty
//! primary search. Metadata and flag writes after a successful upload only
//! warn on failure; the stored image is the artifact that counts.

mod facade;

pub use facade::ImageService;

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::config::{AppConfig, TableSpec};
use crate::model::{ImageCandidate, ItemOutcome, OutcomeStatus};
use crate::ranking::{RankingClient, truncate_chars};
use crate::search::SearchProvider;
use crate::storage::StorageClient;
use crate::store::{ContentStore, StoreError};
use crate::validate::Validator;

/// Qualifier appended to the shortened query of the degraded retry.
const DEGRADED_QUERY_QUALIFIER: &str = "photos";

/// Leading query words kept for the degraded retry.
const DEGRADED_QUERY_WORDS: usize = 2;

/// Pipeline stages that can end an item early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    GenerateQuery,
    Search,
    Validate,
    Rank,
    Store,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Fetch => "fetch",
            Self::GenerateQuery => "query generation",
            Self::Search => "search",
            Self::Validate => "validation",
            Self::Rank => "ranking",
            Self::Store => "download/upload",
        };
        f.write_str(name)
    }
}

/// Why an item ended without a stored image.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("unknown table '{table}' (configured: {available})")]
    UnknownTable { table: String, available: String },

    #[error("{stage} produced nothing usable for item {id}")]
    StageGate { stage: Stage, id: String },

    #[error("content store error for item {id}: {source}")]
    Store {
        id: String,
        #[source]
        source: StoreError,
    },
}

impl PipelineError {
    fn gate(stage: Stage, id: &str) -> Self {
        Self::StageGate {
            stage,
            id: id.to_string(),
        }
    }

    fn store(id: &str, source: StoreError) -> Self {
        Self::Store {
            id: id.to_string(),
            source,
        }
    }

    /// Batch status this error maps to.
    #[must_use]
    pub fn status(&self) -> OutcomeStatus {
        match self {
            Self::StageGate { .. } => OutcomeStatus::Failed,
            Self::UnknownTable { .. } | Self::Store { .. } => OutcomeStatus::Error,
        }
    }
}

/// Progress notifications emitted by [`PipelineOrchestrator::process_batch_observed`].
#[derive(Debug)]
pub enum BatchProgress<'a> {
    /// Items were fetched and processing is about to begin.
    Started { total: usize },
    /// One item finished.
    ItemFinished { index: usize, outcome: &'a ItemOutcome },
}

/// The collaborators one pipeline run needs.
pub struct Components {
    pub content: Arc<dyn ContentStore>,
    pub search: SearchProvider,
    pub validator: Validator,
    pub ranking: RankingClient,
    pub storage: StorageClient,
}

/// Sequences the stages for single items and batches.
pub struct PipelineOrchestrator {
    config: AppConfig,
    content: Arc<dyn ContentStore>,
    search: SearchProvider,
    validator: Validator,
    ranking: RankingClient,
    storage: StorageClient,
    inter_item_pause: Duration,
}

impl PipelineOrchestrator {
    #[must_use]
    pub fn new(config: AppConfig, components: Components, inter_item_pause: Duration) -> Self {
        let Components {
            content,
            search,
            validator,
            ranking,
            storage,
        } = components;
        Self {
            config,
            content,
            search,
            validator,
            ranking,
            storage,
            inter_item_pause,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    #[must_use]
    pub fn search(&self) -> &SearchProvider {
        &self.search
    }

    #[must_use]
    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    #[must_use]
    pub fn ranking(&self) -> &RankingClient {
        &self.ranking
    }

    #[must_use]
    pub fn storage(&self) -> &StorageClient {
        &self.storage
    }

    fn table(&self, name: &str) -> Result<&TableSpec, PipelineError> {
        self.config
            .table(name)
            .ok_or_else(|| PipelineError::UnknownTable {
                table: name.to_string(),
                available: self.config.table_names().collect::<Vec<_>>().join(", "),
            })
    }

    /// Reads an item's text from the default table.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] when the default table is not configured or
    /// the content store fails.
    pub async fn fetch_text(&self, id: &str) -> Result<Option<String>, PipelineError> {
        let spec = self.table(&self.config.default_table)?;
        self.content
            .fetch_one(spec, id)
            .await
            .map_err(|e| PipelineError::store(id, e))
    }

    /// Runs the full pipeline for one item and returns the stored image URL.
    ///
    /// Without a table the default table's text is used and nothing is
    /// written back: no image record, no has-image flag.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::StageGate`] when a stage yields nothing,
    /// [`PipelineError::UnknownTable`] for an unconfigured table and
    /// [`PipelineError::Store`] when reading the item fails.
    #[instrument(skip(self, table), fields(table = table.unwrap_or("<default>")))]
    pub async fn process_item(&self, id: &str, table: Option<&str>) -> Result<String, PipelineError> {
        let spec = table.map(|name| self.table(name)).transpose()?;

        let (text, cluster_id) = match spec {
            Some(spec) => {
                let item = self
                    .content
                    .fetch_item(spec, id)
                    .await
                    .map_err(|e| PipelineError::store(id, e))?
                    .ok_or_else(|| PipelineError::gate(Stage::Fetch, id))?;
                if item.cluster_id.is_none() {
                    warn!(id, "item has no cluster id; image record will be skipped");
                }
                (item.text_content, item.cluster_id)
            }
            None => {
                let text = self
                    .fetch_text(id)
                    .await?
                    .ok_or_else(|| PipelineError::gate(Stage::Fetch, id))?;
                (text, None)
            }
        };
        if text.trim().is_empty() {
            return Err(PipelineError::gate(Stage::Fetch, id));
        }

        let query = self
            .ranking
            .generate_query(&text)
            .await
            .ok_or_else(|| PipelineError::gate(Stage::GenerateQuery, id))?;

        let candidates = self.search_with_degraded_retry(&query).await;
        if candidates.is_empty() {
            return Err(PipelineError::gate(Stage::Search, id));
        }

        let validated = self
            .validator
            .filter(candidates, self.config.max_validated())
            .await;
        if validated.is_empty() {
            return Err(PipelineError::gate(Stage::Validate, id));
        }

        let shown = &validated[..validated.len().min(self.ranking.candidates_for_selection())];
        let snippet = truncate_chars(&text, self.ranking.selection_char_limit());
        let selected = self
            .ranking
            .select_best(shown, snippet, &query)
            .await
            .ok_or_else(|| PipelineError::gate(Stage::Rank, id))?;

        let public_url = self
            .storage
            .store(&selected.candidate.url, &query)
            .await
            .ok_or_else(|| PipelineError::gate(Stage::Store, id))?;
        info!(id, public_url = %public_url, "image stored");

        if let Some(spec) = spec {
            self.record_result(spec, id, cluster_id.as_deref(), &public_url, &selected.candidate.url)
                .await;
        }
        Ok(public_url)
    }

    /// Persists the image record and, only once it exists, flags the item.
    async fn record_result(
        &self,
        spec: &TableSpec,
        id: &str,
        cluster_id: Option<&str>,
        public_url: &str,
        original_url: &str,
    ) {
        let Some(cluster_id) = cluster_id else {
            warn!(id, table = %spec.name, "no cluster id; skipping image record and has-image flag");
            return;
        };
        if !self
            .storage
            .save_metadata(cluster_id, public_url, original_url, &spec.view)
            .await
        {
            warn!(id, "image uploaded but its record was not saved; item stays unflagged");
            return;
        }
        match self.content.mark_has_image(spec, id, public_url).await {
            Ok(true) => info!(id, table = %spec.name, "item marked as illustrated"),
            Ok(false) => warn!(id, table = %spec.name, "image recorded but no row was flagged"),
            Err(error) => warn!(id, error = %error, "image recorded but flag update failed"),
        }
    }

    async fn search_with_degraded_retry(&self, query: &str) -> Vec<ImageCandidate> {
        let settings = &self.config.search;
        let candidates = self
            .search
            .search(query, settings.target_count, settings.max_retries)
            .await;
        if !candidates.is_empty() {
            return candidates;
        }

        let degraded = degraded_query(query);
        info!(query, degraded = %degraded, "no candidates; retrying with a shorter query");
        self.search
            .search(&degraded, settings.degraded_target_count, settings.degraded_max_retries)
            .await
    }

    /// Processes up to `limit` unillustrated items from `table`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] when the table is not configured or the
    /// pending items cannot be listed. Per-item failures are recorded in the
    /// outcomes instead.
    pub async fn process_batch(&self, table: &str, limit: usize) -> Result<Vec<ItemOutcome>, PipelineError> {
        self.process_batch_observed(table, limit, &mut |_: BatchProgress<'_>| {})
            .await
    }

    /// [`process_batch`](Self::process_batch) with progress notifications.
    ///
    /// # Errors
    ///
    /// See [`process_batch`](Self::process_batch).
    #[instrument(skip(self, observer))]
    pub async fn process_batch_observed(
        &self,
        table: &str,
        limit: usize,
        observer: &mut (dyn FnMut(BatchProgress<'_>) + Send),
    ) -> Result<Vec<ItemOutcome>, PipelineError> {
        let spec = self.table(table)?;
        let items = self
            .content
            .fetch_items_without_image(spec, limit)
            .await
            .map_err(|e| PipelineError::store("<batch>", e))?;
        info!(table, count = items.len(), "items without image");
        observer(BatchProgress::Started { total: items.len() });

        let mut outcomes = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            if index > 0 && !self.inter_item_pause.is_zero() {
                tokio::time::sleep(self.inter_item_pause).await;
            }

            let started = Instant::now();
            let result = self.process_item(&item.id, Some(table)).await;
            let outcome = item_outcome(&item.id, started.elapsed(), result);
            observer(BatchProgress::ItemFinished {
                index,
                outcome: &outcome,
            });
            outcomes.push(outcome);
        }

        let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
        let failed = outcomes
            .iter()
            .filter(|o| o.status == OutcomeStatus::Failed)
            .count();
        info!(
            table,
            total = outcomes.len(),
            succeeded,
            failed,
            errors = outcomes.len() - succeeded - failed,
            "batch finished"
        );
        Ok(outcomes)
    }
}

/// Folds a pipeline result into the batch record for `id`.
#[must_use]
pub fn item_outcome(id: &str, elapsed: Duration, result: Result<String, PipelineError>) -> ItemOutcome {
    match result {
        Ok(public_url) => ItemOutcome::success(id, elapsed, public_url),
        Err(error) if error.status() == OutcomeStatus::Failed => {
            info!(id, reason = %error, "item failed");
            ItemOutcome::failed(id, elapsed)
        }
        Err(error) => {
            warn!(id, error = %error, "item errored");
            ItemOutcome::error(id, elapsed, error.to_string())
        }
    }
}

/// The leading query words plus a generic qualifier.
#[must_use]
pub fn degraded_query(query: &str) -> String {
    query
        .split_whitespace()
        .take(DEGRADED_QUERY_WORDS)
        .chain(std::iter::once(DEGRADED_QUERY_QUALIFIER))
        .collect::<Vec<_>>()
        .join(" ")
}
