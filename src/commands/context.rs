//! Builds the pipeline's collaborators from configuration and credentials.

use std::sync::Arc;

use anyhow::{Context, Result};
use illustrator_core::config::{BlobBackend, ContentBackend, secs};
use illustrator_core::{
    AppConfig, BlobStore, Components, ContentStore, Credentials, Database, DuckDuckGoBackend,
    FsBlobStore, GeminiOracle, Oracle, Pacing, PipelineOrchestrator, RankingClient, SearchProvider,
    SqliteStore, StorageClient, SupabaseStore, Validator,
};
use tracing::{debug, info, warn};

/// Timeout for datastore and blob API calls.
const DATASTORE_TIMEOUT_SECS: u64 = 30;

/// Wires every collaborator for a run.
pub(crate) async fn build_pipeline(config: AppConfig, credentials: &Credentials) -> Result<PipelineOrchestrator> {
    let pacing = Pacing::standard();

    let backend = DuckDuckGoBackend::with_base_urls(
        &config.search.base_url,
        &config.search.html_base_url,
        secs(config.search.timeout_secs),
    )
    .context("building search client")?;
    let search = SearchProvider::new(Arc::new(backend), config.search.min_dimension, pacing);

    let validator = Validator::new(&config.search.blacklist, secs(config.validation.timeout_secs))
        .context("building validation client")?;

    let ranking = RankingClient::new(build_oracle(&config, credentials)?, config.ranking.clone());
    let (content, blobs) = build_stores(&config, credentials).await?;
    let storage = StorageClient::new(blobs, Arc::clone(&content), config.storage.clone())
        .context("building download client")?;

    Ok(PipelineOrchestrator::new(
        config,
        Components {
            content,
            search,
            validator,
            ranking,
            storage,
        },
        pacing.inter_item,
    ))
}

fn build_oracle(config: &AppConfig, credentials: &Credentials) -> Result<Option<Arc<dyn Oracle>>> {
    let Some(api_key) = credentials.gemini_api_key.as_deref() else {
        warn!("GEMINI_API_KEY is not set; query generation and ranking are disabled");
        return Ok(None);
    };
    let oracle = GeminiOracle::with_base_url(
        api_key,
        &config.ranking.model,
        config.ranking.safety.clone(),
        secs(config.ranking.timeout_secs),
        &config.ranking.api_base_url,
    )
    .context("building oracle client")?;
    info!(model = %config.ranking.model, "oracle configured");
    Ok(Some(Arc::new(oracle) as Arc<dyn Oracle>))
}

async fn build_stores(
    config: &AppConfig,
    credentials: &Credentials,
) -> Result<(Arc<dyn ContentStore>, Arc<dyn BlobStore>)> {
    let backend = &config.backend;
    let supabase = if backend.content == ContentBackend::Supabase || backend.blob == BlobBackend::Supabase {
        let (url, key) = credentials.supabase("content and blob storage")?;
        let store = SupabaseStore::new(
            url,
            key,
            &config.image_records_table,
            secs(DATASTORE_TIMEOUT_SECS),
        )
        .context("building datastore client")?;
        Some(Arc::new(store))
    } else {
        None
    };

    let content: Arc<dyn ContentStore> = match (backend.content, &supabase) {
        (ContentBackend::Supabase, Some(store)) => Arc::clone(store) as Arc<dyn ContentStore>,
        _ => {
            let db = Database::new(&backend.sqlite_path)
                .await
                .with_context(|| format!("opening {}", backend.sqlite_path.display()))?;
            debug!(path = %backend.sqlite_path.display(), "using local content store");
            Arc::new(SqliteStore::new(db, &config.image_records_table))
        }
    };

    let blobs: Arc<dyn BlobStore> = match (backend.blob, &supabase) {
        (BlobBackend::Supabase, Some(store)) => Arc::clone(store) as Arc<dyn BlobStore>,
        _ => {
            debug!(root = %backend.blob_root.display(), "using local blob store");
            Arc::new(FsBlobStore::new(&backend.blob_root, &backend.blob_public_base_url))
        }
    };

    Ok((content, blobs))
}
