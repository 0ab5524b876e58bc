//! Illustrator Core Library
//!
//! Finds, ranks and stores a representative image for pieces of text
//! content, then links the stored image back to the content record.
//!
//! # Architecture
//!
//! - [`search`] - Image search with a text-search fallback
//! - [`validate`] - Reachability and content-type probing of candidates
//! - [`oracle`] / [`ranking`] - Query generation and candidate selection
//! - [`storage`] - Download, deterministic naming and blob upload
//! - [`store`] - Content records and image linkage (hosted or local)
//! - [`pipeline`] - Per-item orchestration and batch runs
//! - [`config`] - TOML configuration and environment credentials

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod db;
pub mod http;
pub mod model;
pub mod oracle;
pub mod pipeline;
pub mod ranking;
pub mod retry;
pub mod search;
pub mod storage;
pub mod store;
mod user_agent;
pub mod validate;

// Re-export commonly used types
pub use config::{AppConfig, ConfigError, Credentials, LoadedConfig, TableSpec, load_config};
pub use db::{Database, DbError};
pub use model::{
    ContentItem, ImageCandidate, ItemOutcome, OutcomeStatus, Provenance, SelectedImage,
    StoredImageRecord, ValidatedCandidate,
};
pub use oracle::{GeminiOracle, Oracle, OracleError, OracleReply, OracleRequest};
pub use pipeline::{
    BatchProgress, Components, ImageService, PipelineError, PipelineOrchestrator, Stage, item_outcome,
};
pub use ranking::RankingClient;
pub use retry::{Backoff, RetryPolicy};
pub use search::{DuckDuckGoBackend, Pacing, SearchBackend, SearchError, SearchProvider};
pub use storage::{BlobStore, FsBlobStore, StorageClient};
pub use store::{ContentStore, SqliteStore, StoreError, SupabaseStore};
pub use user_agent::BROWSER_USER_AGENT;
pub use validate::Validator;
