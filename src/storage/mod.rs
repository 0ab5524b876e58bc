//! Image download, upload and metadata persistence.
//!
//! Uploads land under a deterministic path built from the search query and a
//! hash of the source URL, so storing the same source twice overwrites one
//! object instead of accumulating copies.

mod fs;

pub use fs::FsBlobStore;

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::config::StorageSettings;
use crate::http::{HttpBuildError, HttpClients, Trust};
use crate::model::StoredImageRecord;
use crate::retry::{Backoff, RetryPolicy, retry_with_backoff};
use crate::store::ContentStore;
use crate::user_agent::BROWSER_USER_AGENT;

/// Content type attached to every upload.
pub const UPLOAD_CONTENT_TYPE: &str = "image/jpeg";

/// Pause between download attempts.
const DOWNLOAD_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Longest query fragment kept in a destination path.
const MAX_QUERY_FRAGMENT_CHARS: usize = 20;

/// Fragment used when the query has no words.
const EMPTY_QUERY_FRAGMENT: &str = "ai_img";

#[allow(clippy::expect_used)]
static NON_WORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\W+").expect("non-word regex is valid") // Static pattern, safe to panic
});

/// Download failures.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("download of {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("download of {url} returned HTTP {status}")]
    HttpStatus { url: String, status: u16 },
}

/// Blob store failures.
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("upload to {path} failed: {source}")]
    Transport {
        path: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("upload to {path} returned HTTP {status}: {body}")]
    HttpStatus {
        path: String,
        status: u16,
        body: String,
    },

    #[error("writing {path} failed: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("refusing unsafe object path '{path}'")]
    InvalidPath { path: String },
}

/// Durable object storage with public URLs.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store name for logging.
    fn name(&self) -> &str;

    /// Writes `bytes` to `bucket/path`, overwriting any existing object, and
    /// returns its public URL.
    async fn put(&self, bucket: &str, path: &str, bytes: &[u8], content_type: &str) -> Result<String, BlobError>;
}

/// Returns the upload path for an image found with `query` at `source_url`.
///
/// The first word of the query, with runs of non-word characters replaced by
/// `_` and cut to 20 characters, is joined with the first 8 hex digits of the
/// URL's SHA-256.
#[must_use]
pub fn destination_path(query: &str, source_url: &str) -> String {
    let first_word = query.split_whitespace().next().unwrap_or(EMPTY_QUERY_FRAGMENT);
    let sanitized: String = NON_WORD
        .replace_all(first_word, "_")
        .chars()
        .take(MAX_QUERY_FRAGMENT_CHARS)
        .collect();
    let digest = format!("{:x}", Sha256::digest(source_url.as_bytes()));
    format!("public/{sanitized}_{}.jpg", &digest[..8])
}

/// Moves a selected image into durable storage and records where it went.
pub struct StorageClient {
    clients: HttpClients,
    blobs: Arc<dyn BlobStore>,
    content: Arc<dyn ContentStore>,
    settings: StorageSettings,
    retry_backoff: Backoff,
}

impl StorageClient {
    /// Creates a client.
    ///
    /// # Errors
    ///
    /// Returns [`HttpBuildError`] if the download clients cannot be built.
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        content: Arc<dyn ContentStore>,
        settings: StorageSettings,
    ) -> Result<Self, HttpBuildError> {
        let clients = HttpClients::build(
            "download",
            BROWSER_USER_AGENT,
            Duration::from_secs(settings.download_timeout_secs),
        )?;
        Ok(Self {
            clients,
            blobs,
            content,
            settings,
            retry_backoff: Backoff::Fixed(DOWNLOAD_RETRY_DELAY),
        })
    }

    /// Replaces the pause between download attempts.
    #[must_use]
    pub fn with_retry_backoff(mut self, backoff: Backoff) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Default download retry budget.
    #[must_use]
    pub fn default_download_retries(&self) -> u32 {
        self.settings.download_max_retries
    }

    /// Downloads `url`. The first attempt verifies certificates; retries do
    /// not. Every failure is retried until the budget is spent.
    #[instrument(skip(self))]
    pub async fn download(&self, url: &str, max_retries: u32) -> Option<Vec<u8>> {
        let policy = RetryPolicy::new(max_retries, self.retry_backoff);
        let result = retry_with_backoff(&policy, "image download", |_: &StorageError| true, |attempt| {
            let trust = if attempt == 0 { Trust::Strict } else { Trust::Relaxed };
            self.fetch(url, trust)
        })
        .await;

        match result {
            Ok((bytes, trust)) => {
                if bytes.len() < self.settings.small_payload_bytes {
                    warn!(bytes = bytes.len(), "downloaded payload is suspiciously small");
                }
                info!(bytes = bytes.len(), ?trust, "downloaded image");
                Some(bytes)
            }
            Err(error) => {
                warn!(error = %error, attempts = max_retries + 1, "download failed");
                None
            }
        }
    }

    async fn fetch(&self, url: &str, trust: Trust) -> Result<(Vec<u8>, Trust), StorageError> {
        let response = self
            .clients
            .get(trust)
            .get(url)
            .send()
            .await
            .map_err(|source| StorageError::Transport {
                url: url.to_string(),
                source,
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(StorageError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let bytes = response.bytes().await.map_err(|source| StorageError::Transport {
            url: url.to_string(),
            source,
        })?;
        Ok((bytes.to_vec(), trust))
    }

    /// Uploads to the configured bucket and returns the public URL.
    #[instrument(skip(self, bytes), fields(len = bytes.len(), store = self.blobs.name()))]
    pub async fn upload(&self, bytes: &[u8], path: &str) -> Option<String> {
        match self
            .blobs
            .put(&self.settings.bucket, path, bytes, UPLOAD_CONTENT_TYPE)
            .await
        {
            Ok(public_url) => {
                info!(public_url = %public_url, "uploaded image");
                Some(public_url)
            }
            Err(error) => {
                warn!(error = %error, "upload failed");
                None
            }
        }
    }

    /// Downloads `source_url` and uploads it under the deterministic path
    /// for `query`.
    pub async fn store(&self, source_url: &str, query: &str) -> Option<String> {
        let bytes = self
            .download(source_url, self.settings.download_max_retries)
            .await?;
        self.upload(&bytes, &destination_path(query, source_url)).await
    }

    /// Inserts the linkage record. Never fails past this boundary.
    #[instrument(skip(self, public_url, original_url))]
    pub async fn save_metadata(&self, cluster_id: &str, public_url: &str, original_url: &str, view: &str) -> bool {
        let record = StoredImageRecord {
            cluster_id: cluster_id.to_string(),
            public_url: public_url.to_string(),
            original_url: original_url.to_string(),
            view_tag: view.to_string(),
        };
        match self.content.insert_image_record(&record).await {
            Ok(true) => {
                info!("saved image record");
                true
            }
            Ok(false) => {
                warn!("image record insert returned no rows");
                false
            }
            Err(error) => {
                warn!(error = %error, "image record insert failed");
                false
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::config::TableSpec;
    use crate::model::ContentItem;
    use crate::store::StoreError;

    #[derive(Default)]
    struct RecordingStore {
        records: Mutex<Vec<StoredImageRecord>>,
        fail: bool,
    }

    #[async_trait]
    impl ContentStore for RecordingStore {
        async fn fetch_items_without_image(&self, _: &TableSpec, _: usize) -> Result<Vec<ContentItem>, StoreError> {
            Ok(Vec::new())
        }

        async fn fetch_one(&self, _: &TableSpec, _: &str) -> Result<Option<String>, StoreError> {
            Ok(None)
        }

        async fn fetch_item(&self, _: &TableSpec, _: &str) -> Result<Option<ContentItem>, StoreError> {
            Ok(None)
        }

        async fn mark_has_image(&self, _: &TableSpec, _: &str, _: &str) -> Result<bool, StoreError> {
            Ok(true)
        }

        async fn insert_image_record(&self, record: &StoredImageRecord) -> Result<bool, StoreError> {
            if self.fail {
                return Err(StoreError::Backend {
                    operation: "insert",
                    reason: "down".to_string(),
                });
            }
            self.records.lock().unwrap().push(record.clone());
            Ok(true)
        }
    }

    fn client(blob_root: &std::path::Path, content: Arc<RecordingStore>) -> StorageClient {
        let blobs = Arc::new(FsBlobStore::new(blob_root, "https://store.example.com"));
        let settings = StorageSettings {
            download_timeout_secs: 5,
            ..StorageSettings::default()
        };
        StorageClient::new(blobs, content, settings)
            .unwrap()
            .with_retry_backoff(Backoff::None)
    }

    // ==================== Destination Path ====================

    #[test]
    fn test_destination_path_is_deterministic() {
        let a = destination_path("football quarterback signing", "https://img.example.com/a.jpg");
        let b = destination_path("football quarterback signing", "https://img.example.com/a.jpg");
        let c = destination_path("football quarterback signing", "https://img.example.com/b.jpg");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("public/football_"), "{a}");
        assert!(a.ends_with(".jpg"));
        assert_eq!(a.len(), "public/football_".len() + 8 + ".jpg".len());
    }

    #[test]
    fn test_destination_path_sanitizes_query() {
        let path = destination_path("49ers' quarterback", "u");
        assert!(path.starts_with("public/49ers__"), "{path}");
        let path = destination_path("", "u");
        assert!(path.starts_with("public/ai_img_"), "{path}");
        let path = destination_path("supercalifragilisticexpialidocious", "u");
        assert!(path.starts_with("public/supercalifragilistic_"), "{path}");
    }

    // ==================== Download ====================

    #[tokio::test]
    async fn test_download_returns_bytes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7_u8; 2000]))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let storage = client(dir.path(), Arc::default());
        let bytes = storage.download(&format!("{}/a.jpg", server.uri()), 1).await.unwrap();
        assert_eq!(bytes.len(), 2000);
    }

    #[tokio::test]
    async fn test_download_retries_then_gives_up() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing.jpg"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let storage = client(dir.path(), Arc::default());
        assert!(storage.download(&format!("{}/missing.jpg", server.uri()), 2).await.is_none());
    }

    #[tokio::test]
    async fn test_download_recovers_on_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky.jpg"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1_u8; 100]))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let storage = client(dir.path(), Arc::default());
        let bytes = storage.download(&format!("{}/flaky.jpg", server.uri()), 1).await.unwrap();
        assert_eq!(bytes.len(), 100);
    }

    // ==================== Upload and Metadata ====================

    #[tokio::test]
    async fn test_store_downloads_and_uploads() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![9_u8; 600]))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let storage = client(dir.path(), Arc::default());
        let source = format!("{}/pic.jpg", server.uri());
        let public_url = storage.store(&source, "red cat").await.unwrap();
        let path = destination_path("red cat", &source);
        assert_eq!(public_url, format!("https://store.example.com/images/{path}"));
        assert_eq!(std::fs::read(dir.path().join("images").join(&path)).unwrap().len(), 600);
    }

    #[tokio::test]
    async fn test_save_metadata_reports_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(RecordingStore::default());
        let storage = client(dir.path(), Arc::clone(&store));
        assert!(storage.save_metadata("c1", "https://store/x.jpg", "https://src/x.jpg", "coach").await);
        let records = store.records.lock().unwrap();
        assert_eq!(records[0].view_tag, "coach");
        assert_eq!(records[0].cluster_id, "c1");
        drop(records);

        let failing = Arc::new(RecordingStore {
            fail: true,
            ..RecordingStore::default()
        });
        let storage = client(dir.path(), failing);
        assert!(!storage.save_metadata("c1", "u", "o", "team").await);
    }
}
