//! Candidate URL validation.
//!
//! A candidate survives when it is not on the domain blacklist, answers a
//! `HEAD` probe with a 2xx status, and either declares an image content type
//! or (when the type is missing or generic) ends in an image file extension.
//! A certificate failure earns exactly one more probe with relaxed trust.

use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use thiserror::Error;
use tracing::{debug, info, instrument};
use url::Url;

use crate::http::{HttpBuildError, HttpClients, Trust, is_tls_error};
use crate::model::{ImageCandidate, ValidatedCandidate};
use crate::retry::{Backoff, RetryPolicy, retry_with_backoff};
use crate::user_agent::BROWSER_USER_AGENT;

/// Extensions accepted when the server does not say what it is serving.
const IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".gif", ".webp"];

/// Content types that say nothing about the payload.
const GENERIC_CONTENT_TYPES: &[&str] = &["application/octet-stream", "binary/octet-stream"];

/// Why a probe rejected a URL.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("probe of {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("probe of {url} returned HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("{url} does not look like an image (content type: {content_type})")]
    NotImage { url: String, content_type: String },
}

impl ProbeError {
    /// Returns true for certificate and TLS negotiation failures.
    #[must_use]
    pub fn is_tls(&self) -> bool {
        matches!(self, Self::Transport { source, .. } if is_tls_error(source))
    }
}

/// Confirms candidate URLs are reachable images.
#[derive(Debug, Clone)]
pub struct Validator {
    clients: HttpClients,
    blacklist: Vec<String>,
    tls_retry: RetryPolicy,
}

impl Validator {
    /// Creates a validator with the given blacklist and probe timeout.
    ///
    /// # Errors
    ///
    /// Returns [`HttpBuildError`] if the probe clients cannot be built.
    pub fn new(blacklist: &[String], timeout: Duration) -> Result<Self, HttpBuildError> {
        let clients = HttpClients::build("validation", BROWSER_USER_AGENT, timeout)?;
        Ok(Self {
            clients,
            blacklist: blacklist
                .iter()
                .map(|entry| entry.trim().to_lowercase())
                .filter(|entry| !entry.is_empty())
                .collect(),
            tls_retry: RetryPolicy::new(1, Backoff::None),
        })
    }

    /// Returns true when the URL contains a blacklisted fragment.
    #[must_use]
    pub fn is_blacklisted(&self, url: &str) -> bool {
        let lowered = url.to_lowercase();
        self.blacklist.iter().any(|entry| lowered.contains(entry.as_str()))
    }

    /// Probes a single URL.
    ///
    /// Empty and blacklisted URLs are rejected without any network call.
    #[instrument(skip(self))]
    pub async fn validate_one(&self, url: &str) -> bool {
        let url = url.trim();
        if url.is_empty() {
            debug!("rejecting empty URL");
            return false;
        }
        if self.is_blacklisted(url) {
            debug!("rejecting blacklisted URL");
            return false;
        }

        let result = retry_with_backoff(&self.tls_retry, "image probe", ProbeError::is_tls, |attempt| {
            let trust = if attempt == 0 { Trust::Strict } else { Trust::Relaxed };
            self.probe(url, trust)
        })
        .await;

        match result {
            Ok(trust) => {
                debug!(?trust, "URL validated");
                true
            }
            Err(error) => {
                debug!(error = %error, "URL rejected");
                false
            }
        }
    }

    /// Validates candidates in order, stopping once `max_valid` have passed.
    ///
    /// Survivors keep their relative order.
    pub async fn filter(&self, candidates: Vec<ImageCandidate>, max_valid: usize) -> Vec<ValidatedCandidate> {
        let total = candidates.len();
        let mut validated = Vec::with_capacity(max_valid.min(total));
        for candidate in candidates {
            if validated.len() >= max_valid {
                break;
            }
            if self.validate_one(&candidate.url).await {
                validated.push(ValidatedCandidate::new(candidate));
            }
        }
        info!(total, valid = validated.len(), max_valid, "validation finished");
        validated
    }

    async fn probe(&self, url: &str, trust: Trust) -> Result<Trust, ProbeError> {
        let response = self
            .clients
            .get(trust)
            .head(url)
            .send()
            .await
            .map_err(|source| ProbeError::Transport {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProbeError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_lowercase);
        if accepts_content(content_type.as_deref(), url) {
            Ok(trust)
        } else {
            Err(ProbeError::NotImage {
                url: url.to_string(),
                content_type: content_type.unwrap_or_else(|| "<none>".to_string()),
            })
        }
    }
}

/// Decides whether a probe response describes an image.
#[must_use]
pub fn accepts_content(content_type: Option<&str>, url: &str) -> bool {
    let declared = content_type
        .map(|value| value.trim().to_lowercase())
        .filter(|value| !value.is_empty());
    match declared {
        Some(value) if value.contains("image/") => true,
        Some(value) if GENERIC_CONTENT_TYPES.iter().any(|generic| value.starts_with(generic)) => {
            has_image_extension(url)
        }
        Some(_) => false,
        None => has_image_extension(url),
    }
}

/// Returns true when the URL path ends in a known image extension.
#[must_use]
pub fn has_image_extension(url: &str) -> bool {
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_lowercase(),
        Err(_) => url.split(['?', '#']).next().unwrap_or_default().to_lowercase(),
    };
    IMAGE_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::model::Provenance;

    fn validator() -> Validator {
        let blacklist = vec!["gettyimages.com".to_string(), "tiktok.com/".to_string()];
        Validator::new(&blacklist, Duration::from_secs(5)).unwrap()
    }

    fn candidate(url: String) -> ImageCandidate {
        ImageCandidate {
            url,
            title: String::new(),
            thumbnail_url: String::new(),
            width: 800,
            height: 600,
            provenance: Provenance::Primary,
        }
    }

    // ==================== Content Decision ====================

    #[test]
    fn test_accepts_declared_image_type() {
        assert!(accepts_content(Some("image/jpeg"), "https://x/a"));
        assert!(accepts_content(Some("IMAGE/PNG; charset=binary"), "https://x/a"));
    }

    #[test]
    fn test_generic_or_missing_type_falls_back_to_extension() {
        assert!(accepts_content(None, "https://x/a.JPG?w=100"));
        assert!(accepts_content(Some("application/octet-stream"), "https://x/a.webp"));
        assert!(!accepts_content(Some("binary/octet-stream"), "https://x/a"));
        assert!(!accepts_content(None, "https://x/page"));
    }

    #[test]
    fn test_other_declared_type_is_rejected() {
        assert!(!accepts_content(Some("text/html"), "https://x/a.jpg"));
    }

    #[test]
    fn test_blacklist_is_case_insensitive() {
        let v = validator();
        assert!(v.is_blacklisted("https://media.GettyImages.com/photo.jpg"));
        assert!(!v.is_blacklisted("https://example.com/photo.jpg"));
    }

    // ==================== Network Probe ====================

    #[tokio::test]
    async fn test_blacklisted_url_makes_no_request() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(200).insert_header("content-type", "image/jpeg"))
            .expect(0)
            .mount(&server)
            .await;

        let url = format!("{}/gettyimages.com/a.jpg", server.uri());
        assert!(!validator().validate_one(&url).await);
        assert!(!validator().validate_one("   ").await);
    }

    #[tokio::test]
    async fn test_probe_accepts_image_and_rejects_html() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/ok"))
            .respond_with(ResponseTemplate::new(200).insert_header("content-type", "image/png"))
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/page.jpg"))
            .respond_with(ResponseTemplate::new(200).insert_header("content-type", "text/html"))
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/gone.jpg"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let v = validator();
        assert!(v.validate_one(&format!("{}/ok", server.uri())).await);
        assert!(!v.validate_one(&format!("{}/page.jpg", server.uri())).await);
        assert!(!v.validate_one(&format!("{}/gone.jpg", server.uri())).await);
    }

    #[tokio::test]
    async fn test_filter_preserves_order_and_stops_early() {
        let server = MockServer::start().await;
        for good in ["/1.jpg", "/3.jpg", "/4.jpg"] {
            Mock::given(method("HEAD"))
                .and(path(good))
                .respond_with(ResponseTemplate::new(200).insert_header("content-type", "image/jpeg"))
                .expect(1)
                .mount(&server)
                .await;
        }
        Mock::given(method("HEAD"))
            .and(path("/2.jpg"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/5.jpg"))
            .respond_with(ResponseTemplate::new(200).insert_header("content-type", "image/jpeg"))
            .expect(0)
            .mount(&server)
            .await;

        let candidates = (1..=5)
            .map(|n| candidate(format!("{}/{n}.jpg", server.uri())))
            .collect();
        let validated = validator().filter(candidates, 3).await;
        let urls: Vec<_> = validated.iter().map(|c| c.url.clone()).collect();
        assert_eq!(
            urls,
            vec![
                format!("{}/1.jpg", server.uri()),
                format!("{}/3.jpg", server.uri()),
                format!("{}/4.jpg", server.uri()),
            ]
        );
    }

    #[tokio::test]
    async fn test_connection_failure_is_not_tls_and_not_retried() {
        let v = validator();
        let error = v.probe("http://127.0.0.1:9/a.jpg", Trust::Strict).await.unwrap_err();
        assert!(!error.is_tls());
        assert!(!v.validate_one("http://127.0.0.1:9/a.jpg").await);
    }
}
