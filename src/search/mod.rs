//! Image discovery.
//!
//! [`SearchProvider`] drives a [`SearchBackend`] through a bounded retry
//! schedule, falls back to link harvesting from a plain text search when the
//! image endpoint keeps failing, and drops hits that are too small.
//!
//! # Retry schedule
//!
//! Attempt 0 sends the query verbatim. Attempt `k >= 1` waits
//! `min(30s, 2^k s) + U[0, 2s)` and appends an alternating disambiguating
//! term (`photos` on odd attempts, `images` on even ones) so the provider does
//! not serve a cached empty answer for an identical request.
//!
//! An attempt that yields no usable hits is retried but never triggers the
//! fallback: only rate limiting and transport failures do.

mod duckduckgo;

pub use duckduckgo::DuckDuckGoBackend;

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::model::{ImageCandidate, Provenance};
use crate::retry::{Backoff, RetryPolicy, random_between, retry_with_backoff};

/// Dimensions given to fallback hits, which carry no size metadata.
pub const FALLBACK_PLACEHOLDER_WIDTH: u32 = 800;
pub const FALLBACK_PLACEHOLDER_HEIGHT: u32 = 600;

/// Extra hits requested from the backend to cover entries without an image URL.
const BACKEND_HEADROOM: usize = 5;

/// Link fragments that mark a text-search result as a likely image source.
const IMAGE_LINK_MARKERS: &[&str] = &[
    "flickr.com",
    "imgur.com",
    "unsplash.com",
    "pexels.com",
    "pixabay.com",
    "images",
    "photos",
    "pics",
    ".jpg",
    ".png",
];

/// Search failures.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("search provider rate limited the request: {reason}")]
    RateLimited { reason: String },

    #[error("search request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("search provider returned HTTP {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("could not decode search response from {url}: {reason}")]
    Decode { url: String, reason: String },

    #[error("search for '{query}' returned no usable results")]
    NoResults { query: String },
}

impl SearchError {
    pub(crate) fn rate_limited(reason: impl Into<String>) -> Self {
        Self::RateLimited {
            reason: reason.into(),
        }
    }

    pub(crate) fn transport(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Transport {
            url: url.into(),
            source,
        }
    }

    pub(crate) fn decode(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Decode {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Returns true when exhausting retries on this error should try the
    /// fallback strategy.
    #[must_use]
    pub fn triggers_fallback(&self) -> bool {
        !matches!(self, Self::NoResults { .. })
    }
}

/// One entry from an image search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawImageHit {
    pub image_url: Option<String>,
    pub title: String,
    pub thumbnail_url: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// One entry from a general web search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawTextHit {
    pub href: Option<String>,
    pub title: String,
}

/// Lazily paged search results.
pub type HitStream<'a, T> = BoxStream<'a, Result<T, SearchError>>;

/// A search engine reachable over the network.
///
/// Streams are pulled lazily; consumers stop polling once they have enough,
/// so backends should fetch pages on demand. Errors that prevent the first
/// page from loading surface as the first stream item.
pub trait SearchBackend: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Image search for `query`, yielding at most `max_results` hits.
    fn images<'a>(&'a self, query: &'a str, max_results: usize) -> HitStream<'a, RawImageHit>;

    /// General web search for `query`, yielding at most `max_results` hits.
    fn text<'a>(&'a self, query: &'a str, max_results: usize) -> HitStream<'a, RawTextHit>;
}

/// Self-imposed delays that keep request bursts below provider thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    /// Random pause before each image search call.
    pub pre_call: (Duration, Duration),
    /// Random pause before the fallback text search.
    pub fallback_pre_call: (Duration, Duration),
    /// Random pause inserted every `micro_delay_every` consumed results.
    pub micro_delay: (Duration, Duration),
    pub micro_delay_every: usize,
    /// Fixed pause between items in batch mode.
    pub inter_item: Duration,
}

impl Pacing {
    /// The production pacing.
    #[must_use]
    pub fn standard() -> Self {
        Self {
            pre_call: (Duration::from_millis(500), Duration::from_millis(1500)),
            fallback_pre_call: (Duration::from_secs(1), Duration::from_secs(2)),
            micro_delay: (Duration::from_millis(100), Duration::from_millis(300)),
            micro_delay_every: 5,
            inter_item: Duration::from_secs(1),
        }
    }

    /// No delays at all.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            pre_call: (Duration::ZERO, Duration::ZERO),
            fallback_pre_call: (Duration::ZERO, Duration::ZERO),
            micro_delay: (Duration::ZERO, Duration::ZERO),
            micro_delay_every: 0,
            inter_item: Duration::ZERO,
        }
    }

    pub(crate) async fn pause(range: (Duration, Duration)) {
        let delay = random_between(range.0, range.1);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    fn wants_micro_delay(&self, consumed: usize) -> bool {
        self.micro_delay_every > 0 && consumed > 0 && consumed % self.micro_delay_every == 0
    }
}

impl Default for Pacing {
    fn default() -> Self {
        Self::standard()
    }
}

/// Returns the query sent on `attempt`.
#[must_use]
pub fn query_for_attempt(query: &str, attempt: u32) -> String {
    match attempt {
        0 => query.to_string(),
        odd if odd % 2 == 1 => format!("{query} photos"),
        _ => format!("{query} images"),
    }
}

/// Returns true when a text-search link plausibly leads to an image.
#[must_use]
pub fn looks_like_image_link(href: &str) -> bool {
    let lowered = href.to_lowercase();
    IMAGE_LINK_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}

/// Finds image candidates for a query.
pub struct SearchProvider {
    backend: Arc<dyn SearchBackend>,
    retry: RetryPolicy,
    pacing: Pacing,
    min_dimension: u32,
}

impl SearchProvider {
    /// Creates a provider with the exponential search schedule.
    #[must_use]
    pub fn new(backend: Arc<dyn SearchBackend>, min_dimension: u32, pacing: Pacing) -> Self {
        Self {
            backend,
            retry: RetryPolicy::new(0, Backoff::exponential()),
            pacing,
            min_dimension,
        }
    }

    /// Replaces the delay schedule between attempts.
    #[must_use]
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.retry = RetryPolicy::new(0, backoff);
        self
    }

    /// Minimum width and height a hit must have.
    #[must_use]
    pub fn min_dimension(&self) -> u32 {
        self.min_dimension
    }

    /// Searches for up to `target_count` raw hits, retrying up to
    /// `max_retries` times, then drops hits below the minimum dimension.
    ///
    /// An empty result means every path came back empty; it is not an error.
    #[instrument(skip(self), fields(backend = self.backend.name()))]
    pub async fn search(&self, query: &str, target_count: usize, max_retries: u32) -> Vec<ImageCandidate> {
        let policy = self.retry.with_max_retries(max_retries);
        let primary = retry_with_backoff(&policy, "image search", |_: &SearchError| true, |attempt| {
            let attempt_query = query_for_attempt(query, attempt);
            async move {
                if attempt > 0 {
                    debug!(attempt, query = %attempt_query, "retrying with modified query");
                }
                self.primary_attempt(&attempt_query, target_count).await
            }
        })
        .await;

        let raw = match primary {
            Ok(raw) => raw,
            Err(error) if !error.triggers_fallback() => {
                info!(query, attempts = max_retries + 1, "no image results after all attempts");
                return Vec::new();
            }
            Err(error) => {
                warn!(query, error = %error, "image search exhausted retries; trying text-search fallback");
                match self.fallback(query, target_count).await {
                    Ok(raw) => raw,
                    Err(fallback_error) => {
                        warn!(query, error = %fallback_error, "fallback search failed");
                        return Vec::new();
                    }
                }
            }
        };

        let candidates = self.filter_dimensions(raw);
        info!(query, count = candidates.len(), "candidates after dimension filter");
        candidates
    }

    async fn primary_attempt(&self, query: &str, target_count: usize) -> Result<Vec<RawCandidate>, SearchError> {
        Pacing::pause(self.pacing.pre_call).await;

        let mut stream = self
            .backend
            .images(query, target_count.saturating_add(BACKEND_HEADROOM));
        let mut collected = Vec::with_capacity(target_count);
        let mut consumed = 0_usize;
        while collected.len() < target_count {
            let Some(item) = stream.next().await else {
                break;
            };
            let hit = match item {
                Ok(hit) => hit,
                Err(error) if collected.is_empty() => return Err(error),
                Err(error) => {
                    warn!(query, kept = collected.len(), error = %error, "image search interrupted; keeping hits so far");
                    break;
                }
            };
            if self.pacing.wants_micro_delay(consumed) {
                Pacing::pause(self.pacing.micro_delay).await;
            }
            consumed += 1;
            let Some(url) = hit.image_url.filter(|url| !url.trim().is_empty()) else {
                continue;
            };
            collected.push(RawCandidate {
                url,
                title: hit.title,
                thumbnail_url: hit.thumbnail_url,
                width: hit.width,
                height: hit.height,
                provenance: Provenance::Primary,
            });
        }

        if collected.is_empty() {
            return Err(SearchError::NoResults {
                query: query.to_string(),
            });
        }
        debug!(query, count = collected.len(), "image search returned raw hits");
        Ok(collected)
    }

    async fn fallback(&self, query: &str, target_count: usize) -> Result<Vec<RawCandidate>, SearchError> {
        let fallback_query = format!("{query} images high resolution photos");
        Pacing::pause(self.pacing.fallback_pre_call).await;

        let mut stream = self
            .backend
            .text(&fallback_query, target_count.saturating_mul(2));
        let mut collected = Vec::new();
        while collected.len() < target_count {
            let Some(item) = stream.next().await else {
                break;
            };
            let hit = match item {
                Ok(hit) => hit,
                Err(error) if collected.is_empty() => return Err(error),
                Err(error) => {
                    warn!(query = %fallback_query, kept = collected.len(), error = %error, "fallback search interrupted; keeping hits so far");
                    break;
                }
            };
            let Some(href) = hit.href.filter(|href| looks_like_image_link(href)) else {
                continue;
            };
            collected.push(RawCandidate {
                url: href,
                title: hit.title,
                thumbnail_url: String::new(),
                width: Some(FALLBACK_PLACEHOLDER_WIDTH),
                height: Some(FALLBACK_PLACEHOLDER_HEIGHT),
                provenance: Provenance::Fallback,
            });
        }
        info!(query = %fallback_query, count = collected.len(), "fallback search found potential candidates");
        Ok(collected)
    }

    fn filter_dimensions(&self, raw: Vec<RawCandidate>) -> Vec<ImageCandidate> {
        raw.into_iter()
            .filter_map(|hit| match (hit.width, hit.height) {
                (Some(width), Some(height)) if width >= self.min_dimension && height >= self.min_dimension => {
                    Some(ImageCandidate {
                        url: hit.url,
                        title: hit.title,
                        thumbnail_url: hit.thumbnail_url,
                        width,
                        height,
                        provenance: hit.provenance,
                    })
                }
                _ => {
                    debug!(title = %hit.title, "discarding candidate with small or missing dimensions");
                    None
                }
            })
            .collect()
    }
}

/// A hit with a URL whose dimensions have not been checked yet.
struct RawCandidate {
    url: String,
    title: String,
    thumbnail_url: String,
    width: Option<u32>,
    height: Option<u32>,
    provenance: Provenance,
}
