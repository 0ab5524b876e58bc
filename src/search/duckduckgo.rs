//! DuckDuckGo search backend.
//!
//! Image search is a two-step exchange: the landing page embeds a `vqd`
//! token that must accompany every `i.js` JSON page request. Pages are
//! fetched on demand and chained through the `next` cursor. The text search
//! used by the fallback path scrapes the HTML endpoint.

use std::sync::LazyLock;
use std::time::Duration;

use futures_util::stream::{self, StreamExt, TryStreamExt};
use regex::Regex;
use reqwest::{Client, StatusCode, header};
use scraper::{Html, Selector};
use serde::Deserialize;
use tracing::{debug, instrument};
use url::Url;

use super::{HitStream, RawImageHit, RawTextHit, SearchBackend, SearchError};
use crate::http::{HttpBuildError, Trust, build_client};
use crate::user_agent::BROWSER_USER_AGENT;

/// Default landing page and JSON API host.
pub const DEFAULT_BASE_URL: &str = "https://duckduckgo.com";

/// Default host of the HTML text-search endpoint.
pub const DEFAULT_HTML_BASE_URL: &str = "https://html.duckduckgo.com";

/// Worldwide results.
const REGION: &str = "wt-wt";

/// Moderate safe-search.
const SAFE_SEARCH_MODERATE: &str = "1";

#[allow(clippy::expect_used)]
static VQD_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"vqd=["']?([\d-]+)["']?"#).expect("vqd regex is valid") // Static pattern, safe to panic
});

#[allow(clippy::expect_used)]
static RESULT_LINK_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("a.result__a").expect("result link selector is valid") // Static pattern, safe to panic
});

// ==================== Response Types ====================

#[derive(Debug, Deserialize)]
struct ImagePage {
    #[serde(default)]
    results: Vec<ImageEntry>,
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImageEntry {
    image: Option<String>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    thumbnail: String,
    width: Option<serde_json::Value>,
    height: Option<serde_json::Value>,
}

impl ImageEntry {
    fn into_hit(self) -> RawImageHit {
        RawImageHit {
            image_url: self.image,
            title: self.title,
            thumbnail_url: self.thumbnail,
            width: self.width.as_ref().and_then(dimension),
            height: self.height.as_ref().and_then(dimension),
        }
    }
}

/// Only non-negative integers count as dimensions.
fn dimension(value: &serde_json::Value) -> Option<u32> {
    value.as_u64().and_then(|n| u32::try_from(n).ok())
}

/// Position in the paged image results.
enum Cursor {
    Start,
    Page { vqd: String, offset: String },
    Done,
}

// ==================== Backend ====================

/// Image and text search against DuckDuckGo.
#[derive(Debug, Clone)]
pub struct DuckDuckGoBackend {
    client: Client,
    base_url: String,
    html_base_url: String,
}

impl DuckDuckGoBackend {
    /// Creates a backend against the public endpoints.
    ///
    /// # Errors
    ///
    /// Returns [`HttpBuildError`] if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, HttpBuildError> {
        Self::with_base_urls(DEFAULT_BASE_URL, DEFAULT_HTML_BASE_URL, timeout)
    }

    /// Creates a backend with custom hosts (for testing with wiremock).
    ///
    /// # Errors
    ///
    /// Returns [`HttpBuildError`] if the HTTP client cannot be built.
    pub fn with_base_urls(
        base_url: impl Into<String>,
        html_base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, HttpBuildError> {
        let client = build_client("search", BROWSER_USER_AGENT, timeout, Trust::Strict)?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            html_base_url: html_base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, base: &str, path: &str) -> Result<Url, SearchError> {
        let raw = format!("{base}{path}");
        Url::parse(&raw).map_err(|e| SearchError::decode(raw, format!("invalid endpoint: {e}")))
    }

    #[instrument(skip(self))]
    async fn fetch_vqd(&self, query: &str) -> Result<String, SearchError> {
        let mut url = self.endpoint(&self.base_url, "/")?;
        url.query_pairs_mut().append_pair("q", query);

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| SearchError::transport(url.as_str(), e))?;
        check_status(url.as_str(), response.status())?;
        let body = response
            .text()
            .await
            .map_err(|e| SearchError::transport(url.as_str(), e))?;

        VQD_PATTERN
            .captures(&body)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| SearchError::rate_limited("landing page did not include a vqd token"))
    }

    async fn fetch_image_page(
        &self,
        query: &str,
        vqd: &str,
        offset: Option<&str>,
    ) -> Result<ImagePage, SearchError> {
        let mut url = self.endpoint(&self.base_url, "/i.js")?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("l", REGION)
                .append_pair("o", "json")
                .append_pair("q", query)
                .append_pair("vqd", vqd)
                .append_pair("f", ",,,,,")
                .append_pair("p", SAFE_SEARCH_MODERATE);
            if let Some(offset) = offset {
                pairs.append_pair("s", offset);
            }
        }

        let response = self
            .client
            .get(url.clone())
            .header(header::REFERER, format!("{}/", self.base_url))
            .send()
            .await
            .map_err(|e| SearchError::transport(url.as_str(), e))?;
        check_status(url.as_str(), response.status())?;
        response
            .json::<ImagePage>()
            .await
            .map_err(|e| SearchError::decode(url.as_str(), e.to_string()))
    }

    async fn next_image_page(
        &self,
        query: &str,
        cursor: Cursor,
    ) -> Result<Option<(Vec<RawImageHit>, Cursor)>, SearchError> {
        let (vqd, offset) = match cursor {
            Cursor::Done => return Ok(None),
            Cursor::Start => (self.fetch_vqd(query).await?, None),
            Cursor::Page { vqd, offset } => (vqd, Some(offset)),
        };

        let page = self.fetch_image_page(query, &vqd, offset.as_deref()).await?;
        debug!(query, count = page.results.len(), "fetched image results page");

        let next = match page.next.as_deref().and_then(next_offset) {
            Some(offset) if !page.results.is_empty() => Cursor::Page { vqd, offset },
            _ => Cursor::Done,
        };
        let hits = page.results.into_iter().map(ImageEntry::into_hit).collect();
        Ok(Some((hits, next)))
    }

    #[instrument(skip(self))]
    async fn fetch_text_hits(&self, query: &str) -> Result<Vec<RawTextHit>, SearchError> {
        let url = self.endpoint(&self.html_base_url, "/html/")?;
        let body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("q", query)
            .append_pair("kl", REGION)
            .finish();

        let response = self
            .client
            .post(url.clone())
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(header::REFERER, format!("{}/", self.html_base_url))
            .body(body)
            .send()
            .await
            .map_err(|e| SearchError::transport(url.as_str(), e))?;
        // The HTML endpoint answers 202 with an empty page when throttling.
        if response.status() == StatusCode::ACCEPTED {
            return Err(SearchError::rate_limited("html endpoint returned 202"));
        }
        check_status(url.as_str(), response.status())?;
        let html = response
            .text()
            .await
            .map_err(|e| SearchError::transport(url.as_str(), e))?;

        Ok(parse_text_results(&html))
    }
}

impl SearchBackend for DuckDuckGoBackend {
    fn name(&self) -> &str {
        "duckduckgo"
    }

    fn images<'a>(&'a self, query: &'a str, max_results: usize) -> HitStream<'a, RawImageHit> {
        stream::try_unfold(Cursor::Start, move |cursor| self.next_image_page(query, cursor))
            .map_ok(|hits| stream::iter(hits.into_iter().map(Ok)))
            .try_flatten()
            .take(max_results)
            .boxed()
    }

    fn text<'a>(&'a self, query: &'a str, max_results: usize) -> HitStream<'a, RawTextHit> {
        stream::once(self.fetch_text_hits(query))
            .map_ok(|hits| stream::iter(hits.into_iter().map(Ok)))
            .try_flatten()
            .take(max_results)
            .boxed()
    }
}

/// Maps throttling statuses to [`SearchError::RateLimited`] and other
/// failures to [`SearchError::HttpStatus`].
fn check_status(url: &str, status: StatusCode) -> Result<(), SearchError> {
    if status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS {
        return Err(SearchError::rate_limited(format!("HTTP {}", status.as_u16())));
    }
    if !status.is_success() {
        return Err(SearchError::HttpStatus {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }
    Ok(())
}

/// Extracts the `s` offset from a relative `next` cursor.
fn next_offset(next: &str) -> Option<String> {
    let base = Url::parse("https://duckduckgo.com/").ok()?;
    let url = base.join(next).ok()?;
    url.query_pairs()
        .find(|(key, _)| key == "s")
        .map(|(_, value)| value.into_owned())
}

fn parse_text_results(html: &str) -> Vec<RawTextHit> {
    let document = Html::parse_document(html);
    document
        .select(&RESULT_LINK_SELECTOR)
        .filter_map(|anchor| {
            let href = anchor.value().attr("href")?;
            let target = unwrap_redirect(href)?;
            let title = anchor.text().collect::<String>().trim().to_string();
            Some(RawTextHit {
                href: Some(target),
                title,
            })
        })
        .collect()
}

/// Resolves `//duckduckgo.com/l/?uddg=...` redirect links to their target.
/// Ad links are dropped.
fn unwrap_redirect(href: &str) -> Option<String> {
    if href.contains("duckduckgo.com/y.js") {
        return None;
    }
    let base = Url::parse("https://duckduckgo.com/").ok()?;
    let url = base.join(href).ok()?;
    if url.host_str().is_some_and(|host| host.ends_with("duckduckgo.com")) {
        return url
            .query_pairs()
            .find(|(key, _)| key == "uddg")
            .map(|(_, value)| value.into_owned());
    }
    Some(url.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use wiremock::matchers::{body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn backend(server: &MockServer) -> DuckDuckGoBackend {
        DuckDuckGoBackend::with_base_urls(server.uri(), server.uri(), Duration::from_secs(5)).unwrap()
    }

    async fn mount_landing(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<script>vqd=\"4-1234567890\";</script>"),
            )
            .mount(server)
            .await;
    }

    // ==================== Parsing Helpers ====================

    #[test]
    fn test_unwrap_redirect_decodes_uddg() {
        let href = "//duckduckgo.com/l/?uddg=https%3A%2F%2Fwww.flickr.com%2Fphotos%2Fx&rut=abc";
        assert_eq!(
            unwrap_redirect(href).as_deref(),
            Some("https://www.flickr.com/photos/x")
        );
        assert_eq!(
            unwrap_redirect("https://example.com/a.jpg").as_deref(),
            Some("https://example.com/a.jpg")
        );
        assert!(unwrap_redirect("https://duckduckgo.com/y.js?ad=1").is_none());
    }

    #[test]
    fn test_next_offset_reads_s_param() {
        let next = "i.js?q=cat&o=json&p=1&s=100&u=bing&f=,,,&l=wt-wt";
        assert_eq!(next_offset(next).as_deref(), Some("100"));
        assert!(next_offset("i.js?q=cat").is_none());
    }

    #[test]
    fn test_dimension_requires_integer() {
        assert_eq!(dimension(&serde_json::json!(640)), Some(640));
        assert_eq!(dimension(&serde_json::json!("640")), None);
        assert_eq!(dimension(&serde_json::json!(-1)), None);
    }

    // ==================== Image Search ====================

    #[tokio::test]
    async fn test_images_pages_through_next_cursor() {
        let server = MockServer::start().await;
        mount_landing(&server).await;
        Mock::given(method("GET"))
            .and(path("/i.js"))
            .and(query_param("vqd", "4-1234567890"))
            .and(query_param("s", "100"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [
                    {"image": "https://img.example.com/3.jpg", "title": "three", "thumbnail": "", "width": 300, "height": 300}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/i.js"))
            .and(query_param("q", "red cat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [
                    {"image": "https://img.example.com/1.jpg", "title": "one", "thumbnail": "https://t/1", "width": 1200, "height": 800},
                    {"image": "https://img.example.com/2.jpg", "title": "two", "thumbnail": "https://t/2", "width": "n/a", "height": 800}
                ],
                "next": "i.js?q=red+cat&o=json&p=1&s=100&u=bing&f=,,,&l=wt-wt"
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        let backend = backend(&server);
        let hits: Vec<_> = backend.images("red cat", 10).collect().await;
        let hits: Vec<RawImageHit> = hits.into_iter().map(Result::unwrap).collect();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].width, Some(1200));
        assert_eq!(hits[0].thumbnail_url, "https://t/1");
        assert_eq!(hits[1].width, None);
        assert_eq!(hits[2].image_url.as_deref(), Some("https://img.example.com/3.jpg"));
    }

    #[tokio::test]
    async fn test_images_stops_pulling_at_max_results() {
        let server = MockServer::start().await;
        mount_landing(&server).await;
        Mock::given(method("GET"))
            .and(path("/i.js"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [
                    {"image": "https://img.example.com/1.jpg", "width": 500, "height": 500},
                    {"image": "https://img.example.com/2.jpg", "width": 500, "height": 500}
                ],
                "next": "i.js?q=x&s=100"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let hits: Vec<_> = backend(&server).images("x", 2).collect().await;
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn test_forbidden_landing_is_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let backend = backend(&server);
        let mut stream = backend.images("x", 5);
        let first = stream.next().await.unwrap();
        assert!(matches!(first, Err(SearchError::RateLimited { .. })));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_missing_vqd_is_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>no token</html>"))
            .mount(&server)
            .await;

        let backend = backend(&server);
        let first = backend.images("x", 5).next().await.unwrap();
        assert!(matches!(first, Err(SearchError::RateLimited { .. })));
    }

    #[tokio::test]
    async fn test_server_error_is_http_status() {
        let server = MockServer::start().await;
        mount_landing(&server).await;
        Mock::given(method("GET"))
            .and(path("/i.js"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let backend = backend(&server);
        let first = backend.images("x", 5).next().await.unwrap();
        assert!(matches!(first, Err(SearchError::HttpStatus { status: 500, .. })));
    }

    // ==================== Text Search ====================

    #[tokio::test]
    async fn test_text_parses_result_anchors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/html/"))
            .and(body_string_contains("kl=wt-wt"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<html><body>
                <div class="result"><a class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Funsplash.com%2Fphotos%2Fabc&rut=1">Unsplash <b>cat</b></a></div>
                <div class="result"><a class="result__a" href="https://news.example.com/story">News</a></div>
                <div class="result"><a class="other" href="https://ignored.example.com">Ignored</a></div>
                </body></html>"#,
            ))
            .mount(&server)
            .await;

        let backend = backend(&server);
        let hits: Vec<RawTextHit> = backend
            .text("cat images", 10)
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .map(Result::unwrap)
            .collect();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].href.as_deref(), Some("https://unsplash.com/photos/abc"));
        assert_eq!(hits[0].title, "Unsplash cat");
        assert_eq!(hits[1].href.as_deref(), Some("https://news.example.com/story"));
    }

    #[tokio::test]
    async fn test_text_accepted_status_is_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/html/"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;

        let backend = backend(&server);
        let first = backend.text("x", 10).next().await.unwrap();
        assert!(matches!(first, Err(SearchError::RateLimited { .. })));
    }
}
