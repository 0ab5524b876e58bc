//! Shared User-Agent strings for outbound HTTP traffic.
//!
//! Image hosts and the search engine routinely refuse obvious tool traffic, so
//! probes, downloads and search requests present a browser User-Agent. Calls
//! to our own collaborators (datastore, oracle) identify the tool instead.

/// Project URL for User-Agent identification.
const PROJECT_UA_URL: &str = "https://github.com/fierce/illustrator";

/// Browser User-Agent for image hosts and the search engine.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// User-Agent for datastore and oracle API calls.
#[must_use]
pub(crate) fn default_service_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("illustrator/{version} (+{PROJECT_UA_URL})")
}
