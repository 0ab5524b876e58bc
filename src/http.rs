//! Shared HTTP client construction policy.
//!
//! Image probes and downloads need two flavors of the same client: one that
//! verifies certificates and one that does not. The relaxed client is only
//! ever used for a retry after the strict client hit a trust failure.

use std::error::Error as StdError;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

use reqwest::{Client, ClientBuilder, Proxy};
use thiserror::Error;
use tracing::warn;

/// Connect timeout shared by every client.
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Certificate verification mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trust {
    /// Verify certificates.
    Strict,
    /// Accept invalid certificates.
    Relaxed,
}

/// HTTP client construction failed.
#[derive(Debug, Error)]
pub enum HttpBuildError {
    #[error("HTTP client construction for {purpose} failed: {source}")]
    Build {
        purpose: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP client construction for {purpose} panicked while reading proxy settings")]
    Panic { purpose: String },
}

/// Strict and relaxed clients sharing a timeout and User-Agent.
#[derive(Debug, Clone)]
pub struct HttpClients {
    strict: Client,
    relaxed: Client,
}

impl HttpClients {
    /// Builds both clients.
    ///
    /// # Errors
    ///
    /// Returns [`HttpBuildError`] when either client cannot be constructed.
    pub fn build(purpose: &str, user_agent: &str, timeout: Duration) -> Result<Self, HttpBuildError> {
        Ok(Self {
            strict: build_client(purpose, user_agent, timeout, Trust::Strict)?,
            relaxed: build_client(purpose, user_agent, timeout, Trust::Relaxed)?,
        })
    }

    /// Returns the client for a trust mode.
    #[must_use]
    pub fn get(&self, trust: Trust) -> &Client {
        match trust {
            Trust::Strict => &self.strict,
            Trust::Relaxed => &self.relaxed,
        }
    }
}

/// Builds a client with the shared policy.
///
/// Some sandboxed environments panic when reqwest queries system proxy
/// settings; the builder then retries with environment proxies only.
///
/// # Errors
///
/// Returns [`HttpBuildError`] when construction fails.
pub fn build_client(
    purpose: &str,
    user_agent: &str,
    timeout: Duration,
    trust: Trust,
) -> Result<Client, HttpBuildError> {
    match try_build(user_agent, timeout, trust, false) {
        Ok(client) => Ok(client),
        Err(BuildFailure::Panic) => {
            warn!(purpose, "HTTP client hit system proxy panic; using env-proxy fallback builder");
            try_build(user_agent, timeout, trust, true).map_err(|failure| failure.into_error(purpose))
        }
        Err(failure) => Err(failure.into_error(purpose)),
    }
}

enum BuildFailure {
    Panic,
    Build(reqwest::Error),
}

impl BuildFailure {
    fn into_error(self, purpose: &str) -> HttpBuildError {
        match self {
            Self::Panic => HttpBuildError::Panic {
                purpose: purpose.to_string(),
            },
            Self::Build(source) => HttpBuildError::Build {
                purpose: purpose.to_string(),
                source,
            },
        }
    }
}

fn try_build(
    user_agent: &str,
    timeout: Duration,
    trust: Trust,
    env_proxy_only: bool,
) -> Result<Client, BuildFailure> {
    let user_agent = user_agent.to_string();
    catch_unwind(AssertUnwindSafe(move || {
        let mut builder = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS).min(timeout))
            .timeout(timeout)
            .user_agent(user_agent)
            .gzip(true);
        if trust == Trust::Relaxed {
            builder = builder.danger_accept_invalid_certs(true);
        }
        if env_proxy_only {
            builder = apply_env_proxies(builder.no_proxy());
        }
        builder.build().map_err(BuildFailure::Build)
    }))
    .map_err(|_| BuildFailure::Panic)?
}

fn apply_env_proxies(mut builder: ClientBuilder) -> ClientBuilder {
    let https = first_env(&["HTTPS_PROXY", "https_proxy", "ALL_PROXY", "all_proxy"]);
    if let Some(proxy) = https
        && let Ok(resolved) = Proxy::https(&proxy)
    {
        builder = builder.proxy(resolved);
    }
    let http = first_env(&["HTTP_PROXY", "http_proxy", "ALL_PROXY", "all_proxy"]);
    if let Some(proxy) = http
        && let Ok(resolved) = Proxy::http(&proxy)
    {
        builder = builder.proxy(resolved);
    }
    builder
}

fn first_env(names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| {
        std::env::var(name)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}

/// Returns true when a request failed on certificate or TLS negotiation.
///
/// reqwest does not expose a TLS error kind, so the whole source chain is
/// inspected for the usual markers.
#[must_use]
pub fn is_tls_error(error: &reqwest::Error) -> bool {
    let mut current: Option<&(dyn StdError + 'static)> = Some(error);
    while let Some(err) = current {
        let message = err.to_string().to_lowercase();
        if message.contains("certificate")
            || message.contains("tls")
            || message.contains("ssl")
            || message.contains("handshake")
        {
            return true;
        }
        current = err.source();
    }
    false
}
