//! Text-completion oracle abstraction.
//!
//! The ranking client only needs "prompt in, text out", plus the ability to
//! tell a refusal apart from an answer. Backends implement [`Oracle`].

mod gemini;

pub use gemini::GeminiOracle;

use async_trait::async_trait;
use thiserror::Error;

/// Shape of the answer the caller expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    /// Free text.
    Text,
    /// A JSON document.
    Json,
}

/// One completion request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleRequest {
    pub prompt: String,
    pub format: ResponseFormat,
}

impl OracleRequest {
    #[must_use]
    pub fn text(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            format: ResponseFormat::Text,
        }
    }

    #[must_use]
    pub fn json(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            format: ResponseFormat::Json,
        }
    }
}

/// What the oracle said.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OracleReply {
    Text(String),
    /// The oracle refused or returned nothing.
    Blocked { reason: String },
}

/// Oracle transport and decoding failures.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("oracle request failed: {source}")]
    Transport {
        #[source]
        source: reqwest::Error,
    },

    #[error("oracle returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("could not decode oracle response: {reason}")]
    Decode { reason: String },
}

/// A text-generation capability used as a black-box decision function.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Oracle name for logging.
    fn name(&self) -> &str;

    /// Completes one prompt.
    async fn complete(&self, request: &OracleRequest) -> Result<OracleReply, OracleError>;
}
