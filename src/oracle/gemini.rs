//! Gemini `generateContent` REST client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use url::Url;

use super::{Oracle, OracleError, OracleReply, OracleRequest, ResponseFormat};
use crate::config::SafetySetting;
use crate::http::{HttpBuildError, Trust, build_client};
use crate::user_agent::default_service_user_agent;

/// Default API host.
pub const DEFAULT_API_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Longest error body kept in [`OracleError::HttpStatus`].
const MAX_ERROR_BODY_CHARS: usize = 500;

// ==================== Wire Types ====================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
    safety_settings: Vec<WireSafetySetting<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct WireSafetySetting<'a> {
    category: &'a str,
    threshold: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

impl GenerateResponse {
    fn into_reply(self) -> OracleReply {
        if let Some(reason) = self.prompt_feedback.and_then(|feedback| feedback.block_reason) {
            return OracleReply::Blocked { reason };
        }
        let Some(candidate) = self.candidates.into_iter().next() else {
            return OracleReply::Blocked {
                reason: "no candidates returned".to_string(),
            };
        };
        let text: String = candidate
            .content
            .map(|content| content.parts.into_iter().filter_map(|part| part.text).collect())
            .unwrap_or_default();
        if text.trim().is_empty() {
            return OracleReply::Blocked {
                reason: candidate
                    .finish_reason
                    .unwrap_or_else(|| "empty response".to_string()),
            };
        }
        OracleReply::Text(text)
    }
}

// ==================== Client ====================

/// Oracle backed by a Gemini model.
pub struct GeminiOracle {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
    safety: Vec<SafetySetting>,
}

impl GeminiOracle {
    /// Creates a client against the public API.
    ///
    /// # Errors
    ///
    /// Returns [`HttpBuildError`] if the HTTP client cannot be built.
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        safety: Vec<SafetySetting>,
        timeout: Duration,
    ) -> Result<Self, HttpBuildError> {
        Self::with_base_url(api_key, model, safety, timeout, DEFAULT_API_BASE_URL)
    }

    /// Creates a client with a custom API host (for testing with wiremock).
    ///
    /// # Errors
    ///
    /// Returns [`HttpBuildError`] if the HTTP client cannot be built.
    pub fn with_base_url(
        api_key: impl Into<String>,
        model: impl Into<String>,
        safety: Vec<SafetySetting>,
        timeout: Duration,
        base_url: impl Into<String>,
    ) -> Result<Self, HttpBuildError> {
        let client = build_client("oracle", &default_service_user_agent(), timeout, Trust::Strict)?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.into(),
            safety,
        })
    }

    fn endpoint(&self) -> Result<Url, OracleError> {
        let raw = format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model);
        let mut url = Url::parse(&raw).map_err(|e| OracleError::Decode {
            reason: format!("invalid endpoint {raw}: {e}"),
        })?;
        url.query_pairs_mut().append_pair("key", &self.api_key);
        Ok(url)
    }
}

impl std::fmt::Debug for GeminiOracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiOracle")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Oracle for GeminiOracle {
    fn name(&self) -> &str {
        &self.model
    }

    #[instrument(skip_all, fields(model = %self.model, format = ?request.format))]
    async fn complete(&self, request: &OracleRequest) -> Result<OracleReply, OracleError> {
        let body = GenerateRequest {
            contents: [Content {
                role: "user",
                parts: [Part {
                    text: &request.prompt,
                }],
            }],
            safety_settings: self
                .safety
                .iter()
                .map(|setting| WireSafetySetting {
                    category: &setting.category,
                    threshold: &setting.threshold,
                })
                .collect(),
            generation_config: match request.format {
                ResponseFormat::Json => Some(GenerationConfig {
                    response_mime_type: "application/json",
                }),
                ResponseFormat::Text => None,
            },
        };

        // The key travels in the query string; strip URLs from errors.
        let response = self
            .client
            .post(self.endpoint()?)
            .json(&body)
            .send()
            .await
            .map_err(|e| OracleError::Transport {
                source: e.without_url(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(OracleError::HttpStatus {
                status: status.as_u16(),
                body: text.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }

        let parsed: GenerateResponse = response.json().await.map_err(|e| OracleError::Decode {
            reason: e.without_url().to_string(),
        })?;
        let reply = parsed.into_reply();
        if let OracleReply::Blocked { reason } = &reply {
            debug!(reason, "oracle returned no usable text");
        }
        Ok(reply)
    }
}
