//! Oracle-mediated query generation and candidate selection.
//!
//! Both operations degrade to `None`: a missing oracle, a refusal, a
//! transport error and unparseable output all mean "no decision". Callers
//! treat that as a stage gate, never as a crash.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::config::RankingSettings;
use crate::model::{SelectedImage, ValidatedCandidate};
use crate::oracle::{Oracle, OracleReply, OracleRequest};

/// Justification recorded when the oracle gives none.
pub const DEFAULT_JUSTIFICATION: &str = "No justification provided.";

/// Echoed prefix stripped from generated queries.
const QUERY_PREFIX: &str = "search query:";

/// The oracle's structured selection answer.
#[derive(Debug, Deserialize)]
struct SelectionDecision {
    #[serde(default)]
    selected_image_index: Value,
    justification: Option<String>,
}

/// Turns text into a search phrase and picks the best candidate.
pub struct RankingClient {
    oracle: Option<Arc<dyn Oracle>>,
    settings: RankingSettings,
}

impl RankingClient {
    /// Creates a client. `None` disables both operations for the process
    /// lifetime.
    #[must_use]
    pub fn new(oracle: Option<Arc<dyn Oracle>>, settings: RankingSettings) -> Self {
        if oracle.is_none() {
            warn!("no oracle configured; query generation and image selection are disabled");
        }
        Self { oracle, settings }
    }

    /// Returns true when an oracle is configured.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.oracle.is_some()
    }

    /// How many candidates [`select_best`](Self::select_best) presents.
    #[must_use]
    pub fn candidates_for_selection(&self) -> usize {
        self.settings.candidates_for_selection
    }

    /// Character ceiling for the snippet sent with the selection prompt.
    #[must_use]
    pub fn selection_char_limit(&self) -> usize {
        self.settings.selection_char_limit
    }

    /// Asks the oracle for a short, visually descriptive search phrase.
    #[instrument(skip_all, fields(chars = text.chars().count()))]
    pub async fn generate_query(&self, text: &str) -> Option<String> {
        let oracle = self.oracle.as_ref()?;
        let truncated = truncate_chars(text, self.settings.query_char_limit);
        let prompt = query_prompt(truncated);

        let raw = match oracle.complete(&OracleRequest::text(prompt)).await {
            Ok(OracleReply::Text(raw)) => raw,
            Ok(OracleReply::Blocked { reason }) => {
                warn!(reason, "oracle declined query generation");
                return None;
            }
            Err(error) => {
                warn!(error = %error, "query generation failed");
                return None;
            }
        };

        let query = clean_query(&raw);
        match query {
            Some(ref q) => info!(query = %q, "generated search query"),
            None => warn!("oracle generated an empty query"),
        }
        query
    }

    /// Asks the oracle to pick one of `candidates`.
    ///
    /// Only the first `candidates_for_selection` entries are shown.
    #[instrument(skip_all, fields(candidates = candidates.len(), query = %query))]
    pub async fn select_best(
        &self,
        candidates: &[ValidatedCandidate],
        snippet: &str,
        query: &str,
    ) -> Option<SelectedImage> {
        let oracle = self.oracle.as_ref()?;
        if candidates.is_empty() {
            debug!("no candidates to select from");
            return None;
        }
        let shown = &candidates[..candidates.len().min(self.settings.candidates_for_selection)];
        let prompt = self.selection_prompt(shown, snippet, query);

        let raw = match oracle.complete(&OracleRequest::json(prompt)).await {
            Ok(OracleReply::Text(raw)) => raw,
            Ok(OracleReply::Blocked { reason }) => {
                warn!(reason, "oracle declined image selection");
                return None;
            }
            Err(error) => {
                warn!(error = %error, "image selection failed");
                return None;
            }
        };

        let (index, justification) = match parse_selection(&raw) {
            Ok(decision) => decision,
            Err(reason) => {
                warn!(reason, raw = %raw, "could not parse selection output");
                return None;
            }
        };
        info!(justification = %justification, "selection justification");

        let Some(index) = index else {
            info!("oracle found no suitable candidate");
            return None;
        };
        let Some(candidate) = index.checked_sub(1).and_then(|zero_based| shown.get(zero_based)) else {
            warn!(index, shown = shown.len(), "oracle selected an out-of-range index");
            return None;
        };
        info!(index, url = %candidate.url, "oracle selected candidate");
        Some(SelectedImage {
            candidate: candidate.clone(),
            justification,
        })
    }

    fn selection_prompt(&self, shown: &[ValidatedCandidate], snippet: &str, query: &str) -> String {
        let listing = shown
            .iter()
            .enumerate()
            .map(|(i, candidate)| {
                format!(
                    "{}. Title: \"{}\"\n   URL: \"{}\"\n   Dimensions: {}x{}",
                    i + 1,
                    candidate.title,
                    candidate.url,
                    candidate.width,
                    candidate.height
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n");
        let snippet = truncate_chars(snippet, self.settings.selection_char_limit);
        let (width, height) = (self.settings.desired_min_width, self.settings.desired_min_height);

        format!(
            "You are an expert image curator. Your task is to select the single best image from \
the provided list to be the main visual for an article.

Article Snippet:
---
{snippet}
---

Original Search Query Used: \"{query}\"

Desirable Image Characteristics:
- Highly relevant to the article snippet and search query.
- Visually appealing and engaging.
- Good quality (e.g., clear, not pixelated, not an icon unless specifically relevant).
- Prefer landscape orientation (width greater than height).
- Ideal dimensions around {width}x{height} pixels or larger, but relevance is key.

Image Candidates:
---
{listing}
---

Instructions:
Carefully review each candidate. Choose the one that best fits the criteria.
Output your response in JSON format with two keys:
1. \"selected_image_index\": The 1-based index of the image you selected from the list above (e.g., 1, 2, 3, ...).
2. \"justification\": A brief (1-2 sentences) explanation for your choice.

If absolutely none of the candidates are suitable, output:
{{
  \"selected_image_index\": null,
  \"justification\": \"None of the provided candidates were suitable because [brief reason].\"
}}
"
        )
    }
}

fn query_prompt(text: &str) -> String {
    format!(
        "Analyze the following article text and generate a concise, effective image search query \
(3-7 words) suitable for finding a single, compelling, representative main image for the article.
Focus on visually descriptive terms.

Article Text:
---
{text}
---

Output only the generated search query, and nothing else. For example: \"red cat jumping\"
Search Query:
"
    )
}

/// Returns the first `max_chars` characters of `text`.
#[must_use]
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

/// Strips an echoed prefix and quoting from a generated query.
#[must_use]
pub fn clean_query(raw: &str) -> Option<String> {
    let mut query = raw.trim();
    if query
        .get(..QUERY_PREFIX.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(QUERY_PREFIX))
    {
        query = &query[QUERY_PREFIX.len()..];
    }
    let cleaned: String = query.chars().filter(|c| *c != '"' && *c != '\'').collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

/// Parses a selection answer into a 1-based index (or `None` for "none
/// suitable") and a justification.
///
/// # Errors
///
/// Returns a reason string when the output is not a usable decision.
pub fn parse_selection(raw: &str) -> Result<(Option<usize>, String), String> {
    let body = strip_code_fence(raw);
    let decision: SelectionDecision =
        serde_json::from_str(body).map_err(|e| format!("invalid JSON: {e}"))?;
    let justification = decision
        .justification
        .filter(|j| !j.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_JUSTIFICATION.to_string());
    let index = index_from_value(&decision.selected_image_index)?;
    Ok((index, justification))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn index_from_value(value: &Value) -> Result<Option<usize>, String> {
    match value {
        Value::Null => Ok(None),
        Value::Number(number) => {
            if let Some(n) = number.as_u64() {
                return usize::try_from(n).map(Some).map_err(|e| e.to_string());
            }
            match number.as_f64() {
                Some(f) if f.fract() == 0.0 && f >= 0.0 && f <= f64::from(u32::MAX) => Ok(Some(f as usize)),
                _ => Err(format!("index {number} is not a non-negative integer")),
            }
        }
        Value::String(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("null") {
                return Ok(None);
            }
            trimmed
                .parse::<usize>()
                .map(Some)
                .map_err(|_| format!("index '{trimmed}' is not an integer"))
        }
        other => Err(format!("unexpected index value {other}")),
    }
}

/// Removes a surrounding ```` ```json ```` fence, if present.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
