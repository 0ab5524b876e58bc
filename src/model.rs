//! Records that flow through the illustration pipeline.

use std::fmt;
use std::ops::Deref;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A text record that needs a representative image.
///
/// Owned by the content store; the pipeline only reads it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentItem {
    /// Row identifier, normalized to a string.
    pub id: String,
    /// Table the row was read from.
    pub source_table: String,
    /// Article, summary or perspective text.
    pub text_content: String,
    /// Cluster the record belongs to, when the table carries one.
    pub cluster_id: Option<String>,
}

/// Which discovery path produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    /// Image search results.
    Primary,
    /// Links scraped from a plain text search after the primary path gave up.
    Fallback,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => f.write_str("primary"),
            Self::Fallback => f.write_str("fallback"),
        }
    }
}

/// An unvalidated image reference returned by search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageCandidate {
    pub url: String,
    pub title: String,
    pub thumbnail_url: String,
    pub width: u32,
    pub height: u32,
    pub provenance: Provenance,
}

/// A candidate confirmed reachable, not blacklisted, and plausibly an image.
///
/// Only the validator constructs these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedCandidate(ImageCandidate);

impl ValidatedCandidate {
    pub(crate) fn new(candidate: ImageCandidate) -> Self {
        Self(candidate)
    }

    /// Returns the wrapped candidate.
    #[must_use]
    pub fn into_inner(self) -> ImageCandidate {
        self.0
    }
}

impl Deref for ValidatedCandidate {
    type Target = ImageCandidate;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// The oracle's pick among validated candidates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedImage {
    pub candidate: ValidatedCandidate,
    pub justification: String,
}

/// Linkage between a cluster view and its stored image. Insert-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredImageRecord {
    pub cluster_id: String,
    #[serde(rename = "image_url")]
    pub public_url: String,
    pub original_url: String,
    #[serde(rename = "view")]
    pub view_tag: String,
}

/// Terminal state of one item in a batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    /// An image was stored.
    Success,
    /// A stage produced nothing usable.
    Failed,
    /// A collaborator raised an error.
    Error,
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("success"),
            Self::Failed => f.write_str("failed"),
            Self::Error => f.write_str("error"),
        }
    }
}

/// Per-item record accumulated by batch processing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemOutcome {
    pub id: String,
    pub status: OutcomeStatus,
    #[serde(rename = "process_time_sec", serialize_with = "serialize_secs")]
    pub elapsed: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(rename = "error_message", skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ItemOutcome {
    #[must_use]
    pub fn success(id: impl Into<String>, elapsed: Duration, image_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: OutcomeStatus::Success,
            elapsed,
            image_url: Some(image_url.into()),
            error: None,
        }
    }

    #[must_use]
    pub fn failed(id: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            id: id.into(),
            status: OutcomeStatus::Failed,
            elapsed,
            image_url: None,
            error: None,
        }
    }

    #[must_use]
    pub fn error(id: impl Into<String>, elapsed: Duration, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: OutcomeStatus::Error,
            elapsed,
            image_url: None,
            error: Some(message.into()),
        }
    }

    /// Returns true when the item ended with a stored image.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }
}

fn serialize_secs<S: serde::Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    let rounded = (value.as_secs_f64() * 100.0).round() / 100.0;
    serializer.serialize_f64(rounded)
}
