//! Application configuration.
//!
//! Settings come from a TOML file when one is present and fall back to
//! built-in defaults otherwise. Credentials never live in the file: they are
//! read once from the environment into [`Credentials`] and handed to the
//! collaborators that need them.
//!
//! Every configured table names its view tag explicitly:
//!
//! ```toml
//! default_table = "cluster_summary"
//!
//! [tables.cluster_coach_view]
//! view = "coach"
//!
//! [tables.cluster_summary]
//! view = "summary"
//! has_image_column = "hasImage"
//! ```

use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

/// Identifiers interpolated into SQL and PostgREST paths must match this.
#[allow(clippy::expect_used)]
static IDENTIFIER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier regex is valid") // Static pattern, safe to panic
});

/// Highest retry budget accepted for any stage.
const MAX_RETRY_BUDGET: u32 = 10;

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config value for `{field}`: {reason}")]
    Invalid { field: String, reason: String },

    #[error("missing environment variable {name} (required for {purpose})")]
    MissingCredential {
        name: &'static str,
        purpose: &'static str,
    },
}

impl ConfigError {
    fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// A content table the pipeline may illustrate.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableSpec {
    /// Table name; filled from the config key.
    #[serde(skip)]
    pub name: String,
    /// Semantic label recorded with stored images ("coach", "team", ...).
    pub view: String,
    #[serde(default = "default_id_column")]
    pub id_column: String,
    #[serde(default = "default_content_column")]
    pub content_column: String,
    #[serde(default = "default_has_image_column")]
    pub has_image_column: String,
}

impl TableSpec {
    /// Creates a spec with the conventional column names.
    #[must_use]
    pub fn new(name: impl Into<String>, view: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            view: view.into(),
            id_column: default_id_column(),
            content_column: default_content_column(),
            has_image_column: default_has_image_column(),
        }
    }
}

fn default_id_column() -> String {
    "id".to_string()
}

fn default_content_column() -> String {
    "content".to_string()
}

fn default_has_image_column() -> String {
    "hasImage".to_string()
}

/// Where content rows live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentBackend {
    Supabase,
    Sqlite,
}

/// Where image bytes are uploaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlobBackend {
    Supabase,
    Filesystem,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackendSettings {
    pub content: ContentBackend,
    pub sqlite_path: PathBuf,
    pub blob: BlobBackend,
    pub blob_root: PathBuf,
    pub blob_public_base_url: String,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            content: ContentBackend::Supabase,
            sqlite_path: PathBuf::from("illustrator.db"),
            blob: BlobBackend::Supabase,
            blob_root: PathBuf::from("images"),
            blob_public_base_url: "http://localhost:8000".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SearchSettings {
    /// Smallest width and height (inclusive) a raw hit may have.
    pub min_dimension: u32,
    pub target_count: usize,
    pub max_retries: u32,
    /// Budgets for the single shortened-query retry after an empty search.
    pub degraded_target_count: usize,
    pub degraded_max_retries: u32,
    pub base_url: String,
    pub html_base_url: String,
    pub timeout_secs: u64,
    /// Case-insensitive substrings that disqualify a candidate URL.
    pub blacklist: Vec<String>,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            min_dimension: 100,
            target_count: 20,
            max_retries: 3,
            degraded_target_count: 15,
            degraded_max_retries: 2,
            base_url: "https://duckduckgo.com".to_string(),
            html_base_url: "https://html.duckduckgo.com".to_string(),
            timeout_secs: 20,
            blacklist: [
                "lookaside.instagram.com",
                "gettyimages.com",
                "shutterstock.com",
                "istockphoto.com",
                "tiktok.com/",
                "fanatics.com",
                "static.nike.com",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ValidationSettings {
    /// Extra candidates validated beyond what the oracle is shown.
    pub headroom: usize,
    pub timeout_secs: u64,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            headroom: 5,
            timeout_secs: 10,
        }
    }
}

/// A harm category threshold forwarded to the oracle unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SafetySetting {
    pub category: String,
    pub threshold: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RankingSettings {
    pub model: String,
    pub api_base_url: String,
    pub timeout_secs: u64,
    /// Character ceiling for text sent to query generation.
    pub query_char_limit: usize,
    /// Character ceiling for the snippet sent with the selection prompt.
    pub selection_char_limit: usize,
    pub candidates_for_selection: usize,
    pub desired_min_width: u32,
    pub desired_min_height: u32,
    pub safety: Vec<SafetySetting>,
}

impl Default for RankingSettings {
    fn default() -> Self {
        Self {
            model: "gemini-1.5-flash-latest".to_string(),
            api_base_url: "https://generativelanguage.googleapis.com".to_string(),
            timeout_secs: 60,
            query_char_limit: 15_000,
            selection_char_limit: 4_000,
            candidates_for_selection: 7,
            desired_min_width: 1200,
            desired_min_height: 400,
            safety: [
                "HARM_CATEGORY_HARASSMENT",
                "HARM_CATEGORY_HATE_SPEECH",
                "HARM_CATEGORY_SEXUALLY_EXPLICIT",
                "HARM_CATEGORY_DANGEROUS_CONTENT",
            ]
            .into_iter()
            .map(|category| SafetySetting {
                category: category.to_string(),
                threshold: "BLOCK_NONE".to_string(),
            })
            .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageSettings {
    pub bucket: String,
    pub download_max_retries: u32,
    pub download_timeout_secs: u64,
    /// Payloads below this size are logged as suspicious.
    pub small_payload_bytes: usize,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            bucket: "images".to_string(),
            download_max_retries: 1,
            download_timeout_secs: 15,
            small_payload_bytes: 500,
        }
    }
}

/// Full application configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    /// Table read by `process` when no table is given.
    pub default_table: String,
    /// Insert-only table holding stored image linkage.
    pub image_records_table: String,
    pub backend: BackendSettings,
    pub search: SearchSettings,
    pub validation: ValidationSettings,
    pub ranking: RankingSettings,
    pub storage: StorageSettings,
    pub tables: BTreeMap<String, TableSpec>,
}

impl Default for AppConfig {
    fn default() -> Self {
        let tables = [
            ("cluster_coach_view", "coach"),
            ("cluster_dynamic_view", "dynamic"),
            ("cluster_franchise_view", "franchise"),
            ("cluster_player_view", "player"),
            ("cluster_team_view", "team"),
            ("cluster_summary", "summary"),
        ]
        .into_iter()
        .map(|(name, view)| (name.to_string(), TableSpec::new(name, view)))
        .collect();

        Self {
            default_table: "cluster_summary".to_string(),
            image_records_table: "cluster_images".to_string(),
            backend: BackendSettings::default(),
            search: SearchSettings::default(),
            validation: ValidationSettings::default(),
            ranking: RankingSettings::default(),
            storage: StorageSettings::default(),
            tables,
        }
    }
}

impl AppConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] on malformed TOML or a table without a
    /// view tag, and [`ConfigError::Invalid`] when validation fails.
    pub fn from_toml_str(raw: &str, origin: &Path) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        for (name, spec) in &mut config.tables {
            spec.name.clone_from(name);
        }
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw, path)
    }

    /// Looks up a configured table.
    #[must_use]
    pub fn table(&self, name: &str) -> Option<&TableSpec> {
        self.tables.get(name)
    }

    /// Names of all configured tables, sorted.
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// How many candidates the validator should accumulate.
    #[must_use]
    pub fn max_validated(&self) -> usize {
        self.ranking.candidates_for_selection + self.validation.headroom
    }

    /// Checks cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tables.is_empty() {
            return Err(ConfigError::invalid("tables", "at least one table is required"));
        }
        if !self.tables.contains_key(&self.default_table) {
            return Err(ConfigError::invalid(
                "default_table",
                format!("'{}' is not a configured table", self.default_table),
            ));
        }
        validate_identifier("image_records_table", &self.image_records_table)?;
        for (name, spec) in &self.tables {
            validate_identifier("tables", name)?;
            validate_identifier(&format!("tables.{name}.id_column"), &spec.id_column)?;
            validate_identifier(&format!("tables.{name}.content_column"), &spec.content_column)?;
            validate_identifier(
                &format!("tables.{name}.has_image_column"),
                &spec.has_image_column,
            )?;
            if spec.view.trim().is_empty() {
                return Err(ConfigError::invalid(
                    format!("tables.{name}.view"),
                    "view tag must not be empty",
                ));
            }
        }

        if self.search.min_dimension == 0 {
            return Err(ConfigError::invalid("search.min_dimension", "must be at least 1"));
        }
        if self.search.target_count == 0 || self.search.degraded_target_count == 0 {
            return Err(ConfigError::invalid("search.target_count", "must be at least 1"));
        }
        validate_retry_budget("search.max_retries", self.search.max_retries)?;
        validate_retry_budget("search.degraded_max_retries", self.search.degraded_max_retries)?;
        validate_retry_budget(
            "storage.download_max_retries",
            self.storage.download_max_retries,
        )?;
        if self.ranking.candidates_for_selection == 0 {
            return Err(ConfigError::invalid(
                "ranking.candidates_for_selection",
                "must be at least 1",
            ));
        }
        if self.storage.bucket.trim().is_empty() {
            return Err(ConfigError::invalid("storage.bucket", "must not be empty"));
        }
        Ok(())
    }
}

fn validate_identifier(field: &str, value: &str) -> Result<(), ConfigError> {
    if IDENTIFIER_PATTERN.is_match(value) {
        Ok(())
    } else {
        Err(ConfigError::invalid(
            field,
            format!("'{value}' is not a plain identifier"),
        ))
    }
}

fn validate_retry_budget(field: &str, value: u32) -> Result<(), ConfigError> {
    if value > MAX_RETRY_BUDGET {
        return Err(ConfigError::invalid(
            field,
            format!("{value} exceeds {MAX_RETRY_BUDGET}"),
        ));
    }
    Ok(())
}

/// Loaded config plus where it came from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: AppConfig,
    /// File the config was read from; `None` for built-in defaults.
    pub path: Option<PathBuf>,
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/illustrator/config.toml`
/// 2. `$HOME/.config/illustrator/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("illustrator")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("illustrator")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads configuration from an explicit path, the default path, or defaults.
///
/// An explicit path must exist; a missing default file is not an error.
///
/// # Errors
///
/// Returns [`ConfigError`] when a file exists but is unreadable or invalid.
pub fn load_config(explicit: Option<&Path>) -> Result<LoadedConfig, ConfigError> {
    if let Some(path) = explicit {
        return Ok(LoadedConfig {
            config: AppConfig::from_file(path)?,
            path: Some(path.to_path_buf()),
        });
    }

    match resolve_default_config_path() {
        Some(path) if path.exists() => Ok(LoadedConfig {
            config: AppConfig::from_file(&path)?,
            path: Some(path),
        }),
        _ => Ok(LoadedConfig {
            config: AppConfig::default(),
            path: None,
        }),
    }
}

/// Secrets read once at startup.
#[derive(Clone, Default)]
pub struct Credentials {
    pub supabase_url: Option<String>,
    pub supabase_key: Option<String>,
    pub gemini_api_key: Option<String>,
}

impl Credentials {
    /// Reads `SUPABASE_URL`, `SUPABASE_KEY` and `GEMINI_API_KEY`.
    #[must_use]
    pub fn from_env() -> Self {
        let read = |name: &str| {
            env::var(name)
                .ok()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        Self {
            supabase_url: read("SUPABASE_URL"),
            supabase_key: read("SUPABASE_KEY"),
            gemini_api_key: read("GEMINI_API_KEY"),
        }
    }

    /// Returns the Supabase URL and key.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingCredential`] naming the absent variable.
    pub fn supabase(&self, purpose: &'static str) -> Result<(&str, &str), ConfigError> {
        let url = self
            .supabase_url
            .as_deref()
            .ok_or(ConfigError::MissingCredential {
                name: "SUPABASE_URL",
                purpose,
            })?;
        let key = self
            .supabase_key
            .as_deref()
            .ok_or(ConfigError::MissingCredential {
                name: "SUPABASE_KEY",
                purpose,
            })?;
        Ok((url, key))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("supabase_url", &self.supabase_url)
            .field("supabase_key", &self.supabase_key.as_ref().map(|_| "<redacted>"))
            .field(
                "gemini_api_key",
                &self.gemini_api_key.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// Converts a seconds setting into a timeout.
#[must_use]
pub fn secs(value: u64) -> Duration {
    Duration::from_secs(value)
}
