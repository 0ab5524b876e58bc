//! Local SQLite database for offline runs.
//!
//! Mirrors the hosted content tables and the image linkage table so the
//! pipeline can run without network access to the datastore. The schema
//! lives in `migrations/` and is embedded at build time.
//!
//! # Example
//!
//! ```no_run
//! use illustrator_core::Database;
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new(Path::new("illustrator.db")).await?;
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use thiserror::Error;
use tracing::{debug, instrument};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// The pipeline is sequential; a few connections cover the store plus tests
/// that inspect tables alongside it.
const MAX_CONNECTIONS: u32 = 4;

/// How long a writer waits on a locked database file.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors opening the local database.
#[derive(Error, Debug)]
pub enum DbError {
    /// The database file could not be opened or created.
    #[error("cannot open content database at {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: sqlx::Error,
    },

    /// The content schema could not be applied.
    #[error("cannot apply content schema: {0}")]
    Schema(#[from] sqlx::migrate::MigrateError),
}

/// Pooled handle to the local content database.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (creating if needed) the database at `db_path` and applies the
    /// content schema.
    ///
    /// The file runs in WAL mode with a busy timeout, so another process can
    /// read it during a batch.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Open`] if the file cannot be opened and
    /// [`DbError::Schema`] if the schema cannot be applied.
    #[instrument(skip(db_path), fields(path = %db_path.display()))]
    pub async fn new(db_path: &Path) -> Result<Self, DbError> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await
            .map_err(|source| DbError::Open {
                path: db_path.to_path_buf(),
                source,
            })?;
        Self::with_schema(pool).await
    }

    /// Opens a private in-memory database with the content schema.
    ///
    /// Limited to one connection, since each in-memory connection is its own
    /// database.
    ///
    /// # Errors
    ///
    /// See [`Database::new`].
    #[instrument]
    pub async fn new_in_memory() -> Result<Self, DbError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(SqliteConnectOptions::new().in_memory(true))
            .await
            .map_err(|source| DbError::Open {
                path: PathBuf::from(":memory:"),
                source,
            })?;
        Self::with_schema(pool).await
    }

    async fn with_schema(pool: SqlitePool) -> Result<Self, DbError> {
        MIGRATOR.run(&pool).await?;
        debug!(migrations = MIGRATOR.iter().count(), "content schema ready");
        Ok(Self { pool })
    }

    /// The underlying pool, for sqlx queries.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const CONTENT_TABLES: [&str; 6] = [
        "cluster_coach_view",
        "cluster_dynamic_view",
        "cluster_franchise_view",
        "cluster_player_view",
        "cluster_team_view",
        "cluster_summary",
    ];

    async fn insert_into_every_content_table(db: &Database) {
        for table in CONTENT_TABLES {
            let result = sqlx::query(&format!(
                "INSERT INTO {table} (id, content, cluster_id) VALUES ('1', 'text', 'c1')"
            ))
            .execute(db.pool())
            .await;
            assert!(result.is_ok(), "{table} should exist after migration");
        }
    }

    // ==================== Schema Tests ====================

    #[tokio::test]
    async fn test_database_content_tables_exist() {
        let db = Database::new_in_memory().await.unwrap();
        insert_into_every_content_table(&db).await;
    }

    #[tokio::test]
    async fn test_database_has_image_defaults_to_false() {
        let db = Database::new_in_memory().await.unwrap();
        sqlx::query("INSERT INTO cluster_summary (id, content) VALUES ('7', 'text')")
            .execute(db.pool())
            .await
            .unwrap();

        let (flag,): (i64,) = sqlx::query_as("SELECT \"hasImage\" FROM cluster_summary WHERE id = '7'")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(flag, 0);
    }

    #[tokio::test]
    async fn test_database_image_records_require_view() {
        let db = Database::new_in_memory().await.unwrap();

        let result = sqlx::query(
            "INSERT INTO cluster_images (cluster_id, image_url, original_url) VALUES ('c1', 'u', 'o')",
        )
        .execute(db.pool())
        .await;

        assert!(result.is_err(), "image records without a view should be rejected");
    }

    // ==================== File-Backed Tests ====================

    #[tokio::test]
    async fn test_database_file_is_created_with_schema() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("content.db");

        let db = Database::new(&db_path).await.unwrap();
        assert!(db_path.exists());
        insert_into_every_content_table(&db).await;

        let (mode,): (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[tokio::test]
    async fn test_database_reopen_keeps_rows() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("content.db");

        let db = Database::new(&db_path).await.unwrap();
        sqlx::query("INSERT INTO cluster_summary (id, content) VALUES ('9', 'kept')")
            .execute(db.pool())
            .await
            .unwrap();
        drop(db);

        let reopened = Database::new(&db_path).await.unwrap();
        let (content,): (String,) = sqlx::query_as("SELECT content FROM cluster_summary WHERE id = '9'")
            .fetch_one(reopened.pool())
            .await
            .unwrap();
        assert_eq!(content, "kept");
    }

    #[tokio::test]
    async fn test_database_unopenable_path_reports_path() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("missing-dir").join("content.db");

        let error = Database::new(&db_path).await.unwrap_err();
        assert!(matches!(error, DbError::Open { .. }));
        assert!(error.to_string().contains("missing-dir"));
    }
}
