//! Database connection and schema management.
//!
//! This module provides SQLite database connectivity with:
//! - Connection pool management
//! - WAL mode so progress checkpoints do not block queue reads
//! - Automatic migration execution
//!
//! # Example
//!
//! ```no_run
//! use romfetch_core::Database;
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new(Path::new("queue.db")).await?;
//! // Hand the database to a `QueueStore`...
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use thiserror::Error;
use tracing::instrument;

/// Default maximum number of connections in the pool.
/// Kept low for SQLite since it uses file-level locking.
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// SQLite busy timeout in milliseconds.
/// Connections will wait this long before returning SQLITE_BUSY.
const DEFAULT_BUSY_TIMEOUT_MS: u32 = 5000;

/// Database-related errors.
#[derive(Error, Debug)]
pub enum DbError {
    /// Failed to connect to the database.
    #[error("failed to connect to database: {0}")]
    Connection(#[from] sqlx::Error),

    /// Failed to run migrations.
    #[error("failed to run migrations: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Pool tuning knobs, usually sourced from the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatabaseOptions {
    /// Maximum pooled connections.
    pub max_connections: u32,
    /// Busy timeout applied to each connection.
    pub busy_timeout_ms: u32,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

/// Database connection wrapper with connection pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (creating if needed) the database at `db_path` with default options.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Connection` if the connection fails,
    /// or `DbError::Migration` if migrations fail.
    pub async fn new(db_path: &Path) -> Result<Self, DbError> {
        Self::new_with_options(db_path, &DatabaseOptions::default()).await
    }

    /// Opens the database at `db_path`, enables WAL and runs pending migrations.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Connection` if the connection fails,
    /// or `DbError::Migration` if migrations fail.
    #[instrument(skip(db_path, options), fields(path = %db_path.display()))]
    pub async fn new_with_options(
        db_path: &Path,
        options: &DatabaseOptions,
    ) -> Result<Self, DbError> {
        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

        let pool = SqlitePoolOptions::new()
            .max_connections(options.max_connections.max(1))
            .connect(&db_url)
            .await?;

        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&pool)
            .await?;

        sqlx::query(&format!("PRAGMA busy_timeout={}", options.busy_timeout_ms))
            .execute(&pool)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// Creates an in-memory database for testing.
    ///
    /// A single connection is used so every query sees the same memory database.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Connection` if the connection fails,
    /// or `DbError::Migration` if migrations fail.
    #[instrument]
    pub async fn new_in_memory() -> Result<Self, DbError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// Returns a reference to the underlying connection pool.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Checks if WAL mode is enabled.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Connection` if the query fails.
    #[instrument(skip(self))]
    pub async fn is_wal_enabled(&self) -> Result<bool, DbError> {
        let result: (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&self.pool)
            .await?;

        Ok(result.0.eq_ignore_ascii_case("wal"))
    }

    /// Gracefully closes all connections in the pool.
    #[instrument(skip(self))]
    pub async fn close(self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const INSERT_ROW: &str = "INSERT INTO download_queue \
        (game_id, remote_id, disc_id, download_url, file_name, display_title, platform_slug, temp_file_path, state) \
        VALUES (?, 1, ?, 'https://example.com/g.zip', 'g.zip', 'G', 'psx', '/tmp/g.zip.part', ?)";

    #[tokio::test]
    async fn test_database_new_in_memory_succeeds() {
        let db = Database::new_in_memory().await;
        assert!(db.is_ok(), "Failed to create in-memory database");
    }

    #[tokio::test]
    async fn test_database_download_queue_table_exists() {
        let db = Database::new_in_memory().await.unwrap();

        let result = sqlx::query(INSERT_ROW)
            .bind(1_i64)
            .bind(None::<i64>)
            .bind("queued")
            .execute(db.pool())
            .await;

        assert!(result.is_ok(), "download_queue should exist after migration");
    }

    #[tokio::test]
    async fn test_database_rejects_unknown_state() {
        let db = Database::new_in_memory().await.unwrap();

        let result = sqlx::query(INSERT_ROW)
            .bind(1_i64)
            .bind(None::<i64>)
            .bind("exploded")
            .execute(db.pool())
            .await;

        assert!(result.is_err(), "CHECK constraint should reject unknown state");
    }

    #[tokio::test]
    async fn test_database_rejects_second_unfinished_game_row() {
        let db = Database::new_in_memory().await.unwrap();

        for state in ["queued", "paused"] {
            let _ = sqlx::query(INSERT_ROW)
                .bind(7_i64)
                .bind(None::<i64>)
                .bind(state)
                .execute(db.pool())
                .await;
        }

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM download_queue WHERE game_id = 7")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count.0, 1, "partial unique index should keep one unfinished row");
    }

    #[tokio::test]
    async fn test_database_allows_new_row_after_completion() {
        let db = Database::new_in_memory().await.unwrap();

        sqlx::query(INSERT_ROW)
            .bind(7_i64)
            .bind(None::<i64>)
            .bind("completed")
            .execute(db.pool())
            .await
            .unwrap();
        let second = sqlx::query(INSERT_ROW)
            .bind(7_i64)
            .bind(None::<i64>)
            .bind("queued")
            .execute(db.pool())
            .await;

        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn test_database_disc_rows_do_not_collide_with_game_row() {
        let db = Database::new_in_memory().await.unwrap();

        for disc in [None, Some(100_i64), Some(101_i64)] {
            sqlx::query(INSERT_ROW)
                .bind(7_i64)
                .bind(disc)
                .bind("queued")
                .execute(db.pool())
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_database_with_tempfile_enables_wal() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let db = Database::new(&db_path).await.unwrap();
        assert!(db.is_wal_enabled().await.unwrap());
        db.close().await;
    }
}
