//! Queue module for download queue persistence.
//!
//! The persisted queue is the source of truth across restarts; the manager keeps
//! an in-memory mirror and writes every change back through [`QueueRepository`].
//!
//! # Overview
//!
//! - [`QueueStore`] - `SQLite`-backed store
//! - [`QueueEntry`] - one row, whole-game or disc sub-download
//! - [`DownloadState`] - entry lifecycle states
//! - [`QueueError`] - operation error types
//!
//! # Example
//!
//! ```ignore
//! use romfetch_core::queue::{DownloadState, QueueStore};
//! use romfetch_core::Database;
//!
//! let store = QueueStore::new(Database::new_in_memory().await?);
//! let entry = store.insert(&new_entry).await?;
//! store.update_state(entry.id, DownloadState::Downloading).await?;
//! store.update_progress(entry.id, 4096, 1_048_576).await?;
//! ```

mod entry;
mod error;
mod repository;

pub use entry::{DownloadState, NewQueueEntry, QueueEntry};
pub use error::{QueueDbErrorKind, QueueError};
pub use repository::QueueRepository;

use crate::db::Database;
use tracing::instrument;

/// Millisecond-resolution timestamp so FIFO ordering survives bursts of enqueues.
const NOW: &str = "strftime('%Y-%m-%d %H:%M:%f', 'now')";

/// Result type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;

/// Returns `Ok(())` if at least one row was affected; otherwise [`QueueError::EntryNotFound`].
fn check_affected(id: i64, rows_affected: u64) -> Result<()> {
    if rows_affected == 0 {
        Err(QueueError::EntryNotFound(id))
    } else {
        Ok(())
    }
}

/// `SQLite`-backed download queue.
#[derive(Debug, Clone)]
pub struct QueueStore {
    db: Database,
}

impl QueueStore {
    /// Creates a queue store over the given database connection.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Inserts a new row and returns it as stored.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the insert fails, including when a
    /// partial unique index rejects a duplicate unfinished download.
    #[instrument(skip(self, entry), fields(game_id = entry.game_id, disc_id = ?entry.disc_id))]
    pub async fn insert(&self, entry: &NewQueueEntry) -> Result<QueueEntry> {
        let temp_file_path = entry.temp_file_path.to_string_lossy();
        let row = sqlx::query_as::<_, QueueEntry>(&format!(
            r"INSERT INTO download_queue (
                game_id,
                remote_id,
                disc_id,
                disc_number,
                download_url,
                file_name,
                display_title,
                platform_slug,
                cover_path,
                bytes_downloaded,
                total_bytes,
                state,
                temp_file_path,
                created_at,
                updated_at
              )
              VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?, {NOW}, {NOW})
              RETURNING *"
        ))
        .bind(entry.game_id)
        .bind(entry.remote_id)
        .bind(entry.disc_id)
        .bind(entry.disc_number)
        .bind(&entry.download_url)
        .bind(&entry.file_name)
        .bind(&entry.display_title)
        .bind(&entry.platform_slug)
        .bind(entry.cover_path.as_deref())
        .bind(entry.total_bytes.max(0))
        .bind(entry.state.as_str())
        .bind(temp_file_path.as_ref())
        .fetch_one(self.db.pool())
        .await?;

        Ok(row)
    }

    /// Fetches a single row.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn get(&self, id: i64) -> Result<Option<QueueEntry>> {
        let row = sqlx::query_as::<_, QueueEntry>("SELECT * FROM download_queue WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(row)
    }

    /// Lists every row in enqueue order.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn list_all(&self) -> Result<Vec<QueueEntry>> {
        let rows = sqlx::query_as::<_, QueueEntry>(
            "SELECT * FROM download_queue ORDER BY created_at ASC, id ASC",
        )
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows)
    }

    /// Lists rows in one state, in enqueue order.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the query fails.
    #[instrument(skip(self), fields(state = %state))]
    pub async fn list_by_state(&self, state: DownloadState) -> Result<Vec<QueueEntry>> {
        let rows = sqlx::query_as::<_, QueueEntry>(
            "SELECT * FROM download_queue WHERE state = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(state.as_str())
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows)
    }

    /// Counts rows in one state.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the query fails.
    #[instrument(skip(self), fields(state = %state))]
    pub async fn count_by_state(&self, state: DownloadState) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM download_queue WHERE state = ?")
            .bind(state.as_str())
            .fetch_one(self.db.pool())
            .await?;
        Ok(count.0)
    }

    /// Finds the unfinished whole-game row for `game_id`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn find_unfinished_for_game(&self, game_id: i64) -> Result<Option<QueueEntry>> {
        let row = sqlx::query_as::<_, QueueEntry>(
            r"SELECT * FROM download_queue
              WHERE game_id = ? AND disc_id IS NULL
                AND state NOT IN ('completed', 'cancelled')
              LIMIT 1",
        )
        .bind(game_id)
        .fetch_optional(self.db.pool())
        .await?;
        Ok(row)
    }

    /// Finds the unfinished sub-download row for `disc_id`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn find_unfinished_for_disc(&self, disc_id: i64) -> Result<Option<QueueEntry>> {
        let row = sqlx::query_as::<_, QueueEntry>(
            r"SELECT * FROM download_queue
              WHERE disc_id = ? AND state NOT IN ('completed', 'cancelled')
              LIMIT 1",
        )
        .bind(disc_id)
        .fetch_optional(self.db.pool())
        .await?;
        Ok(row)
    }

    /// Moves a row to `state`, clearing any stale failure reason.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::EntryNotFound`] if no row exists with the given id.
    /// Returns [`QueueError::Database`] if the update fails.
    #[instrument(skip(self), fields(state = %state))]
    pub async fn update_state(&self, id: i64, state: DownloadState) -> Result<()> {
        let result = sqlx::query(&format!(
            r"UPDATE download_queue
              SET state = ?, error_reason = NULL, updated_at = {NOW}
              WHERE id = ?"
        ))
        .bind(state.as_str())
        .bind(id)
        .execute(self.db.pool())
        .await?;

        check_affected(id, result.rows_affected())
    }

    /// Persists a progress checkpoint.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::EntryNotFound`] if no row exists with the given id.
    /// Returns [`QueueError::Database`] if the update fails.
    #[instrument(skip(self))]
    pub async fn update_progress(
        &self,
        id: i64,
        bytes_downloaded: i64,
        total_bytes: i64,
    ) -> Result<()> {
        let result = sqlx::query(&format!(
            r"UPDATE download_queue
              SET bytes_downloaded = ?, total_bytes = ?, updated_at = {NOW}
              WHERE id = ?"
        ))
        .bind(bytes_downloaded.max(0))
        .bind(total_bytes.max(0))
        .bind(id)
        .execute(self.db.pool())
        .await?;

        check_affected(id, result.rows_affected())
    }

    /// Marks a row FAILED with a human-readable reason.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::EntryNotFound`] if no row exists with the given id.
    /// Returns [`QueueError::Database`] if the update fails.
    #[instrument(skip(self), fields(reason = %reason))]
    pub async fn mark_failed(&self, id: i64, reason: &str) -> Result<()> {
        let result = sqlx::query(&format!(
            r"UPDATE download_queue
              SET state = ?, error_reason = ?, updated_at = {NOW}
              WHERE id = ?"
        ))
        .bind(DownloadState::Failed.as_str())
        .bind(reason)
        .bind(id)
        .execute(self.db.pool())
        .await?;

        check_affected(id, result.rows_affected())
    }

    /// Marks a row COMPLETED and records its final byte count.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::EntryNotFound`] if no row exists with the given id.
    /// Returns [`QueueError::Database`] if the update fails.
    #[instrument(skip(self))]
    pub async fn mark_completed(&self, id: i64, bytes_downloaded: i64) -> Result<()> {
        let result = sqlx::query(&format!(
            r"UPDATE download_queue
              SET state = ?, error_reason = NULL, bytes_downloaded = ?,
                  total_bytes = MAX(total_bytes, ?), updated_at = {NOW}
              WHERE id = ?"
        ))
        .bind(DownloadState::Completed.as_str())
        .bind(bytes_downloaded.max(0))
        .bind(bytes_downloaded.max(0))
        .bind(id)
        .execute(self.db.pool())
        .await?;

        check_affected(id, result.rows_affected())
    }

    /// Deletes a row.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::EntryNotFound`] if no row exists with the given id.
    /// Returns [`QueueError::Database`] if the delete fails.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM download_queue WHERE id = ?")
            .bind(id)
            .execute(self.db.pool())
            .await?;

        check_affected(id, result.rows_affected())
    }

    /// Resets rows interrupted mid-download or mid-extraction back to QUEUED.
    ///
    /// Returns the number of rows reset.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the update fails.
    #[instrument(skip(self))]
    pub async fn reset_interrupted(&self) -> Result<u64> {
        let result = sqlx::query(&format!(
            r"UPDATE download_queue
              SET state = ?, updated_at = {NOW}
              WHERE state IN (?, ?)"
        ))
        .bind(DownloadState::Queued.as_str())
        .bind(DownloadState::Downloading.as_str())
        .bind(DownloadState::Extracting.as_str())
        .execute(self.db.pool())
        .await?;

        Ok(result.rows_affected())
    }

    /// Deletes every COMPLETED row and returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the delete fails.
    #[instrument(skip(self))]
    pub async fn clear_completed(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM download_queue WHERE state = ?")
            .bind(DownloadState::Completed.as_str())
            .execute(self.db.pool())
            .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    async fn store() -> QueueStore {
        QueueStore::new(Database::new_in_memory().await.unwrap())
    }

    fn new_entry(game_id: i64, disc_id: Option<i64>) -> NewQueueEntry {
        NewQueueEntry {
            game_id,
            remote_id: game_id * 10,
            disc_id,
            disc_number: disc_id.map(|_| 1),
            download_url: format!("https://example.com/{game_id}.zip"),
            file_name: format!("{game_id}.zip"),
            display_title: format!("Game {game_id}"),
            platform_slug: "psx".to_string(),
            cover_path: None,
            total_bytes: 2048,
            state: DownloadState::Queued,
            temp_file_path: PathBuf::from(format!("/roms/psx/{game_id}.zip.part")),
        }
    }

    // ==================== Insert / Get Tests ====================

    #[tokio::test]
    async fn test_insert_returns_stored_row() {
        let store = store().await;
        let entry = store.insert(&new_entry(1, None)).await.unwrap();

        assert!(entry.id > 0);
        assert_eq!(entry.state(), DownloadState::Queued);
        assert_eq!(entry.bytes_downloaded, 0);
        assert_eq!(entry.total_bytes, 2048);
        assert_eq!(entry.temp_file_path, "/roms/psx/1.zip.part");

        let fetched = store.get(entry.id).await.unwrap().unwrap();
        assert_eq!(fetched, entry);
    }

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let store = store().await;
        assert!(store.get(999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insert_duplicate_unfinished_game_is_constraint_violation() {
        let store = store().await;
        store.insert(&new_entry(1, None)).await.unwrap();

        let err = store.insert(&new_entry(1, None)).await.unwrap_err();
        assert!(err.is_constraint_violation(), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn test_list_all_preserves_insert_order() {
        let store = store().await;
        for game_id in [3, 1, 2] {
            store.insert(&new_entry(game_id, None)).await.unwrap();
        }

        let ids: Vec<i64> = store
            .list_all()
            .await
            .unwrap()
            .iter()
            .map(|e| e.game_id)
            .collect();
        assert_eq!(ids, vec![3, 1, 2]);
    }

    // ==================== Lookup Tests ====================

    #[tokio::test]
    async fn test_find_unfinished_for_game_ignores_completed() {
        let store = store().await;
        let entry = store.insert(&new_entry(5, None)).await.unwrap();
        assert!(store.find_unfinished_for_game(5).await.unwrap().is_some());

        store.mark_completed(entry.id, 2048).await.unwrap();
        assert!(store.find_unfinished_for_game(5).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_unfinished_for_disc_is_scoped_to_disc() {
        let store = store().await;
        store.insert(&new_entry(5, Some(50))).await.unwrap();

        assert!(store.find_unfinished_for_disc(50).await.unwrap().is_some());
        assert!(store.find_unfinished_for_disc(51).await.unwrap().is_none());
        assert!(store.find_unfinished_for_game(5).await.unwrap().is_none());
    }

    // ==================== Update Tests ====================

    #[tokio::test]
    async fn test_mark_failed_then_update_state_clears_reason() {
        let store = store().await;
        let entry = store.insert(&new_entry(1, None)).await.unwrap();

        store.mark_failed(entry.id, "HTTP 503 downloading").await.unwrap();
        let failed = store.get(entry.id).await.unwrap().unwrap();
        assert_eq!(failed.state(), DownloadState::Failed);
        assert_eq!(failed.error_reason.as_deref(), Some("HTTP 503 downloading"));

        store.update_state(entry.id, DownloadState::Queued).await.unwrap();
        let requeued = store.get(entry.id).await.unwrap().unwrap();
        assert_eq!(requeued.state(), DownloadState::Queued);
        assert!(requeued.error_reason.is_none());
    }

    #[tokio::test]
    async fn test_update_progress_persists_bytes() {
        let store = store().await;
        let entry = store.insert(&new_entry(1, None)).await.unwrap();

        store.update_progress(entry.id, 1024, 4096).await.unwrap();
        let row = store.get(entry.id).await.unwrap().unwrap();
        assert_eq!(row.bytes_downloaded, 1024);
        assert_eq!(row.total_bytes, 4096);
    }

    #[tokio::test]
    async fn test_updates_on_missing_row_return_not_found() {
        let store = store().await;

        assert!(matches!(
            store.update_state(77, DownloadState::Paused).await,
            Err(QueueError::EntryNotFound(77))
        ));
        assert!(matches!(
            store.update_progress(77, 1, 1).await,
            Err(QueueError::EntryNotFound(77))
        ));
        assert!(matches!(store.delete(77).await, Err(QueueError::EntryNotFound(77))));
    }

    #[tokio::test]
    async fn test_mark_completed_raises_total_to_final_size() {
        let store = store().await;
        let mut new = new_entry(1, None);
        new.total_bytes = 0;
        let entry = store.insert(&new).await.unwrap();

        store.mark_completed(entry.id, 10_485_760).await.unwrap();
        let row = store.get(entry.id).await.unwrap().unwrap();
        assert_eq!(row.state(), DownloadState::Completed);
        assert_eq!(row.bytes_downloaded, 10_485_760);
        assert_eq!(row.total_bytes, 10_485_760);
    }

    // ==================== Recovery Tests ====================

    #[tokio::test]
    async fn test_reset_interrupted_requeues_active_rows_only() {
        let store = store().await;
        let downloading = store.insert(&new_entry(1, None)).await.unwrap();
        let extracting = store.insert(&new_entry(2, None)).await.unwrap();
        let paused = store.insert(&new_entry(3, None)).await.unwrap();
        store
            .update_state(downloading.id, DownloadState::Downloading)
            .await
            .unwrap();
        store
            .update_state(extracting.id, DownloadState::Extracting)
            .await
            .unwrap();
        store.update_state(paused.id, DownloadState::Paused).await.unwrap();

        assert_eq!(store.reset_interrupted().await.unwrap(), 2);
        assert_eq!(store.count_by_state(DownloadState::Queued).await.unwrap(), 2);
        assert_eq!(store.count_by_state(DownloadState::Paused).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_clear_completed_removes_only_completed() {
        let store = store().await;
        let done = store.insert(&new_entry(1, None)).await.unwrap();
        store.insert(&new_entry(2, None)).await.unwrap();
        store.mark_completed(done.id, 2048).await.unwrap();

        assert_eq!(store.clear_completed().await.unwrap(), 1);
        let remaining = store.list_all().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].game_id, 2);
    }

    #[tokio::test]
    async fn test_list_by_state_filters() {
        let store = store().await;
        let a = store.insert(&new_entry(1, None)).await.unwrap();
        store.insert(&new_entry(2, None)).await.unwrap();
        store.mark_failed(a.id, "boom").await.unwrap();

        let failed = store.list_by_state(DownloadState::Failed).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, a.id);
    }
}
