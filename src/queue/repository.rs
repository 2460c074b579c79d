//! Repository seam for queue persistence.
//!
//! The manager depends on this trait rather than on [`QueueStore`] so tests and
//! embedders can supply their own persistence.

use async_trait::async_trait;

use super::{DownloadState, NewQueueEntry, QueueEntry, QueueStore, Result};

/// Data-access contract for the download queue.
#[async_trait]
pub trait QueueRepository: Send + Sync {
    /// Inserts a new row and returns it as stored.
    async fn insert(&self, entry: &NewQueueEntry) -> Result<QueueEntry>;

    /// Fetches one row.
    async fn get(&self, id: i64) -> Result<Option<QueueEntry>>;

    /// Lists every row in enqueue order.
    async fn list_all(&self) -> Result<Vec<QueueEntry>>;

    /// Finds the unfinished whole-game row for a game.
    async fn find_unfinished_for_game(&self, game_id: i64) -> Result<Option<QueueEntry>>;

    /// Finds the unfinished sub-download row for a disc.
    async fn find_unfinished_for_disc(&self, disc_id: i64) -> Result<Option<QueueEntry>>;

    /// Moves a row to a new state and clears its failure reason.
    async fn update_state(&self, id: i64, state: DownloadState) -> Result<()>;

    /// Persists a progress checkpoint.
    async fn update_progress(&self, id: i64, bytes_downloaded: i64, total_bytes: i64)
    -> Result<()>;

    /// Marks a row FAILED with a reason.
    async fn mark_failed(&self, id: i64, reason: &str) -> Result<()>;

    /// Marks a row COMPLETED.
    async fn mark_completed(&self, id: i64, bytes_downloaded: i64) -> Result<()>;

    /// Deletes a row.
    async fn delete(&self, id: i64) -> Result<()>;

    /// Resets DOWNLOADING/EXTRACTING rows to QUEUED.
    async fn reset_interrupted(&self) -> Result<u64>;

    /// Deletes COMPLETED rows.
    async fn clear_completed(&self) -> Result<u64>;
}

#[async_trait]
impl QueueRepository for QueueStore {
    async fn insert(&self, entry: &NewQueueEntry) -> Result<QueueEntry> {
        QueueStore::insert(self, entry).await
    }

    async fn get(&self, id: i64) -> Result<Option<QueueEntry>> {
        QueueStore::get(self, id).await
    }

    async fn list_all(&self) -> Result<Vec<QueueEntry>> {
        QueueStore::list_all(self).await
    }

    async fn find_unfinished_for_game(&self, game_id: i64) -> Result<Option<QueueEntry>> {
        QueueStore::find_unfinished_for_game(self, game_id).await
    }

    async fn find_unfinished_for_disc(&self, disc_id: i64) -> Result<Option<QueueEntry>> {
        QueueStore::find_unfinished_for_disc(self, disc_id).await
    }

    async fn update_state(&self, id: i64, state: DownloadState) -> Result<()> {
        QueueStore::update_state(self, id, state).await
    }

    async fn update_progress(
        &self,
        id: i64,
        bytes_downloaded: i64,
        total_bytes: i64,
    ) -> Result<()> {
        QueueStore::update_progress(self, id, bytes_downloaded, total_bytes).await
    }

    async fn mark_failed(&self, id: i64, reason: &str) -> Result<()> {
        QueueStore::mark_failed(self, id, reason).await
    }

    async fn mark_completed(&self, id: i64, bytes_downloaded: i64) -> Result<()> {
        QueueStore::mark_completed(self, id, bytes_downloaded).await
    }

    async fn delete(&self, id: i64) -> Result<()> {
        QueueStore::delete(self, id).await
    }

    async fn reset_interrupted(&self) -> Result<u64> {
        QueueStore::reset_interrupted(self).await
    }

    async fn clear_completed(&self) -> Result<u64> {
        QueueStore::clear_completed(self).await
    }
}
