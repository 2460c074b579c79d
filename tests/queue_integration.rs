//! Integration tests for the queue module.
//!
//! These tests verify QueueStore operations against a real SQLite file,
//! including what survives closing and reopening the database.

use std::path::PathBuf;

use romfetch_core::{Database, DownloadState, QueueError, QueueStore};
use romfetch_core::queue::NewQueueEntry;
use tempfile::TempDir;

/// Helper to create a test database with migrations applied.
async fn setup_test_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db = Database::new(&temp_dir.path().join("queue.db"))
        .await
        .expect("Failed to create database");
    (db, temp_dir)
}

async fn reopen(temp_dir: &TempDir) -> QueueStore {
    let db = Database::new(&temp_dir.path().join("queue.db"))
        .await
        .expect("Failed to reopen database");
    QueueStore::new(db)
}

fn new_entry(game_id: i64, disc_id: Option<i64>) -> NewQueueEntry {
    let file_name = format!("game{game_id}-{}.chd", disc_id.unwrap_or(0));
    NewQueueEntry {
        game_id,
        remote_id: game_id + 1000,
        disc_id,
        disc_number: disc_id.map(|_| 1),
        download_url: format!("https://example.com/{file_name}"),
        temp_file_path: PathBuf::from("/roms/psx").join(format!("{file_name}.part")),
        file_name,
        display_title: format!("Game {game_id}"),
        platform_slug: "psx".to_string(),
        cover_path: None,
        total_bytes: 4096,
        state: DownloadState::Queued,
    }
}

#[tokio::test]
async fn test_file_database_uses_wal() {
    let (db, _temp_dir) = setup_test_db().await;
    assert!(db.is_wal_enabled().await.expect("pragma query"));
}

#[tokio::test]
async fn test_entries_and_progress_survive_reopen() {
    let (db, temp_dir) = setup_test_db().await;
    let store = QueueStore::new(db.clone());
    let entry = store.insert(&new_entry(1, None)).await.expect("insert");
    store
        .update_progress(entry.id, 1024, 4096)
        .await
        .expect("progress");
    store
        .update_state(entry.id, DownloadState::Paused)
        .await
        .expect("pause");
    db.close().await;

    let store = reopen(&temp_dir).await;
    let stored = store.get(entry.id).await.expect("get").expect("row exists");
    assert_eq!(stored.state(), DownloadState::Paused);
    assert_eq!(stored.bytes_downloaded, 1024);
    assert_eq!(stored.total_bytes, 4096);
    assert_eq!(stored.remaining_bytes(), 3072);
}

#[tokio::test]
async fn test_interrupted_rows_are_requeued_after_restart() {
    let (db, temp_dir) = setup_test_db().await;
    let store = QueueStore::new(db.clone());
    let downloading = store.insert(&new_entry(1, None)).await.expect("insert");
    let extracting = store.insert(&new_entry(2, None)).await.expect("insert");
    let paused = store.insert(&new_entry(3, None)).await.expect("insert");
    store
        .update_state(downloading.id, DownloadState::Downloading)
        .await
        .expect("state");
    store
        .update_state(extracting.id, DownloadState::Extracting)
        .await
        .expect("state");
    store
        .update_state(paused.id, DownloadState::Paused)
        .await
        .expect("state");
    db.close().await;

    let store = reopen(&temp_dir).await;
    assert_eq!(store.reset_interrupted().await.expect("reset"), 2);
    assert_eq!(
        store.count_by_state(DownloadState::Queued).await.expect("count"),
        2
    );
    let still_paused = store.get(paused.id).await.expect("get").expect("row");
    assert_eq!(still_paused.state(), DownloadState::Paused);
}

#[tokio::test]
async fn test_unique_identity_allows_disc_siblings_and_finished_games() {
    let (db, _temp_dir) = setup_test_db().await;
    let store = QueueStore::new(db);

    store.insert(&new_entry(5, Some(51))).await.expect("disc 1");
    store.insert(&new_entry(5, Some(52))).await.expect("disc 2");
    let whole = store.insert(&new_entry(5, None)).await.expect("whole game");

    let err = store
        .insert(&new_entry(5, Some(51)))
        .await
        .expect_err("same disc twice");
    assert!(err.is_constraint_violation());

    store
        .mark_completed(whole.id, 4096)
        .await
        .expect("complete");
    store
        .insert(&new_entry(5, None))
        .await
        .expect("a finished game may be queued again");
}

#[tokio::test]
async fn test_delete_then_update_reports_not_found() {
    let (db, _temp_dir) = setup_test_db().await;
    let store = QueueStore::new(db);
    let entry = store.insert(&new_entry(9, None)).await.expect("insert");

    store.delete(entry.id).await.expect("delete");
    let err = store
        .mark_failed(entry.id, "HTTP 500")
        .await
        .expect_err("row is gone");
    assert!(matches!(err, QueueError::EntryNotFound(id) if id == entry.id));
}
