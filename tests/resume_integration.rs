//! Resume across restarts: a partial file left by one manager is continued by
//! the next one with a byte-range request.

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use romfetch_core::manager::{DownloadQueueManager, DownloadRequest};
use romfetch_core::queue::{DownloadState, QueueStore};
use romfetch_core::storage::{PlatformDirectories, SpaceProbe, StorageGuard};
use romfetch_core::Database;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, ResponseTemplate};

#[path = "../src/test_support/socket_guard.rs"]
mod socket_guard;

use socket_guard::start_mock_server_or_skip;

struct FixedProbe(u64);

impl SpaceProbe for FixedProbe {
    fn available_bytes(&self, _dir: &Path) -> io::Result<u64> {
        Ok(self.0)
    }
}

async fn manager(root: &TempDir, available: u64) -> DownloadQueueManager {
    let db = Database::new(&root.path().join("queue.db"))
        .await
        .expect("failed to open database");
    let manager = DownloadQueueManager::builder(
        Arc::new(QueueStore::new(db)),
        PlatformDirectories::new(root.path()),
    )
    .storage(StorageGuard::new(Arc::new(FixedProbe(available))))
    .build()
    .expect("default settings are valid");
    manager.start().await.expect("manager starts");
    manager
}

#[tokio::test]
async fn test_paused_entry_resumes_from_partial_file_after_restart() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/roms/disc.bin"))
        .and(header("Range", "bytes=2048-"))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(vec![2_u8; 2048]))
        .expect(1)
        .mount(&server)
        .await;

    let root = TempDir::new().expect("failed to create temp dir");
    let request = DownloadRequest::new(
        3,
        30,
        format!("{}/roms/disc.bin", server.uri()),
        "Disc Game",
        "psx",
    )
    .with_expected_size(4096);

    // First run: no space, so the entry parks; a partial file exists from earlier.
    let first = manager(&root, 0).await;
    let id = first.enqueue(request).await.expect("enqueue").id();
    let temp_path = first
        .snapshot()
        .entry(id)
        .map(|entry| entry.temp_path())
        .expect("entry listed");
    std::fs::create_dir_all(temp_path.parent().expect("platform dir")).expect("mkdir");
    std::fs::write(&temp_path, vec![1_u8; 2048]).expect("partial file");
    assert!(first.pause(id).await.expect("pause"));
    first.shutdown().await;

    // Second run: the paused row is kept as is until resumed.
    let second = manager(&root, u64::MAX / 2).await;
    assert_eq!(
        second.snapshot().entry(id).map(|entry| entry.state()),
        Some(DownloadState::Paused)
    );
    assert!(second.resume(id).await.expect("resume"));
    tokio::time::timeout(Duration::from_secs(30), second.wait_idle())
        .await
        .expect("queue drained");

    let final_path = second.download_path("psx", "disc.bin");
    let contents = std::fs::read(&final_path).expect("artifact");
    assert_eq!(contents.len(), 4096);
    assert!(contents[..2048].iter().all(|b| *b == 1));
    assert!(contents[2048..].iter().all(|b| *b == 2));
    assert!(!temp_path.exists());
    assert_eq!(
        second.snapshot().entry(id).map(|entry| entry.state()),
        Some(DownloadState::Completed)
    );
    second.shutdown().await;
}

#[tokio::test]
async fn test_cancel_deletes_partial_file_and_row() {
    let root = TempDir::new().expect("failed to create temp dir");
    let first = manager(&root, 0).await;
    let id = first
        .enqueue(DownloadRequest::new(
            4,
            40,
            "https://example.com/roms/game.iso",
            "Game",
            "ps2",
        ))
        .await
        .expect("enqueue")
        .id();
    let temp_path = first.snapshot().entry(id).expect("listed").temp_path();
    std::fs::create_dir_all(temp_path.parent().expect("platform dir")).expect("mkdir");
    std::fs::write(&temp_path, b"partial").expect("partial file");

    assert!(first.cancel(id).await.expect("cancel"));
    assert!(!temp_path.exists());
    assert!(first.snapshot().entry(id).is_none());
    first.shutdown().await;

    let reopened = manager(&root, 0).await;
    assert!(reopened.snapshot().entry(id).is_none());
}
