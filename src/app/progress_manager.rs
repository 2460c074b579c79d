//! Progress UI (bar) for queue runs.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use romfetch_core::{DownloadState, QueueSnapshot};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Spawns the progress bar when requested.
/// Returns (handle, stop) so the caller can signal stop and await the handle.
/// When `use_bar` is false, returns (None, stop) with stop already cancelled.
pub(crate) fn spawn_progress_ui(
    use_bar: bool,
    snapshots: watch::Receiver<QueueSnapshot>,
) -> (Option<tokio::task::JoinHandle<()>>, CancellationToken) {
    let stop = CancellationToken::new();
    if !use_bar {
        stop.cancel();
        return (None, stop);
    }
    let handle = spawn_bar_inner(snapshots, stop.clone());
    (Some(handle), stop)
}

fn spawn_bar_inner(
    mut snapshots: watch::Receiver<QueueSnapshot>,
    stop: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner} {msg} [{bar:30}] {bytes}/{total_bytes}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar.enable_steady_tick(Duration::from_millis(100));

        loop {
            let (message, position, length) = render(&snapshots.borrow_and_update());
            bar.set_message(message);
            bar.set_length(length);
            bar.set_position(position);

            tokio::select! {
                () = stop.cancelled() => break,
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        bar.finish_and_clear();
    })
}

/// Message and byte counters of the first active entry.
pub(crate) fn render(snapshot: &QueueSnapshot) -> (String, u64, u64) {
    let waiting = snapshot.queue.len();
    let Some(entry) = snapshot.active_downloads.first() else {
        return (format!("[idle] {waiting} queued"), 0, 0);
    };
    let others = snapshot.active_downloads.len() - 1;
    let suffix = if others > 0 {
        format!(" (+{others} active, {waiting} queued)")
    } else {
        format!(" ({waiting} queued)")
    };
    if entry.state() == DownloadState::Extracting
        && let Some(progress) = snapshot
            .extraction_progress
            .iter()
            .find(|progress| progress.entry_id == entry.id)
    {
        return (
            format!("Extracting {}{suffix}", entry.display_title),
            progress.bytes_written,
            progress.total_bytes,
        );
    }
    (
        format!("Downloading {}{suffix}", entry.display_title),
        u64::try_from(entry.bytes_downloaded).unwrap_or(0),
        u64::try_from(entry.total_bytes).unwrap_or(0),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use romfetch_core::QueueEntry;
    use romfetch_core::manager::ExtractionProgress;

    fn entry(id: i64, state: DownloadState) -> QueueEntry {
        QueueEntry {
            id,
            game_id: id,
            remote_id: id,
            disc_id: None,
            disc_number: None,
            download_url: "https://example.com/g.zip".to_string(),
            file_name: "g.zip".to_string(),
            display_title: format!("Game {id}"),
            platform_slug: "psx".to_string(),
            cover_path: None,
            bytes_downloaded: 512,
            total_bytes: 2048,
            state_str: state.as_str().to_string(),
            error_reason: None,
            temp_file_path: "/roms/psx/g.zip.part".to_string(),
            created_at: "2025-01-01 00:00:00.000".to_string(),
            updated_at: "2025-01-01 00:00:00.000".to_string(),
        }
    }

    #[test]
    fn render_idle_snapshot() {
        let snapshot = QueueSnapshot {
            queue: vec![entry(2, DownloadState::WaitingForStorage)],
            ..QueueSnapshot::default()
        };
        assert_eq!(render(&snapshot), ("[idle] 1 queued".to_string(), 0, 0));
    }

    #[test]
    fn render_downloading_entry_bytes() {
        let snapshot = QueueSnapshot {
            active_downloads: vec![entry(1, DownloadState::Downloading)],
            ..QueueSnapshot::default()
        };
        let (message, position, length) = render(&snapshot);
        assert_eq!(message, "Downloading Game 1 (0 queued)");
        assert_eq!((position, length), (512, 2048));
    }

    #[test]
    fn render_extraction_uses_extraction_counters() {
        let snapshot = QueueSnapshot {
            active_downloads: vec![
                entry(1, DownloadState::Extracting),
                entry(3, DownloadState::Downloading),
            ],
            extraction_progress: vec![ExtractionProgress {
                entry_id: 1,
                bytes_written: 10,
                total_bytes: 40,
            }],
            ..QueueSnapshot::default()
        };
        let (message, position, length) = render(&snapshot);
        assert_eq!(message, "Extracting Game 1 (+1 active, 0 queued)");
        assert_eq!((position, length), (10, 40));
    }

    #[tokio::test]
    async fn spawn_progress_ui_when_disabled_returns_none_handle() {
        let (_tx, rx) = watch::channel(QueueSnapshot::default());
        let (handle, stop) = spawn_progress_ui(false, rx);
        assert!(handle.is_none());
        assert!(stop.is_cancelled());
    }

    #[tokio::test]
    async fn spawn_progress_ui_stops_on_signal() {
        let (_tx, rx) = watch::channel(QueueSnapshot::default());
        let (handle, stop) = spawn_progress_ui(true, rx);
        assert!(handle.is_some());
        stop.cancel();
        handle.unwrap().await.unwrap();
    }
}
