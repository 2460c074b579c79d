//! In-memory mirror of the queue and the views published from it.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::queue::{DownloadState, QueueEntry};

/// Published view of the queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueSnapshot {
    /// DOWNLOADING and EXTRACTING entries.
    pub active_downloads: Vec<QueueEntry>,
    /// QUEUED, WAITING_FOR_STORAGE, PAUSED and FAILED entries.
    pub queue: Vec<QueueEntry>,
    /// COMPLETED entries not yet cleared.
    pub completed: Vec<QueueEntry>,
    /// Free bytes seen by the last storage check.
    pub available_storage_bytes: u64,
    /// Byte progress of running extractions.
    pub extraction_progress: Vec<ExtractionProgress>,
}

impl QueueSnapshot {
    /// Looks an entry up in every list.
    #[must_use]
    pub fn entry(&self, id: i64) -> Option<&QueueEntry> {
        self.active_downloads
            .iter()
            .chain(&self.queue)
            .chain(&self.completed)
            .find(|entry| entry.id == id)
    }
}

/// Extraction byte counters of one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExtractionProgress {
    pub entry_id: i64,
    pub bytes_written: u64,
    pub total_bytes: u64,
}

/// Emitted once per entry that reaches COMPLETED.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionEvent {
    pub entry_id: i64,
    pub game_id: i64,
    pub remote_id: i64,
    /// Launch path of the installed game.
    pub final_path: PathBuf,
    pub is_disc_download: bool,
}

/// Handle on a spawned entry task.
///
/// The lease identifies one run; a task whose lease was revoked (pause,
/// cancel) leaves the entry's state to whoever revoked it.
#[derive(Debug)]
pub(crate) struct RunningTask {
    pub lease: u64,
    pub cancel: CancellationToken,
    pub handle: Option<JoinHandle<()>>,
}

/// Everything guarded by the manager's state lock.
#[derive(Debug)]
pub(crate) struct QueueState {
    pub entries: Vec<QueueEntry>,
    pub tasks: HashMap<i64, RunningTask>,
    pub extraction: HashMap<i64, ExtractionProgress>,
    pub available_storage_bytes: u64,
    pub next_lease: u64,
    pub accepting: bool,
}

impl Default for QueueState {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            tasks: HashMap::new(),
            extraction: HashMap::new(),
            available_storage_bytes: 0,
            next_lease: 0,
            accepting: true,
        }
    }
}

impl QueueState {
    pub fn entry(&self, id: i64) -> Option<&QueueEntry> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    pub fn entry_mut(&mut self, id: i64) -> Option<&mut QueueEntry> {
        self.entries.iter_mut().find(|entry| entry.id == id)
    }

    pub fn set_state(&mut self, id: i64, state: DownloadState) {
        if let Some(entry) = self.entry_mut(id) {
            entry.set_state(state);
            if state != DownloadState::Failed {
                entry.error_reason = None;
            }
        }
    }

    pub fn remove_entry(&mut self, id: i64) -> Option<QueueEntry> {
        let index = self.entries.iter().position(|entry| entry.id == id)?;
        self.extraction.remove(&id);
        Some(self.entries.remove(index))
    }

    /// Number of occupied download slots.
    pub fn active_count(&self) -> usize {
        self.tasks.len()
    }

    /// Unfinished entry holding the game or disc identity, if any.
    pub fn find_unfinished(&self, game_id: i64, disc_id: Option<i64>) -> Option<&QueueEntry> {
        self.entries.iter().find(|entry| {
            !entry.state().is_terminal()
                && match disc_id {
                    Some(disc_id) => entry.disc_id == Some(disc_id),
                    None => entry.disc_id.is_none() && entry.game_id == game_id,
                }
        })
    }

    pub fn next_lease(&mut self) -> u64 {
        self.next_lease += 1;
        self.next_lease
    }

    /// True while `lease` is the current run of `id`.
    pub fn holds_lease(&self, id: i64, lease: u64) -> bool {
        self.tasks.get(&id).is_some_and(|task| task.lease == lease)
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let mut snapshot = QueueSnapshot {
            available_storage_bytes: self.available_storage_bytes,
            ..QueueSnapshot::default()
        };
        for entry in &self.entries {
            match entry.state() {
                DownloadState::Downloading | DownloadState::Extracting => {
                    snapshot.active_downloads.push(entry.clone());
                }
                DownloadState::Completed => snapshot.completed.push(entry.clone()),
                DownloadState::Cancelled => {}
                _ => snapshot.queue.push(entry.clone()),
            }
        }
        snapshot.extraction_progress = self.extraction.values().copied().collect();
        snapshot
            .extraction_progress
            .sort_by_key(|progress| progress.entry_id);
        snapshot
    }
}
