//! Download queue orchestration.
//!
//! [`DownloadQueueManager`] owns the in-memory mirror of the persisted queue,
//! admits QUEUED entries into a bounded number of slots, runs each admitted
//! entry as its own task (transfer, then extraction or organization), and
//! publishes the result.
//!
//! # Concurrency
//!
//! - One `tokio::sync::Mutex<QueueState>` guards the mirror and serializes
//!   row updates; it is never held while waiting on a task.
//! - Each run holds a lease. Pause and cancel revoke the lease before they
//!   stop the task, so a stopped task never overwrites the state they set.
//! - Extraction into one game folder is serialized by a per-game lock.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use romfetch_core::manager::{DownloadQueueManager, DownloadRequest};
//! use romfetch_core::queue::QueueStore;
//! use romfetch_core::storage::PlatformDirectories;
//! use romfetch_core::Database;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = QueueStore::new(Database::new_in_memory().await?);
//! let manager = DownloadQueueManager::builder(Arc::new(store), PlatformDirectories::new("/roms"))
//!     .build()?;
//! manager.start().await?;
//!
//! let mut completions = manager.subscribe_completions();
//! let request = DownloadRequest::new(1, 101, "https://example.com/game.zip", "Game", "psx");
//! manager.enqueue(request).await?;
//! let event = completions.recv().await?;
//! println!("installed at {}", event.final_path.display());
//! # Ok(())
//! # }
//! ```

mod error;
mod order;
mod request;
mod settings;
mod state;
mod task;

pub use error::ManagerError;
pub use order::{AdmissionOrder, FifoOrder};
pub use request::{DownloadRequest, EnqueueOutcome};
pub use settings::{
    DEFAULT_INSTANT_THRESHOLD_MB, DEFAULT_MAX_CONCURRENT, MAX_CONCURRENT_DOWNLOADS,
    MIN_CONCURRENT_DOWNLOADS, ManagerSettings,
};
pub use state::{CompletionEvent, ExtractionProgress, QueueSnapshot};

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{Mutex, broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::archive::{ArchiveExtractor, ArchiveInspector};
use crate::download::{
    FailureType, ResumableDownloader, classify_failure_reason, file_name_from_url,
    is_invalid_rom_file_name, partial_path, sanitize_filename,
};
use crate::queue::{DownloadState, NewQueueEntry, QueueEntry, QueueError, QueueRepository};
use crate::storage::{PlatformDirectories, StorageGuard};

use state::{QueueState, RunningTask};

/// Completion events buffered per subscriber before the oldest are dropped.
const COMPLETION_CHANNEL_CAPACITY: usize = 64;

/// Counts from one [`DownloadQueueManager::retry_failed`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct RetrySummary {
    /// Entries sent back to QUEUED for a fresh transfer.
    pub requeued: usize,
    /// Entries whose extraction was restarted from the artifact on disk.
    pub extraction_restarted: usize,
    /// Entries left FAILED because the failure is permanent.
    pub skipped: usize,
}

/// Builder for [`DownloadQueueManager`].
pub struct DownloadQueueManagerBuilder {
    repo: Arc<dyn QueueRepository>,
    directories: PlatformDirectories,
    downloader: Option<ResumableDownloader>,
    storage: StorageGuard,
    inspector: ArchiveInspector,
    extractor: ArchiveExtractor,
    order: Arc<dyn AdmissionOrder>,
    settings: ManagerSettings,
}

impl DownloadQueueManagerBuilder {
    /// HTTP downloader; defaults to [`ResumableDownloader::new`].
    #[must_use]
    pub fn downloader(mut self, downloader: ResumableDownloader) -> Self {
        self.downloader = Some(downloader);
        self
    }

    /// Free-space admission check.
    #[must_use]
    pub fn storage(mut self, storage: StorageGuard) -> Self {
        self.storage = storage;
        self
    }

    /// Extract-or-keep policy.
    #[must_use]
    pub fn inspector(mut self, inspector: ArchiveInspector) -> Self {
        self.inspector = inspector;
        self
    }

    /// Admission order of QUEUED entries; defaults to [`FifoOrder`].
    #[must_use]
    pub fn order(mut self, order: Arc<dyn AdmissionOrder>) -> Self {
        self.order = order;
        self
    }

    /// Concurrency limit and instant threshold.
    #[must_use]
    pub fn settings(mut self, settings: ManagerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Builds the manager. Call [`DownloadQueueManager::start`] before use.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::InvalidConcurrency`] for an out-of-range limit.
    pub fn build(self) -> Result<DownloadQueueManager, ManagerError> {
        self.settings.validate()?;
        let (snapshots, _) = watch::channel(QueueSnapshot::default());
        let (completions, _) = broadcast::channel(COMPLETION_CHANNEL_CAPACITY);
        debug!(
            max_concurrent = self.settings.max_concurrent,
            instant_threshold_bytes = self.settings.instant_threshold_bytes,
            "creating download manager"
        );
        Ok(DownloadQueueManager {
            inner: Arc::new(Inner {
                repo: self.repo,
                downloader: self.downloader.unwrap_or_default(),
                storage: self.storage,
                directories: self.directories,
                inspector: self.inspector,
                extractor: self.extractor,
                order: self.order,
                settings: self.settings,
                state: Mutex::new(QueueState::default()),
                snapshots,
                completions,
                extraction_locks: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
            }),
        })
    }
}

struct Inner {
    repo: Arc<dyn QueueRepository>,
    downloader: ResumableDownloader,
    storage: StorageGuard,
    directories: PlatformDirectories,
    inspector: ArchiveInspector,
    extractor: ArchiveExtractor,
    order: Arc<dyn AdmissionOrder>,
    settings: ManagerSettings,
    state: Mutex<QueueState>,
    snapshots: watch::Sender<QueueSnapshot>,
    completions: broadcast::Sender<CompletionEvent>,
    extraction_locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
    shutdown: CancellationToken,
}

/// Orchestrates queued downloads and their installation.
///
/// Cheap to clone; clones share one queue.
#[derive(Clone)]
pub struct DownloadQueueManager {
    inner: Arc<Inner>,
}

impl fmt::Debug for DownloadQueueManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadQueueManager")
            .field("settings", &self.inner.settings)
            .field("order", &self.inner.order)
            .finish_non_exhaustive()
    }
}

impl DownloadQueueManager {
    /// Starts a builder over a queue repository and directory resolver.
    pub fn builder(
        repo: Arc<dyn QueueRepository>,
        directories: PlatformDirectories,
    ) -> DownloadQueueManagerBuilder {
        DownloadQueueManagerBuilder {
            repo,
            directories,
            downloader: None,
            storage: StorageGuard::default(),
            inspector: ArchiveInspector::default(),
            extractor: ArchiveExtractor::default(),
            order: Arc::new(FifoOrder),
            settings: ManagerSettings::default(),
        }
    }

    /// Active settings.
    #[must_use]
    pub fn settings(&self) -> ManagerSettings {
        self.inner.settings
    }

    /// Latest published view of the queue.
    #[must_use]
    pub fn snapshot(&self) -> QueueSnapshot {
        self.inner.snapshots.borrow().clone()
    }

    /// Receiver of every published snapshot.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<QueueSnapshot> {
        self.inner.snapshots.subscribe()
    }

    /// Receiver of completion events emitted after subscribing.
    #[must_use]
    pub fn subscribe_completions(&self) -> broadcast::Receiver<CompletionEvent> {
        self.inner.completions.subscribe()
    }

    /// Final location of `file_name` for `platform_slug`.
    #[must_use]
    pub fn download_path(&self, platform_slug: &str, file_name: &str) -> PathBuf {
        self.inner
            .directories
            .platform_dir(platform_slug)
            .join(file_name)
    }

    fn publish(&self, state: &QueueState) {
        self.inner.snapshots.send_replace(state.snapshot());
    }

    /// Startup recovery: resets interrupted rows, loads the mirror and admits.
    ///
    /// Returns the number of rows reset from DOWNLOADING/EXTRACTING.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Queue`] if the store cannot be read or updated.
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<u64, ManagerError> {
        let reset = self.load().await?;
        self.process_queue().await?;
        Ok(reset)
    }

    /// Startup recovery without admission: resets interrupted rows and loads the mirror.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Queue`] if the store cannot be read or updated.
    #[instrument(skip(self))]
    pub async fn load(&self) -> Result<u64, ManagerError> {
        let reset = {
            let mut state = self.inner.state.lock().await;
            let reset = if state.tasks.is_empty() {
                self.inner.repo.reset_interrupted().await?
            } else {
                warn!(
                    running = state.tasks.len(),
                    "start called with running tasks; skipping recovery"
                );
                0
            };
            if reset > 0 {
                info!(reset, "recovered interrupted queue entries from previous run");
            }
            state.entries = self.inner.repo.list_all().await?;
            state.accepting = true;
            state.available_storage_bytes = self.inner.storage.available(self.inner.directories.root());
            self.publish(&state);
            reset
        };
        Ok(reset)
    }

    /// Validates, persists and admits a download request.
    ///
    /// # Errors
    ///
    /// - [`ManagerError::InvalidRequest`] for malformed URLs and non-game file names
    /// - [`ManagerError::Duplicate`] when the game or disc already has an unfinished entry
    /// - [`ManagerError::Queue`] when persistence fails
    #[instrument(skip(self, request), fields(game_id = request.game_id, disc_id = ?request.disc_id))]
    pub async fn enqueue(&self, request: DownloadRequest) -> Result<EnqueueOutcome, ManagerError> {
        let url = Url::parse(&request.url).map_err(|e| {
            ManagerError::invalid_request(format!("invalid URL {}: {e}", request.url))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ManagerError::invalid_request(format!(
                "unsupported URL scheme: {}",
                url.scheme()
            )));
        }
        let file_name = request
            .file_name
            .as_deref()
            .map(sanitize_filename)
            .or_else(|| file_name_from_url(&url))
            .filter(|name| !name.is_empty() && name != "_")
            .ok_or_else(|| ManagerError::invalid_request("cannot derive a file name from the URL"))?;
        if is_invalid_rom_file_name(&file_name) {
            return Err(ManagerError::invalid_request(format!(
                "{file_name} is not a game file"
            )));
        }
        let platform_dir = self.inner.directories.platform_dir(&request.platform_slug);
        let temp_file_path = partial_path(&platform_dir, &file_name);

        let mut state = self.inner.state.lock().await;
        if state
            .find_unfinished(request.game_id, request.disc_id)
            .is_some()
        {
            return Err(ManagerError::duplicate(request.game_id, request.disc_id));
        }
        let persisted = match request.disc_id {
            Some(disc_id) => self.inner.repo.find_unfinished_for_disc(disc_id).await?,
            None => {
                self.inner
                    .repo
                    .find_unfinished_for_game(request.game_id)
                    .await?
            }
        };
        if persisted.is_some() {
            return Err(ManagerError::duplicate(request.game_id, request.disc_id));
        }

        let new_entry = NewQueueEntry {
            game_id: request.game_id,
            remote_id: request.remote_id,
            disc_id: request.disc_id,
            disc_number: request.disc_number,
            download_url: request.url.clone(),
            file_name,
            display_title: request.display_title.clone(),
            platform_slug: request.platform_slug.clone(),
            cover_path: request.cover_path.clone(),
            total_bytes: i64::try_from(request.expected_size).unwrap_or(i64::MAX),
            state: DownloadState::Queued,
            temp_file_path,
        };
        let entry = self
            .inner
            .repo
            .insert(&new_entry)
            .await
            .map_err(|e| ManagerError::from_insert(e, request.game_id, request.disc_id))?;
        let id = entry.id;
        info!(entry_id = id, file = %entry.file_name, "enqueued download");
        state.entries.push(entry);

        let instant = self.inner.settings.is_instant(request.expected_size)
            && state.accepting
            && state.active_count() < self.inner.settings.max_concurrent;
        let outcome = if instant && self.admit(&mut state, id).await? {
            debug!(entry_id = id, "below instant threshold; started immediately");
            EnqueueOutcome::Started(id)
        } else {
            EnqueueOutcome::Queued(id)
        };
        self.publish(&state);
        drop(state);

        self.process_queue().await?;
        Ok(outcome)
    }

    /// Starts entries for free slots, returning how many were started.
    ///
    /// Slots are `max_concurrent - active`. QUEUED entries are taken in
    /// admission order; each must pass the storage check, otherwise it moves to
    /// WAITING_FOR_STORAGE and the next entry is tried.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Queue`] if a state change cannot be persisted.
    #[instrument(skip(self))]
    pub async fn process_queue(&self) -> Result<usize, ManagerError> {
        let mut state = self.inner.state.lock().await;
        if !state.accepting {
            return Ok(0);
        }
        let slots = self
            .inner
            .settings
            .max_concurrent
            .saturating_sub(state.active_count());
        if slots == 0 {
            return Ok(0);
        }

        let mut candidates: Vec<QueueEntry> = state
            .entries
            .iter()
            .filter(|entry| entry.state() == DownloadState::Queued)
            .cloned()
            .collect();
        candidates.sort_by(|a, b| self.inner.order.compare(a, b));

        let mut started = 0;
        for entry in candidates {
            if started == slots {
                break;
            }
            if self.admit(&mut state, entry.id).await? {
                started += 1;
            }
        }
        if started > 0 {
            debug!(started, active = state.active_count(), "admitted queued entries");
        }
        self.publish(&state);
        Ok(started)
    }

    /// Storage-checks one entry and spawns its task, or parks it.
    async fn admit(&self, state: &mut QueueState, id: i64) -> Result<bool, ManagerError> {
        let Some(entry) = state.entry(id).cloned() else {
            return Ok(false);
        };
        let platform_dir = self.inner.directories.platform_dir(&entry.platform_slug);
        let check = self
            .inner
            .storage
            .check(&platform_dir, entry.remaining_bytes());
        state.available_storage_bytes = check.available;
        if !check.fits {
            warn!(
                entry_id = id,
                required = check.required,
                available = check.available,
                "insufficient storage; waiting"
            );
            self.inner
                .repo
                .update_state(id, DownloadState::WaitingForStorage)
                .await?;
            state.set_state(id, DownloadState::WaitingForStorage);
            return Ok(false);
        }

        self.inner
            .repo
            .update_state(id, DownloadState::Downloading)
            .await?;
        state.set_state(id, DownloadState::Downloading);

        let mut running = entry;
        running.set_state(DownloadState::Downloading);
        let lease = state.next_lease();
        let cancel = self.inner.shutdown.child_token();
        let handle = tokio::spawn(self.clone().run_entry(running, cancel.clone(), lease));
        state.tasks.insert(
            id,
            RunningTask {
                lease,
                cancel,
                handle: Some(handle),
            },
        );
        info!(entry_id = id, "download started");
        Ok(true)
    }

    /// Revokes the running task of `id`, if any, and waits for it to stop.
    async fn stop_task(task: Option<RunningTask>) -> bool {
        let Some(task) = task else {
            return false;
        };
        task.cancel.cancel();
        if let Some(handle) = task.handle
            && let Err(error) = handle.await
        {
            warn!(error = %error, "download task ended abnormally");
        }
        true
    }

    /// Pauses a DOWNLOADING, QUEUED or WAITING_FOR_STORAGE entry.
    ///
    /// Partial bytes and the recorded offset are kept. Returns false when the
    /// entry is unknown or in another state.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Queue`] if the state change cannot be persisted.
    #[instrument(skip(self))]
    pub async fn pause(&self, id: i64) -> Result<bool, ManagerError> {
        let mut state = self.inner.state.lock().await;
        let Some(current) = state.entry(id).map(QueueEntry::state) else {
            return Ok(false);
        };
        match current {
            DownloadState::Downloading => {
                let task = state.tasks.remove(&id);
                self.inner
                    .repo
                    .update_state(id, DownloadState::Paused)
                    .await?;
                state.set_state(id, DownloadState::Paused);
                self.publish(&state);
                drop(state);

                Self::stop_task(task).await;
                info!(entry_id = id, "download paused");
                self.process_queue().await?;
                Ok(true)
            }
            DownloadState::Queued | DownloadState::WaitingForStorage => {
                self.inner
                    .repo
                    .update_state(id, DownloadState::Paused)
                    .await?;
                state.set_state(id, DownloadState::Paused);
                self.publish(&state);
                info!(entry_id = id, "queued download paused");
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Returns a PAUSED or WAITING_FOR_STORAGE entry to QUEUED and admits.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Queue`] if the state change cannot be persisted.
    #[instrument(skip(self))]
    pub async fn resume(&self, id: i64) -> Result<bool, ManagerError> {
        {
            let mut state = self.inner.state.lock().await;
            let resumable = state.entry(id).is_some_and(|entry| {
                matches!(
                    entry.state(),
                    DownloadState::Paused | DownloadState::WaitingForStorage
                )
            });
            if !resumable {
                return Ok(false);
            }
            self.inner
                .repo
                .update_state(id, DownloadState::Queued)
                .await?;
            state.set_state(id, DownloadState::Queued);
            self.publish(&state);
        }
        info!(entry_id = id, "download resumed");
        self.process_queue().await?;
        Ok(true)
    }

    /// Removes an entry and its temp file, stopping its transfer first.
    ///
    /// Applies to QUEUED, WAITING_FOR_STORAGE, PAUSED, DOWNLOADING and FAILED
    /// entries; EXTRACTING and COMPLETED entries are left alone.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Queue`] if the row cannot be deleted.
    #[instrument(skip(self))]
    pub async fn cancel(&self, id: i64) -> Result<bool, ManagerError> {
        let (entry, task) = {
            let mut state = self.inner.state.lock().await;
            let cancellable = state.entry(id).is_some_and(|entry| {
                matches!(
                    entry.state(),
                    DownloadState::Queued
                        | DownloadState::WaitingForStorage
                        | DownloadState::Paused
                        | DownloadState::Downloading
                        | DownloadState::Failed
                )
            });
            if !cancellable {
                return Ok(false);
            }
            let task = state.tasks.remove(&id);
            let entry = state.remove_entry(id);
            self.publish(&state);
            (entry, task)
        };
        let freed_slot = Self::stop_task(task).await;

        {
            let _state = self.inner.state.lock().await;
            match self.inner.repo.delete(id).await {
                Ok(()) | Err(QueueError::EntryNotFound(_)) => {}
                Err(error) => return Err(error.into()),
            }
        }
        if let Some(entry) = entry {
            let temp_path = entry.temp_path();
            match tokio::fs::remove_file(&temp_path).await {
                Ok(()) => {}
                Err(error) if error.kind() == io::ErrorKind::NotFound => {}
                Err(error) => {
                    warn!(path = %temp_path.display(), %error, "cannot remove temp file");
                }
            }
        }
        info!(entry_id = id, "download cancelled");

        if freed_slot {
            self.process_queue().await?;
        }
        Ok(true)
    }

    /// Re-queues FAILED entries unless their failure is permanent.
    ///
    /// Extraction failures re-run extraction from the artifact on disk, or are
    /// re-queued for download when the artifact is gone.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Queue`] if a state change cannot be persisted.
    #[instrument(skip(self))]
    pub async fn retry_failed(&self) -> Result<RetrySummary, ManagerError> {
        let failed: Vec<QueueEntry> = {
            let state = self.inner.state.lock().await;
            state
                .entries
                .iter()
                .filter(|entry| entry.state() == DownloadState::Failed)
                .cloned()
                .collect()
        };

        let mut summary = RetrySummary::default();
        let mut requeue = Vec::new();
        for entry in failed {
            let reason = entry.error_reason.as_deref().unwrap_or_default();
            match classify_failure_reason(reason) {
                FailureType::Permanent => {
                    debug!(entry_id = entry.id, reason, "permanent failure; not retrying");
                    summary.skipped += 1;
                }
                FailureType::Extraction => match self.retry_extraction(entry.id).await {
                    Ok(true) => summary.extraction_restarted += 1,
                    Ok(false) => summary.skipped += 1,
                    Err(ManagerError::ArtifactMissing { .. }) => requeue.push(entry.id),
                    Err(error) => return Err(error),
                },
                FailureType::Transient => requeue.push(entry.id),
            }
        }

        if !requeue.is_empty() {
            let mut state = self.inner.state.lock().await;
            for id in requeue {
                if state.entry(id).map(QueueEntry::state) != Some(DownloadState::Failed) {
                    continue;
                }
                self.inner
                    .repo
                    .update_state(id, DownloadState::Queued)
                    .await?;
                state.set_state(id, DownloadState::Queued);
                summary.requeued += 1;
            }
            self.publish(&state);
        }
        info!(
            requeued = summary.requeued,
            extraction_restarted = summary.extraction_restarted,
            skipped = summary.skipped,
            "retried failed downloads"
        );
        self.process_queue().await?;
        Ok(summary)
    }

    /// Re-runs extraction of a FAILED entry from its downloaded artifact.
    ///
    /// The extraction runs as a task of its own; completion is reported
    /// through the usual snapshot and completion channels. Returns false when
    /// the entry is not FAILED.
    ///
    /// # Errors
    ///
    /// - [`ManagerError::NotFound`] for an unknown id
    /// - [`ManagerError::ArtifactMissing`] when the downloaded file is gone
    /// - [`ManagerError::Queue`] if the state change cannot be persisted
    #[instrument(skip(self))]
    pub async fn retry_extraction(&self, id: i64) -> Result<bool, ManagerError> {
        let mut state = self.inner.state.lock().await;
        let Some(mut entry) = state.entry(id).cloned() else {
            return Err(ManagerError::NotFound(id));
        };
        if entry.state() != DownloadState::Failed || !state.accepting {
            return Ok(false);
        }
        let artifact = self.download_path(&entry.platform_slug, &entry.file_name);
        if !artifact.is_file() {
            return Err(ManagerError::ArtifactMissing { path: artifact });
        }

        self.inner
            .repo
            .update_state(id, DownloadState::Extracting)
            .await?;
        state.set_state(id, DownloadState::Extracting);
        entry.set_state(DownloadState::Extracting);

        let lease = state.next_lease();
        let cancel = self.inner.shutdown.child_token();
        let handle = tokio::spawn(self.clone().run_extraction(
            entry,
            artifact,
            cancel.clone(),
            lease,
        ));
        state.tasks.insert(
            id,
            RunningTask {
                lease,
                cancel,
                handle: Some(handle),
            },
        );
        self.publish(&state);
        info!(entry_id = id, "extraction restarted");
        Ok(true)
    }

    /// Moves WAITING_FOR_STORAGE entries that now fit back to QUEUED.
    ///
    /// Returns how many entries were re-queued.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Queue`] if a state change cannot be persisted.
    #[instrument(skip(self))]
    pub async fn recheck_storage(&self) -> Result<usize, ManagerError> {
        let resumed = {
            let mut state = self.inner.state.lock().await;
            let waiting: Vec<QueueEntry> = state
                .entries
                .iter()
                .filter(|entry| entry.state() == DownloadState::WaitingForStorage)
                .cloned()
                .collect();
            if waiting.is_empty() {
                state.available_storage_bytes =
                    self.inner.storage.available(self.inner.directories.root());
            }

            let mut resumed = 0;
            for entry in waiting {
                let platform_dir = self.inner.directories.platform_dir(&entry.platform_slug);
                let check = self
                    .inner
                    .storage
                    .check(&platform_dir, entry.remaining_bytes());
                state.available_storage_bytes = check.available;
                if check.fits {
                    self.inner
                        .repo
                        .update_state(entry.id, DownloadState::Queued)
                        .await?;
                    state.set_state(entry.id, DownloadState::Queued);
                    resumed += 1;
                }
            }
            self.publish(&state);
            resumed
        };

        if resumed > 0 {
            info!(resumed, "storage available again");
            self.process_queue().await?;
        }
        Ok(resumed)
    }

    /// Deletes COMPLETED rows and drops them from the mirror.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Queue`] if the delete fails.
    #[instrument(skip(self))]
    pub async fn clear_completed(&self) -> Result<u64, ManagerError> {
        let mut state = self.inner.state.lock().await;
        let removed = self.inner.repo.clear_completed().await?;
        state
            .entries
            .retain(|entry| entry.state() != DownloadState::Completed);
        self.publish(&state);
        debug!(removed, "cleared completed downloads");
        Ok(removed)
    }

    /// Waits until nothing is running and nothing is QUEUED.
    pub async fn wait_idle(&self) {
        let mut receiver = self.subscribe_state();
        let idle = |snapshot: &QueueSnapshot| {
            snapshot.active_downloads.is_empty()
                && !snapshot
                    .queue
                    .iter()
                    .any(|entry| entry.state() == DownloadState::Queued)
        };
        if receiver.wait_for(idle).await.is_err() {
            debug!("snapshot channel closed while waiting for idle");
        }
    }

    /// Stops admission, cancels every task and waits for them to end.
    ///
    /// Interrupted transfers end PAUSED with their bytes persisted;
    /// interrupted extractions end FAILED with an extraction reason.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        let handles: Vec<_> = {
            let mut state = self.inner.state.lock().await;
            state.accepting = false;
            state
                .tasks
                .values_mut()
                .filter_map(|task| task.handle.take())
                .collect()
        };
        self.inner.shutdown.cancel();
        let stopped = handles.len();
        for handle in handles {
            if let Err(error) = handle.await {
                warn!(error = %error, "download task ended abnormally");
            }
        }
        info!(stopped, "download manager stopped");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::path::Path;

    use crate::db::Database;
    use crate::queue::QueueStore;
    use crate::storage::{STORAGE_BUFFER_BYTES, SpaceProbe};
    use tempfile::TempDir;

    struct FixedProbe(u64);

    impl SpaceProbe for FixedProbe {
        fn available_bytes(&self, _dir: &Path) -> io::Result<u64> {
            Ok(self.0)
        }
    }

    async fn manager_with(dir: &TempDir, available: u64) -> DownloadQueueManager {
        let store = QueueStore::new(Database::new_in_memory().await.unwrap());
        let manager = DownloadQueueManager::builder(
            Arc::new(store),
            PlatformDirectories::new(dir.path()),
        )
        .storage(StorageGuard::new(Arc::new(FixedProbe(available))))
        .build()
        .unwrap();
        manager.start().await.unwrap();
        manager
    }

    fn request(game_id: i64) -> DownloadRequest {
        DownloadRequest::new(
            game_id,
            game_id + 100,
            format!("https://example.com/roms/game{game_id}.zip"),
            format!("Game {game_id}"),
            "psx",
        )
    }

    #[tokio::test]
    async fn test_enqueue_rejects_image_file_name() {
        let dir = TempDir::new().unwrap();
        let manager = manager_with(&dir, 0).await;

        let error = manager
            .enqueue(request(1).with_file_name("cover.png"))
            .await
            .unwrap_err();
        assert!(matches!(error, ManagerError::InvalidRequest { .. }));
    }

    #[tokio::test]
    async fn test_enqueue_rejects_malformed_url() {
        let dir = TempDir::new().unwrap();
        let manager = manager_with(&dir, 0).await;

        let mut bad = request(1);
        bad.url = "not a url".to_string();
        assert!(matches!(
            manager.enqueue(bad).await.unwrap_err(),
            ManagerError::InvalidRequest { .. }
        ));
    }

    #[tokio::test]
    async fn test_enqueue_without_space_waits_for_storage() {
        let dir = TempDir::new().unwrap();
        let manager = manager_with(&dir, 0).await;

        let outcome = manager.enqueue(request(1)).await.unwrap();

        assert_eq!(outcome, EnqueueOutcome::Queued(outcome.id()));
        let snapshot = manager.snapshot();
        let entry = snapshot.entry(outcome.id()).unwrap();
        assert_eq!(entry.state(), DownloadState::WaitingForStorage);
        assert_eq!(snapshot.available_storage_bytes, 0);
        assert!(entry.temp_file_path.ends_with("game1.zip.part"));
    }

    #[tokio::test]
    async fn test_duplicate_game_is_rejected() {
        let dir = TempDir::new().unwrap();
        let manager = manager_with(&dir, 0).await;

        manager.enqueue(request(1)).await.unwrap();
        let error = manager.enqueue(request(1)).await.unwrap_err();
        assert!(error.is_duplicate());

        // A disc of the same game is a different identity.
        manager
            .enqueue(request(1).with_disc(10, 1).with_file_name("disc1.chd"))
            .await
            .unwrap();
        let error = manager
            .enqueue(request(1).with_disc(10, 1).with_file_name("disc1.chd"))
            .await
            .unwrap_err();
        assert!(error.is_duplicate());
    }

    #[tokio::test]
    async fn test_pause_resume_and_cancel_waiting_entry() {
        let dir = TempDir::new().unwrap();
        let manager = manager_with(&dir, 0).await;
        let id = manager.enqueue(request(1)).await.unwrap().id();

        assert!(manager.pause(id).await.unwrap());
        assert_eq!(
            manager.snapshot().entry(id).unwrap().state(),
            DownloadState::Paused
        );
        assert!(!manager.pause(id).await.unwrap());

        // Resume re-queues; admission parks it again without space.
        assert!(manager.resume(id).await.unwrap());
        assert_eq!(
            manager.snapshot().entry(id).unwrap().state(),
            DownloadState::WaitingForStorage
        );

        let temp = dir.path().join("psx").join("game1.zip.part");
        std::fs::create_dir_all(temp.parent().unwrap()).unwrap();
        std::fs::write(&temp, b"partial").unwrap();

        assert!(manager.cancel(id).await.unwrap());
        assert!(manager.snapshot().entry(id).is_none());
        assert!(!temp.exists());
        assert!(!manager.cancel(id).await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_ids_change_nothing() {
        let dir = TempDir::new().unwrap();
        let manager = manager_with(&dir, 0).await;

        assert!(!manager.pause(99).await.unwrap());
        assert!(!manager.resume(99).await.unwrap());
        assert!(!manager.cancel(99).await.unwrap());
        assert!(matches!(
            manager.retry_extraction(99).await.unwrap_err(),
            ManagerError::NotFound(99)
        ));
    }

    #[tokio::test]
    async fn test_download_path_uses_platform_directory() {
        let dir = TempDir::new().unwrap();
        let manager = manager_with(&dir, STORAGE_BUFFER_BYTES).await;
        assert_eq!(
            manager.download_path("snes", "Game.sfc"),
            dir.path().join("snes").join("Game.sfc")
        );
    }

    #[tokio::test]
    async fn test_build_rejects_invalid_concurrency() {
        let store = QueueStore::new(Database::new_in_memory().await.unwrap());
        let result = DownloadQueueManager::builder(Arc::new(store), PlatformDirectories::new("/r"))
            .settings(ManagerSettings {
                max_concurrent: 0,
                ..ManagerSettings::default()
            })
            .build();
        assert!(matches!(
            result.unwrap_err(),
            ManagerError::InvalidConcurrency { value: 0 }
        ));
    }
}
