//! Per-entry task: transfer, install, settle.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use super::DownloadQueueManager;
use super::state::{CompletionEvent, ExtractionProgress};
use crate::archive::platform::is_game_extension;
use crate::archive::{
    ArchiveExtractor, ArchiveInspector, ExtractError, discard_game_folder, is_switch_platform,
    organize_single_file,
};
use crate::download::{
    DownloadOutcome, FetchRequest, ProgressSink, TransferProgress, extension_of,
    extraction_failure_reason, failure_reason,
};
use crate::queue::{DownloadState, QueueEntry, QueueError};

/// Final state a task run leaves its entry in.
#[derive(Debug)]
pub(super) enum Settlement {
    Completed { bytes: u64, final_path: PathBuf },
    Failed(String),
    Paused,
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Mirrors transfer progress into the queue state and persists checkpoints.
struct EntryProgress {
    manager: DownloadQueueManager,
    entry_id: i64,
}

impl EntryProgress {
    fn apply(entry: &mut QueueEntry, progress: TransferProgress) {
        entry.bytes_downloaded = to_i64(progress.bytes_downloaded);
        entry.total_bytes = to_i64(progress.total_bytes);
    }
}

#[async_trait]
impl ProgressSink for EntryProgress {
    async fn report(&self, progress: TransferProgress) {
        let mut state = self.manager.inner.state.lock().await;
        if let Some(entry) = state.entry_mut(self.entry_id) {
            Self::apply(entry, progress);
        }
        self.manager.publish(&state);
    }

    async fn checkpoint(&self, progress: TransferProgress) {
        let mut state = self.manager.inner.state.lock().await;
        if let Some(entry) = state.entry_mut(self.entry_id) {
            Self::apply(entry, progress);
        }
        match self
            .manager
            .inner
            .repo
            .update_progress(
                self.entry_id,
                to_i64(progress.bytes_downloaded),
                to_i64(progress.total_bytes),
            )
            .await
        {
            Ok(()) => {}
            Err(QueueError::EntryNotFound(_)) => {
                debug!(entry_id = self.entry_id, "checkpoint for removed entry");
            }
            Err(error) => {
                warn!(entry_id = self.entry_id, error = %error, "failed to persist progress");
            }
        }
        self.manager.publish(&state);
    }
}

impl DownloadQueueManager {
    /// Transfer followed by installation for one admitted entry.
    pub(super) fn run_entry(
        self,
        entry: QueueEntry,
        cancel: CancellationToken,
        lease: u64,
    ) -> BoxFuture<'static, ()> {
        let span = info_span!("entry", entry_id = entry.id, game_id = entry.game_id);
        async move {
            let request = FetchRequest {
                url: entry.download_url.clone(),
                temp_path: entry.temp_path(),
                final_path: self.download_path(&entry.platform_slug, &entry.file_name),
                expected_total: u64::try_from(entry.total_bytes).unwrap_or(0),
            };
            let sink = EntryProgress {
                manager: self.clone(),
                entry_id: entry.id,
            };

            let outcome = self.inner.downloader.fetch(&request, &cancel, &sink).await;
            let settled = match outcome {
                DownloadOutcome::Completed(transfer) => {
                    self.install(&entry, transfer.path, transfer.bytes, &cancel, lease)
                        .await
                }
                DownloadOutcome::Failed(error) => {
                    warn!(error = %error, "download failed");
                    self.settle(entry.id, lease, Settlement::Failed(failure_reason(&error)))
                        .await
                }
                DownloadOutcome::Cancelled { bytes_downloaded } => {
                    debug!(bytes = bytes_downloaded, "download interrupted");
                    self.settle(entry.id, lease, Settlement::Paused).await
                }
            };
            if settled {
                self.readmit().await;
            }
        }
        .instrument(span)
        .boxed()
    }

    /// Installation only, for an entry whose artifact is already on disk.
    pub(super) fn run_extraction(
        self,
        entry: QueueEntry,
        artifact: PathBuf,
        cancel: CancellationToken,
        lease: u64,
    ) -> BoxFuture<'static, ()> {
        let span = info_span!("extraction", entry_id = entry.id, game_id = entry.game_id);
        async move {
            let bytes = tokio::fs::metadata(&artifact)
                .await
                .map_or(0, |metadata| metadata.len());
            if self.finish_install(&entry, artifact, bytes, &cancel, lease).await {
                self.readmit().await;
            }
        }
        .instrument(span)
        .boxed()
    }

    async fn readmit(&self) {
        if let Err(error) = self.process_queue().await {
            warn!(error = %error, "admission after task end failed");
        }
    }

    async fn install(
        &self,
        entry: &QueueEntry,
        artifact: PathBuf,
        bytes: u64,
        cancel: &CancellationToken,
        lease: u64,
    ) -> bool {
        {
            let mut state = self.inner.state.lock().await;
            if !state.holds_lease(entry.id, lease) {
                debug!("lease revoked before installation");
                return false;
            }
            if let Err(error) = self
                .inner
                .repo
                .update_state(entry.id, DownloadState::Extracting)
                .await
            {
                warn!(error = %error, "failed to persist extracting state");
            }
            state.set_state(entry.id, DownloadState::Extracting);
            if let Some(mirror) = state.entry_mut(entry.id) {
                mirror.bytes_downloaded = to_i64(bytes);
                mirror.total_bytes = mirror.total_bytes.max(to_i64(bytes));
            }
            self.publish(&state);
        }
        self.finish_install(entry, artifact, bytes, cancel, lease)
            .await
    }

    async fn finish_install(
        &self,
        entry: &QueueEntry,
        artifact: PathBuf,
        bytes: u64,
        cancel: &CancellationToken,
        lease: u64,
    ) -> bool {
        let game_lock = self.extraction_lock(entry.game_id).await;
        let settlement = {
            let _guard = game_lock.lock().await;
            match self.install_artifact(entry, artifact, cancel).await {
                Ok(final_path) => Settlement::Completed { bytes, final_path },
                Err(error) => {
                    warn!(error = %error, "installation failed");
                    Settlement::Failed(extraction_failure_reason(&error.to_string()))
                }
            }
        };
        self.settle(entry.id, lease, settlement).await
    }

    async fn extraction_lock(&self, game_id: i64) -> Arc<Mutex<()>> {
        let mut locks = self.inner.extraction_locks.lock().await;
        Arc::clone(locks.entry(game_id).or_default())
    }

    /// Runs inspection and extraction on the blocking pool.
    async fn install_artifact(
        &self,
        entry: &QueueEntry,
        artifact: PathBuf,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, ExtractError> {
        let inspector = self.inner.inspector.clone();
        let extractor = self.inner.extractor;
        let platform_dir = self.inner.directories.platform_dir(&entry.platform_slug);
        let title = entry.display_title.clone();
        let platform_slug = entry.platform_slug.clone();
        let cancel = cancel.clone();
        let manager = self.clone();
        let entry_id = entry.id;
        let artifact_for_error = artifact.clone();

        let joined = tokio::task::spawn_blocking(move || {
            let mut on_progress = |written: u64, total: u64| {
                manager.report_extraction(entry_id, written, total);
            };
            install_blocking(
                &inspector,
                extractor,
                &artifact,
                &title,
                &platform_slug,
                &platform_dir,
                &cancel,
                &mut on_progress,
            )
        })
        .await;

        match joined {
            Ok(result) => result,
            Err(join_error) => Err(ExtractError::io(
                &artifact_for_error,
                io::Error::other(join_error.to_string()),
            )),
        }
    }

    /// Called from the blocking pool with extraction byte counters.
    fn report_extraction(&self, entry_id: i64, bytes_written: u64, total_bytes: u64) {
        let mut state = self.inner.state.blocking_lock();
        state.extraction.insert(
            entry_id,
            ExtractionProgress {
                entry_id,
                bytes_written,
                total_bytes,
            },
        );
        self.publish(&state);
    }

    /// Applies the outcome of a run if `lease` is still current.
    ///
    /// Returns false when the run was revoked by pause or cancel.
    pub(super) async fn settle(&self, id: i64, lease: u64, settlement: Settlement) -> bool {
        let mut state = self.inner.state.lock().await;
        if !state.holds_lease(id, lease) {
            debug!(entry_id = id, "lease revoked; leaving entry state");
            return false;
        }
        state.tasks.remove(&id);
        state.extraction.remove(&id);

        let repo = &self.inner.repo;
        let persisted = match settlement {
            Settlement::Completed { bytes, final_path } => {
                state.set_state(id, DownloadState::Completed);
                let event = state.entry_mut(id).map(|entry| {
                    entry.bytes_downloaded = to_i64(bytes);
                    entry.total_bytes = entry.total_bytes.max(to_i64(bytes));
                    CompletionEvent {
                        entry_id: id,
                        game_id: entry.game_id,
                        remote_id: entry.remote_id,
                        final_path: final_path.clone(),
                        is_disc_download: entry.is_disc_download(),
                    }
                });
                let persisted = repo.mark_completed(id, to_i64(bytes)).await;
                info!(entry_id = id, path = %final_path.display(), "download completed");
                if let Some(event) = event
                    && self.inner.completions.send(event).is_err()
                {
                    debug!(entry_id = id, "no completion subscribers");
                }
                persisted
            }
            Settlement::Failed(reason) => {
                state.set_state(id, DownloadState::Failed);
                if let Some(entry) = state.entry_mut(id) {
                    entry.error_reason = Some(reason.clone());
                }
                repo.mark_failed(id, &reason).await
            }
            Settlement::Paused => {
                state.set_state(id, DownloadState::Paused);
                repo.update_state(id, DownloadState::Paused).await
            }
        };
        if let Err(error) = persisted {
            warn!(entry_id = id, error = %error, "failed to persist task outcome");
        }
        self.publish(&state);
        true
    }
}

fn is_game_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .and_then(extension_of)
        .is_some_and(|ext| is_game_extension(&ext))
}

/// Extracts, organizes or keeps `artifact` and returns the launch path.
///
/// On a failed extraction the archive stays on disk; a game folder created by
/// the failed attempt is removed.
#[allow(clippy::too_many_arguments)]
fn install_blocking(
    inspector: &ArchiveInspector,
    extractor: ArchiveExtractor,
    artifact: &Path,
    title: &str,
    platform_slug: &str,
    platform_dir: &Path,
    cancel: &CancellationToken,
    on_progress: &mut dyn FnMut(u64, u64),
) -> Result<PathBuf, ExtractError> {
    if let Some(kind) = inspector.extraction_kind(artifact, platform_slug)? {
        let game_folder = ArchiveExtractor::game_folder(platform_dir, title);
        let fresh_folder = game_folder != platform_dir && !game_folder.exists();
        return match extractor.extract(artifact, kind, title, platform_dir, cancel, on_progress) {
            Ok(result) => {
                if let Err(error) = fs::remove_file(artifact) {
                    warn!(path = %artifact.display(), %error, "cannot remove extracted archive");
                }
                Ok(result.launch_path())
            }
            Err(error) => {
                if fresh_folder {
                    discard_game_folder(&game_folder);
                }
                Err(error)
            }
        };
    }
    if is_switch_platform(platform_slug) && !title.trim().is_empty() && is_game_file(artifact) {
        return organize_single_file(artifact, title, platform_dir)
            .map_err(|error| ExtractError::io(artifact, error));
    }
    Ok(artifact.to_path_buf())
}
