//! Resumable HTTP transfer of a single game file.
//!
//! [`ResumableDownloader`] streams one URL into a `.part` temp file, resuming
//! from the bytes already on disk with a `Range` request, and moves the temp
//! file into place when the body is complete.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use reqwest::Client;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, RANGE};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::constants::{
    CONNECT_TIMEOUT_SECS, DOWNLOAD_BUFFER_SIZE, INVALID_CONTENT_TYPES, MIN_ROM_SIZE_BYTES,
    READ_TIMEOUT_SECS,
};
use super::error::DownloadError;
use super::progress::{ProgressSink, ProgressThrottle, TransferProgress};

/// User-Agent sent with every transfer.
const USER_AGENT: &str = concat!("romfetch/", env!("CARGO_PKG_VERSION"));

/// One transfer to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Remote file URL.
    pub url: String,
    /// `.part` file the body is streamed into; existing bytes are resumed.
    pub temp_path: PathBuf,
    /// Location of the finished file.
    pub final_path: PathBuf,
    /// Size known before the request, 0 when unknown.
    pub expected_total: u64,
}

/// Result of a finished transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedTransfer {
    /// Final file location.
    pub path: PathBuf,
    /// Size of the final file.
    pub bytes: u64,
    /// Whether the server honoured the range request.
    pub resumed: bool,
}

/// How a transfer ended.
#[derive(Debug)]
pub enum DownloadOutcome {
    /// Body fully written and moved to the final path.
    Completed(CompletedTransfer),
    /// Transfer aborted with an error; the temp file is kept for resume.
    Failed(DownloadError),
    /// Cancellation was requested; the temp file holds `bytes_downloaded` bytes.
    Cancelled {
        /// Bytes on disk when the transfer stopped.
        bytes_downloaded: u64,
    },
}

impl DownloadOutcome {
    /// True for [`DownloadOutcome::Completed`].
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

/// HTTP downloader with byte-range resume.
///
/// Create once and reuse for every transfer to share the connection pool.
///
/// # Example
///
/// ```no_run
/// use romfetch_core::download::{FetchRequest, NoopProgress, ResumableDownloader};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() {
/// let downloader = ResumableDownloader::new();
/// let request = FetchRequest {
///     url: "https://example.com/roms/game.zip".to_string(),
///     temp_path: "/roms/psx/game.zip.part".into(),
///     final_path: "/roms/psx/game.zip".into(),
///     expected_total: 0,
/// };
/// let outcome = downloader
///     .fetch(&request, &CancellationToken::new(), &NoopProgress)
///     .await;
/// println!("{outcome:?}");
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ResumableDownloader {
    client: Client,
}

impl Default for ResumableDownloader {
    fn default() -> Self {
        Self::new()
    }
}

impl ResumableDownloader {
    /// Creates a downloader with the default timeouts (30 s connect, 300 s read).
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails with the static configuration.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        Self::try_new_with_timeouts(CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS)
            .expect("failed to build HTTP client with static configuration")
    }

    /// Creates a downloader with explicit timeouts in seconds.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::ClientBuild`] when the HTTP client cannot be
    /// built with the supplied configuration.
    pub fn try_new_with_timeouts(
        connect_timeout_secs: u64,
        read_timeout_secs: u64,
    ) -> Result<Self, DownloadError> {
        let client = build_client(connect_timeout_secs, read_timeout_secs)
            .map_err(DownloadError::client_build)?;
        Ok(Self { client })
    }

    /// Streams `request.url` into `request.temp_path` and moves it to `request.final_path`.
    ///
    /// Never returns an `Err`: failures and cancellation are reported through
    /// [`DownloadOutcome`].
    #[instrument(skip(self, cancel, progress), fields(url = %request.url))]
    pub async fn fetch(
        &self,
        request: &FetchRequest,
        cancel: &CancellationToken,
        progress: &dyn ProgressSink,
    ) -> DownloadOutcome {
        match self.fetch_inner(request, cancel, progress).await {
            Ok(outcome) => outcome,
            Err(error) => {
                warn!(%error, "transfer failed");
                DownloadOutcome::Failed(error)
            }
        }
    }

    async fn fetch_inner(
        &self,
        request: &FetchRequest,
        cancel: &CancellationToken,
        progress: &dyn ProgressSink,
    ) -> Result<DownloadOutcome, DownloadError> {
        let url = request.url.as_str();
        Url::parse(url).map_err(|_| DownloadError::invalid_url(url))?;

        if let Some(parent) = request.temp_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DownloadError::io(parent, e))?;
        }

        let mut existing_bytes = tokio::fs::metadata(&request.temp_path)
            .await
            .map(|meta| meta.len())
            .unwrap_or(0);
        if cancel.is_cancelled() {
            return Ok(DownloadOutcome::Cancelled {
                bytes_downloaded: existing_bytes,
            });
        }

        // Offsets and lengths must count stored bytes, not decoded ones.
        let mut builder = self.client.get(url).header(ACCEPT_ENCODING, "identity");
        if existing_bytes > 0 {
            debug!(existing_bytes, "requesting byte range");
            builder = builder.header(RANGE, format!("bytes={existing_bytes}-"));
        }

        let response = tokio::select! {
            () = cancel.cancelled() => {
                return Ok(DownloadOutcome::Cancelled { bytes_downloaded: existing_bytes });
            }
            result = builder.send() => result.map_err(|e| map_reqwest_error(url, e))?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::http_status(url, status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();
        if INVALID_CONTENT_TYPES
            .iter()
            .any(|invalid| content_type.starts_with(invalid))
        {
            return Err(DownloadError::invalid_content_type(content_type));
        }

        let partial = status == StatusCode::PARTIAL_CONTENT;
        if existing_bytes > 0 && !partial {
            info!(existing_bytes, "server ignored range request; restarting from zero");
            remove_if_exists(&request.temp_path).await?;
            existing_bytes = 0;
        }

        let mut total_bytes = derive_total(&response, partial, existing_bytes, request.expected_total);
        if total_bytes > 0 && total_bytes < MIN_ROM_SIZE_BYTES {
            return Err(DownloadError::too_small(total_bytes));
        }

        let start_offset = if partial { existing_bytes } else { 0 };
        progress
            .report(TransferProgress {
                bytes_downloaded: start_offset,
                total_bytes,
            })
            .await;

        let file = open_temp_file(&request.temp_path, partial).await?;
        let mut writer = BufWriter::with_capacity(DOWNLOAD_BUFFER_SIZE, file);
        let mut stream = response.bytes_stream();
        let mut bytes_downloaded = start_offset;
        let mut throttle = ProgressThrottle::new(Instant::now());

        loop {
            let next = tokio::select! {
                () = cancel.cancelled() => None,
                chunk = stream.next() => Some(chunk),
            };
            let Some(chunk) = next else {
                flush(&mut writer, &request.temp_path).await?;
                let snapshot = TransferProgress {
                    bytes_downloaded,
                    total_bytes,
                };
                progress.report(snapshot).await;
                progress.checkpoint(snapshot).await;
                debug!(bytes_downloaded, "transfer cancelled");
                return Ok(DownloadOutcome::Cancelled { bytes_downloaded });
            };
            let Some(chunk) = chunk else {
                break;
            };
            let chunk = chunk.map_err(|e| map_reqwest_error(url, e))?;
            writer
                .write_all(&chunk)
                .await
                .map_err(|e| DownloadError::io(&request.temp_path, e))?;
            bytes_downloaded += chunk.len() as u64;
            if total_bytes > 0 && bytes_downloaded > total_bytes {
                debug!(bytes_downloaded, total_bytes, "body exceeds expected size");
                total_bytes = bytes_downloaded;
            }

            let decision = throttle.tick(Instant::now());
            let snapshot = TransferProgress {
                bytes_downloaded,
                total_bytes,
            };
            if decision.report {
                progress.report(snapshot).await;
            }
            if decision.checkpoint {
                progress.checkpoint(snapshot).await;
            }
        }

        flush(&mut writer, &request.temp_path).await?;
        drop(writer);

        let final_total = if total_bytes == 0 {
            bytes_downloaded
        } else {
            total_bytes
        };
        let snapshot = TransferProgress {
            bytes_downloaded,
            total_bytes: final_total,
        };
        progress.report(snapshot).await;
        progress.checkpoint(snapshot).await;

        move_into_place(&request.temp_path, &request.final_path).await?;
        info!(
            path = %request.final_path.display(),
            bytes = bytes_downloaded,
            resumed = partial,
            "download complete"
        );

        Ok(DownloadOutcome::Completed(CompletedTransfer {
            path: request.final_path.clone(),
            bytes: bytes_downloaded,
            resumed: partial,
        }))
    }
}

fn build_client(connect_timeout_secs: u64, read_timeout_secs: u64) -> Result<Client, reqwest::Error> {
    Client::builder()
        .connect_timeout(Duration::from_secs(connect_timeout_secs))
        .read_timeout(Duration::from_secs(read_timeout_secs))
        .no_gzip()
        .user_agent(USER_AGENT)
        .build()
}

fn map_reqwest_error(url: &str, error: reqwest::Error) -> DownloadError {
    if error.is_timeout() {
        DownloadError::timeout(url)
    } else {
        DownloadError::network(url, error)
    }
}

/// Total size: resumed offset plus remaining length on 206, else the declared
/// length, else the caller's expectation, else 0.
fn derive_total(
    response: &reqwest::Response,
    partial: bool,
    existing_bytes: u64,
    expected_total: u64,
) -> u64 {
    let declared = response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|len| *len > 0);
    match declared {
        Some(remaining) if partial => existing_bytes.saturating_add(remaining),
        Some(len) => len,
        None => expected_total,
    }
}

async fn open_temp_file(path: &Path, append: bool) -> Result<File, DownloadError> {
    let result = if append {
        OpenOptions::new().create(true).append(true).open(path).await
    } else {
        File::create(path).await
    };
    result.map_err(|e| DownloadError::io(path, e))
}

async fn flush(writer: &mut BufWriter<File>, path: &Path) -> Result<(), DownloadError> {
    writer
        .flush()
        .await
        .map_err(|e| DownloadError::io(path, e))
}

async fn remove_if_exists(path: &Path) -> Result<(), DownloadError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(DownloadError::io(path, e)),
    }
}

/// Renames `from` to `to`, falling back to copy + delete across volumes.
async fn move_into_place(from: &Path, to: &Path) -> Result<(), DownloadError> {
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| DownloadError::io(parent, e))?;
    }
    if let Err(rename_error) = tokio::fs::rename(from, to).await {
        debug!(%rename_error, "rename failed; copying instead");
        tokio::fs::copy(from, to)
            .await
            .map_err(|e| DownloadError::io(to, e))?;
        remove_if_exists(from).await?;
    }
    Ok(())
}
