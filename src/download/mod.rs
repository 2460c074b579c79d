//! Resumable HTTP transfers of game files.
//!
//! # Features
//!
//! - Byte-range resume from an existing `.part` file
//! - Rejection of error pages, cover images and implausibly small bodies
//! - Throttled progress reporting (in-memory and persisted intervals)
//! - Cooperative cancellation that keeps partial bytes for a later resume
//! - Classification of stored failure reasons for manual retries
//!
//! # Example
//!
//! ```no_run
//! use romfetch_core::download::{DownloadOutcome, FetchRequest, NoopProgress, ResumableDownloader};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() {
//! let downloader = ResumableDownloader::new();
//! let request = FetchRequest {
//!     url: "https://example.com/roms/game.chd".to_string(),
//!     temp_path: "./downloads/psx/game.chd.part".into(),
//!     final_path: "./downloads/psx/game.chd".into(),
//!     expected_total: 0,
//! };
//! if let DownloadOutcome::Completed(done) = downloader
//!     .fetch(&request, &CancellationToken::new(), &NoopProgress)
//!     .await
//! {
//!     println!("Downloaded: {}", done.path.display());
//! }
//! # }
//! ```

mod client;
pub mod constants;
mod error;
pub mod filename;
mod progress;
mod retry;

pub use client::{CompletedTransfer, DownloadOutcome, FetchRequest, ResumableDownloader};
pub use error::DownloadError;
pub use filename::{
    extension_of, file_name_from_url, is_invalid_rom_file_name, partial_path, sanitize_filename,
};
pub use progress::{NoopProgress, ProgressSink, TransferProgress};
pub use retry::{
    EXTRACTION_FAILED_PREFIX, FailureType, classify_failure_reason, extraction_failure_reason,
    failure_reason,
};

// No module-local Result alias; use `Result<T, DownloadError>` explicitly.
