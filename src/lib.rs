//! Romfetch Core Library
//!
//! This library implements the download-and-install pipeline of a game
//! launcher: resumable, concurrent, persisted transfers of game files, and the
//! conversion of a downloaded archive into a launchable on-disk layout.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`db`] - Database connection and schema management
//! - [`queue`] - Persisted download queue
//! - [`storage`] - Free-space admission and platform directory resolution
//! - [`download`] - Resumable HTTP transfer of a single file
//! - [`archive`] - Archive inspection, extraction and multi-disc playlists
//! - [`manager`] - Queue orchestration tying the above together

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod archive;
pub mod db;
pub mod download;
pub mod manager;
pub mod queue;
pub mod storage;

#[cfg(test)]
pub mod test_support;

// Re-export commonly used types
pub use archive::{ArchiveExtractor, ArchiveInspector, ExtractError, ExtractionResult};
pub use db::{Database, DatabaseOptions, DbError};
pub use download::{DownloadError, DownloadOutcome, FetchRequest, ResumableDownloader};
pub use manager::{
    CompletionEvent, DownloadQueueManager, DownloadRequest, EnqueueOutcome, ManagerError,
    ManagerSettings, QueueSnapshot,
};
pub use queue::{DownloadState, QueueEntry, QueueError, QueueRepository, QueueStore};
pub use storage::{PlatformDirectories, StorageGuard};
