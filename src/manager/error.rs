//! Error types for queue manager operations.

use std::path::PathBuf;

use thiserror::Error;

use crate::queue::{QueueDbErrorKind, QueueError};

use super::settings::{MAX_CONCURRENT_DOWNLOADS, MIN_CONCURRENT_DOWNLOADS};

/// Errors returned by [`super::DownloadQueueManager`].
#[derive(Debug, Error)]
pub enum ManagerError {
    /// An unfinished entry already exists for the same game or disc.
    #[error("download already queued for {target}")]
    Duplicate {
        /// `game <id>` or `disc <id>`.
        target: String,
    },

    /// The request cannot be turned into a queue entry.
    #[error("invalid download request: {reason}")]
    InvalidRequest {
        /// What is wrong with the request.
        reason: String,
    },

    /// Concurrency limit outside the supported range.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENT_DOWNLOADS} and {MAX_CONCURRENT_DOWNLOADS}"
    )]
    InvalidConcurrency {
        /// The rejected value.
        value: usize,
    },

    /// No queue entry with this id.
    #[error("queue entry not found: id {0}")]
    NotFound(i64),

    /// The downloaded artifact needed for re-extraction is gone.
    #[error("downloaded file missing: {}", path.display())]
    ArtifactMissing {
        /// Where the artifact was expected.
        path: PathBuf,
    },

    /// Persistence failed.
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
}

impl ManagerError {
    /// Creates an invalid request error.
    pub fn invalid_request(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }

    /// Duplicate error for a whole-game or disc download.
    #[must_use]
    pub fn duplicate(game_id: i64, disc_id: Option<i64>) -> Self {
        let target = match disc_id {
            Some(disc_id) => format!("disc {disc_id}"),
            None => format!("game {game_id}"),
        };
        Self::Duplicate { target }
    }

    /// Maps a unique-index violation on insert to [`ManagerError::Duplicate`].
    pub(crate) fn from_insert(error: QueueError, game_id: i64, disc_id: Option<i64>) -> Self {
        match error {
            QueueError::Database {
                kind: QueueDbErrorKind::ConstraintViolation,
                ..
            } => Self::duplicate(game_id, disc_id),
            other => Self::Queue(other),
        }
    }

    /// Returns true when the request was rejected as a duplicate.
    #[must_use]
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate { .. })
    }
}
