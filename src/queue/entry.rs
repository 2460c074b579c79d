//! Queue entry types and state definitions.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Lifecycle state of a queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadState {
    /// Waiting for a free download slot.
    Queued,
    /// Parked until enough free space is available.
    WaitingForStorage,
    /// Transfer in flight.
    Downloading,
    /// Downloaded artifact is being unpacked or organized.
    Extracting,
    /// Transfer stopped with partial bytes kept for resume.
    Paused,
    /// Finished successfully.
    Completed,
    /// Stopped with an error reason.
    Failed,
    /// Removed by the user.
    Cancelled,
}

impl DownloadState {
    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::WaitingForStorage => "waiting_for_storage",
            Self::Downloading => "downloading",
            Self::Extracting => "extracting",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// True while an entry occupies a download slot.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Downloading | Self::Extracting)
    }

    /// True for states that never change without an explicit request.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl fmt::Display for DownloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DownloadState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "waiting_for_storage" => Ok(Self::WaitingForStorage),
            "downloading" => Ok(Self::Downloading),
            "extracting" => Ok(Self::Extracting),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("invalid download state: {s}")),
        }
    }
}

/// Values needed to insert a new queue row.
#[derive(Debug, Clone)]
pub struct NewQueueEntry {
    /// Local game identity.
    pub game_id: i64,
    /// Remote catalog identity.
    pub remote_id: i64,
    /// Disc identity for multi-disc sub-downloads.
    pub disc_id: Option<i64>,
    /// Disc ordinal for multi-disc sub-downloads.
    pub disc_number: Option<i64>,
    /// Remote fetch target.
    pub download_url: String,
    /// Final artifact file name.
    pub file_name: String,
    /// Human-readable title, also used for the game folder name.
    pub display_title: String,
    /// Platform slug, e.g. `psx` or `switch`.
    pub platform_slug: String,
    /// Cover art path, display only.
    pub cover_path: Option<String>,
    /// Expected size in bytes, 0 when unknown.
    pub total_bytes: i64,
    /// Initial state, normally [`DownloadState::Queued`].
    pub state: DownloadState,
    /// Partial-transfer path (`<file_name>.part` under the platform directory).
    pub temp_file_path: PathBuf,
}

/// A single row of the download queue.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct QueueEntry {
    /// Unique identifier.
    pub id: i64,
    pub game_id: i64,
    pub remote_id: i64,
    pub disc_id: Option<i64>,
    pub disc_number: Option<i64>,
    pub download_url: String,
    pub file_name: String,
    pub display_title: String,
    pub platform_slug: String,
    pub cover_path: Option<String>,
    /// Bytes currently written to the temp file.
    pub bytes_downloaded: i64,
    /// Expected total size, 0 until known.
    pub total_bytes: i64,
    /// Current state (stored as text, parsed via `state()`).
    #[sqlx(rename = "state")]
    #[serde(rename = "state")]
    pub state_str: String,
    /// Failure reason, only set while FAILED.
    pub error_reason: Option<String>,
    pub temp_file_path: String,
    pub created_at: String,
    pub updated_at: String,
}

impl QueueEntry {
    /// Returns the parsed state enum.
    ///
    /// Falls back to `Queued` if the stored string is invalid.
    #[must_use]
    pub fn state(&self) -> DownloadState {
        self.state_str.parse().unwrap_or(DownloadState::Queued)
    }

    /// Updates the in-memory state string.
    pub fn set_state(&mut self, state: DownloadState) {
        self.state_str = state.as_str().to_string();
    }

    /// True for disc sub-downloads of a multi-disc title.
    #[must_use]
    pub fn is_disc_download(&self) -> bool {
        self.disc_id.is_some()
    }

    /// Bytes still to be fetched, used for storage admission.
    #[must_use]
    pub fn remaining_bytes(&self) -> u64 {
        u64::try_from(self.total_bytes.saturating_sub(self.bytes_downloaded)).unwrap_or(0)
    }

    /// Path of the partial transfer file.
    #[must_use]
    pub fn temp_path(&self) -> PathBuf {
        PathBuf::from(&self.temp_file_path)
    }
}
