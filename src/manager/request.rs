//! Enqueue request and its outcome.

use serde::{Deserialize, Serialize};

/// A game file the caller wants downloaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRequest {
    /// Local game identity.
    pub game_id: i64,
    /// Remote catalog identity.
    pub remote_id: i64,
    /// Set for one disc of a multi-disc title.
    pub disc_id: Option<i64>,
    /// Disc ordinal, display only.
    pub disc_number: Option<i64>,
    /// Remote file URL.
    pub url: String,
    /// Final file name; derived from the URL when absent.
    pub file_name: Option<String>,
    /// Game title, also used for the install folder name.
    pub display_title: String,
    /// Platform slug, e.g. `psx`.
    pub platform_slug: String,
    /// Cover art path, display only.
    pub cover_path: Option<String>,
    /// Size reported by the catalog, 0 when unknown.
    pub expected_size: u64,
}

impl DownloadRequest {
    /// Whole-game request with the required fields.
    pub fn new(
        game_id: i64,
        remote_id: i64,
        url: impl Into<String>,
        display_title: impl Into<String>,
        platform_slug: impl Into<String>,
    ) -> Self {
        Self {
            game_id,
            remote_id,
            disc_id: None,
            disc_number: None,
            url: url.into(),
            file_name: None,
            display_title: display_title.into(),
            platform_slug: platform_slug.into(),
            cover_path: None,
            expected_size: 0,
        }
    }

    /// Sets the catalog size.
    #[must_use]
    pub fn with_expected_size(mut self, bytes: u64) -> Self {
        self.expected_size = bytes;
        self
    }

    /// Sets an explicit file name.
    #[must_use]
    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    /// Marks the request as one disc of a multi-disc title.
    #[must_use]
    pub fn with_disc(mut self, disc_id: i64, disc_number: i64) -> Self {
        self.disc_id = Some(disc_id);
        self.disc_number = Some(disc_number);
        self
    }
}

/// What [`super::DownloadQueueManager::enqueue`] did with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "id", rename_all = "snake_case")]
pub enum EnqueueOutcome {
    /// Appended as QUEUED; admission follows queue order.
    Queued(i64),
    /// Below the instant threshold and started right away.
    Started(i64),
}

impl EnqueueOutcome {
    /// Queue entry id.
    #[must_use]
    pub fn id(self) -> i64 {
        match self {
            Self::Queued(id) | Self::Started(id) => id,
        }
    }
}
