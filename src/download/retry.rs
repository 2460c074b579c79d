//! Failure classification for manual retries.
//!
//! Failed entries are never retried automatically. When the user asks for a
//! retry, the stored reason string decides what happens:
//! - [`FailureType::Transient`] - re-queue and download again
//! - [`FailureType::Permanent`] - the remote side will not change; leave FAILED
//! - [`FailureType::Extraction`] - the artifact is on disk; rerun extraction only
//!
//! # Example
//!
//! ```
//! use romfetch_core::download::{FailureType, classify_failure_reason};
//!
//! assert_eq!(classify_failure_reason("HTTP 404 downloading https://x/y.zip"), FailureType::Permanent);
//! assert_eq!(classify_failure_reason("timeout downloading https://x/y.zip"), FailureType::Transient);
//! ```

use tracing::instrument;

use super::DownloadError;

/// Prefix of every extraction failure reason.
pub const EXTRACTION_FAILED_PREFIX: &str = "Extraction failed";

/// Lower-cased reason fragments that mark a permanent remote-side problem.
const PERMANENT_MARKERS: &[&str] = &["not found", "http 400", "http 404"];

/// Classification of a failed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// May succeed on a fresh attempt.
    Transient,
    /// Bad request or missing resource; retrying wastes bandwidth.
    Permanent,
    /// Download succeeded but unpacking failed.
    Extraction,
}

impl FailureType {
    /// Whether a manual retry should act on this failure.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        !matches!(self, Self::Permanent)
    }
}

/// Classifies a persisted failure reason.
#[instrument(level = "debug")]
pub fn classify_failure_reason(reason: &str) -> FailureType {
    if reason.starts_with(EXTRACTION_FAILED_PREFIX) {
        return FailureType::Extraction;
    }
    let lowered = reason.to_lowercase();
    if PERMANENT_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
    {
        FailureType::Permanent
    } else {
        FailureType::Transient
    }
}

/// Human-readable reason stored on a FAILED entry for a transfer error.
#[must_use]
pub fn failure_reason(error: &DownloadError) -> String {
    match error {
        DownloadError::HttpStatus { status: 404, .. } => format!("{error} (not found)"),
        _ => error.to_string(),
    }
}

/// Reason stored when extraction of a downloaded artifact fails.
#[must_use]
pub fn extraction_failure_reason(detail: &str) -> String {
    format!("{EXTRACTION_FAILED_PREFIX}: {detail}")
}
