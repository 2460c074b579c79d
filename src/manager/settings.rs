//! User preferences that shape admission.

use super::error::ManagerError;

/// Lowest accepted concurrency limit.
pub const MIN_CONCURRENT_DOWNLOADS: usize = 1;

/// Highest accepted concurrency limit.
pub const MAX_CONCURRENT_DOWNLOADS: usize = 5;

/// Default concurrency limit.
pub const DEFAULT_MAX_CONCURRENT: usize = 1;

/// Default instant-download threshold (50 MB).
pub const DEFAULT_INSTANT_THRESHOLD_MB: u64 = 50;

/// Admission settings of a [`super::DownloadQueueManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerSettings {
    /// Transfers allowed to run at once.
    pub max_concurrent: usize,
    /// Requests with a known size below this start without waiting their turn.
    pub instant_threshold_bytes: u64,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            instant_threshold_bytes: DEFAULT_INSTANT_THRESHOLD_MB * 1024 * 1024,
        }
    }
}

impl ManagerSettings {
    /// Builds settings from a concurrency limit and a threshold in megabytes.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::InvalidConcurrency`] when `max_concurrent` is
    /// outside `1..=5`.
    pub fn new(max_concurrent: usize, instant_threshold_mb: u64) -> Result<Self, ManagerError> {
        let settings = Self {
            max_concurrent,
            instant_threshold_bytes: instant_threshold_mb.saturating_mul(1024 * 1024),
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Checks the concurrency range.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::InvalidConcurrency`] when out of range.
    pub fn validate(&self) -> Result<(), ManagerError> {
        if (MIN_CONCURRENT_DOWNLOADS..=MAX_CONCURRENT_DOWNLOADS).contains(&self.max_concurrent) {
            Ok(())
        } else {
            Err(ManagerError::InvalidConcurrency {
                value: self.max_concurrent,
            })
        }
    }

    /// True when a request of `expected_bytes` may skip the queue.
    ///
    /// Unknown sizes never qualify.
    #[must_use]
    pub fn is_instant(&self, expected_bytes: u64) -> bool {
        expected_bytes > 0 && expected_bytes < self.instant_threshold_bytes
    }
}
