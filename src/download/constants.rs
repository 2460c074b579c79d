//! Constants for the download module (timeouts, buffers, throttling, content checks).

use std::time::Duration;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout (5 minutes for large files).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Write buffer size for streaming response bodies to disk.
pub const DOWNLOAD_BUFFER_SIZE: usize = 64 * 1024;

/// Minimum gap between in-memory progress updates.
pub const UI_UPDATE_INTERVAL: Duration = Duration::from_millis(500);

/// Minimum gap between persisted progress checkpoints.
pub const DB_UPDATE_INTERVAL: Duration = Duration::from_secs(5);

/// Content type prefixes that indicate an error page rather than a game file.
pub const INVALID_CONTENT_TYPES: &[&str] = &["image/", "text/html"];

/// Anything smaller than this is not a real game file.
pub const MIN_ROM_SIZE_BYTES: u64 = 1024;

/// Suffix appended to the final file name while a transfer is in flight.
pub const PARTIAL_SUFFIX: &str = ".part";
