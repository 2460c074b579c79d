//! Error types for the download module.
//!
//! Every variant carries enough context (URL, path, status) to produce the
//! human-readable reason stored on a FAILED queue entry.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can end a transfer.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Network-level error (DNS resolution, connection refused, TLS, broken stream).
    #[error("network error downloading {url}: {source}")]
    Network {
        /// The URL that failed to download.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout downloading {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// Non-success HTTP response.
    #[error("HTTP {status} downloading {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The server answered with an error page or image instead of a game file.
    #[error("Invalid file type: {content_type}")]
    InvalidContentType {
        /// Declared content type of the response.
        content_type: String,
    },

    /// The declared size is below the minimum for a real game file.
    #[error("File too small to be a ROM: {total_bytes} bytes")]
    TooSmall {
        /// Declared total size.
        total_bytes: u64,
    },

    /// File system error while writing or moving the artifact.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The HTTP client could not be built from the configured options.
    #[error("failed to build HTTP client: {source}")]
    ClientBuild {
        /// The underlying builder error.
        #[source]
        source: reqwest::Error,
    },

    /// The provided URL is malformed or invalid.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },
}

impl DownloadError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates an invalid content type error.
    pub fn invalid_content_type(content_type: impl Into<String>) -> Self {
        Self::InvalidContentType {
            content_type: content_type.into(),
        }
    }

    /// Creates a below-minimum-size error.
    #[must_use]
    pub fn too_small(total_bytes: u64) -> Self {
        Self::TooSmall { total_bytes }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates a client construction error.
    pub fn client_build(source: reqwest::Error) -> Self {
        Self::ClientBuild { source }
    }

    /// True for wrong content type or below-minimum size.
    #[must_use]
    pub fn is_invalid_content(&self) -> bool {
        matches!(self, Self::InvalidContentType { .. } | Self::TooSmall { .. })
    }
}

// No `From<reqwest::Error>` / `From<std::io::Error>`: every variant needs the URL
// or path, which the source errors do not carry. Use the helper constructors.
