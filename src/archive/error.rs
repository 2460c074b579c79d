//! Error types for archive inspection and extraction.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can end an extraction.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// File system error while reading the archive or writing an entry.
    #[error("IO error at {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The zip container is corrupt or unsupported.
    #[error("corrupt zip archive {path}: {source}")]
    Zip {
        /// Archive path.
        path: PathBuf,
        /// The underlying zip error.
        #[source]
        source: zip::result::ZipError,
    },

    /// The 7z container is corrupt or unsupported.
    #[error("corrupt 7z archive {path}: {message}")]
    SevenZ {
        /// Archive path.
        path: PathBuf,
        /// Decoder error message.
        message: String,
    },

    /// The file does not start with a known archive signature.
    #[error("not an archive: {path}")]
    NotAnArchive {
        /// File path.
        path: PathBuf,
    },

    /// An entry path would resolve outside the game folder.
    #[error("unsafe entry path: {entry}")]
    UnsafeEntryPath {
        /// Entry name as stored in the archive.
        entry: String,
    },

    /// An entry declared a size but nothing was written.
    #[error("{entry} extracted as 0 bytes (expected {expected})")]
    ZeroByteEntry {
        /// Entry name as stored in the archive.
        entry: String,
        /// Declared uncompressed size.
        expected: u64,
    },

    /// Extraction stopped because cancellation was requested.
    #[error("extraction cancelled")]
    Cancelled,
}

impl ExtractError {
    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a zip container error.
    pub fn zip(path: impl Into<PathBuf>, source: zip::result::ZipError) -> Self {
        Self::Zip {
            path: path.into(),
            source,
        }
    }

    /// Creates a 7z container error.
    pub fn seven_z(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::SevenZ {
            path: path.into(),
            message: message.into(),
        }
    }

    /// True for [`ExtractError::Cancelled`].
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_byte_entry_display() {
        let err = ExtractError::ZeroByteEntry {
            entry: "Game/disc1.bin".to_string(),
            expected: 2048,
        };
        assert_eq!(err.to_string(), "Game/disc1.bin extracted as 0 bytes (expected 2048)");
    }

    #[test]
    fn test_cancelled_flag() {
        assert!(ExtractError::Cancelled.is_cancelled());
        assert!(!ExtractError::seven_z("/a.7z", "bad header").is_cancelled());
    }
}
