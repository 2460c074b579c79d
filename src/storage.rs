//! Free-space admission and platform directory resolution.
//!
//! [`StorageGuard`] decides whether a transfer may (re)start on the volume that
//! holds its platform directory. [`PlatformDirectories`] decides where that
//! directory is.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

/// Space kept free on the volume after a transfer completes (50 MiB).
pub const STORAGE_BUFFER_BYTES: u64 = 50 * 1024 * 1024;

/// Source of free-space figures for a directory.
pub trait SpaceProbe: Send + Sync {
    /// Bytes available to the current user on the volume holding `dir`.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error when the volume cannot be queried.
    fn available_bytes(&self, dir: &Path) -> io::Result<u64>;
}

/// Queries the real filesystem through `fs2`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsSpaceProbe;

impl SpaceProbe for FsSpaceProbe {
    fn available_bytes(&self, dir: &Path) -> io::Result<u64> {
        // statvfs needs an existing path; walk up to the nearest ancestor that exists.
        let mut probe = dir;
        while !probe.exists() {
            match probe.parent() {
                Some(parent) => probe = parent,
                None => break,
            }
        }
        fs2::available_space(probe)
    }
}

/// Admission check for transfers.
#[derive(Clone)]
pub struct StorageGuard {
    probe: Arc<dyn SpaceProbe>,
    buffer_bytes: u64,
}

impl fmt::Debug for StorageGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageGuard")
            .field("buffer_bytes", &self.buffer_bytes)
            .finish_non_exhaustive()
    }
}

impl Default for StorageGuard {
    fn default() -> Self {
        Self::new(Arc::new(FsSpaceProbe))
    }
}

impl StorageGuard {
    /// Creates a guard over `probe` with the standard safety buffer.
    #[must_use]
    pub fn new(probe: Arc<dyn SpaceProbe>) -> Self {
        Self {
            probe,
            buffer_bytes: STORAGE_BUFFER_BYTES,
        }
    }

    /// Safety buffer in bytes.
    #[must_use]
    pub fn buffer_bytes(&self) -> u64 {
        self.buffer_bytes
    }

    /// Available bytes for `dir`; 0 when the volume cannot be queried.
    #[must_use]
    pub fn available(&self, dir: &Path) -> u64 {
        match self.probe.available_bytes(dir) {
            Ok(bytes) => bytes,
            Err(error) => {
                warn!(dir = %dir.display(), %error, "free space query failed");
                0
            }
        }
    }

    /// True when `available` covers `required` plus the safety buffer.
    #[must_use]
    pub fn fits(&self, required: u64, available: u64) -> bool {
        available >= required.saturating_add(self.buffer_bytes)
    }

    /// Queries `dir` and checks whether `required` more bytes fit.
    #[must_use]
    pub fn check(&self, dir: &Path, required: u64) -> StorageCheck {
        let available = self.available(dir);
        let fits = self.fits(required, available);
        debug!(dir = %dir.display(), required, available, fits, "storage check");
        StorageCheck {
            required,
            available,
            fits,
        }
    }
}

/// Outcome of one [`StorageGuard::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageCheck {
    /// Bytes still to be written.
    pub required: u64,
    /// Bytes free on the volume.
    pub available: u64,
    /// Whether the transfer may start.
    pub fits: bool,
}

/// Resolves the directory a platform's files are written to.
///
/// Resolution order: per-platform override, global storage root, app-private default.
#[derive(Debug, Clone, Default)]
pub struct PlatformDirectories {
    overrides: HashMap<String, PathBuf>,
    storage_root: Option<PathBuf>,
    default_root: PathBuf,
}

impl PlatformDirectories {
    /// Creates a resolver whose last-resort root is `default_root`.
    #[must_use]
    pub fn new(default_root: impl Into<PathBuf>) -> Self {
        Self {
            overrides: HashMap::new(),
            storage_root: None,
            default_root: default_root.into(),
        }
    }

    /// Sets the user's global storage root.
    #[must_use]
    pub fn with_storage_root(mut self, root: Option<PathBuf>) -> Self {
        self.storage_root = root;
        self
    }

    /// Adds a per-platform override; the path is used as the platform directory itself.
    #[must_use]
    pub fn with_override(mut self, platform_slug: &str, dir: impl Into<PathBuf>) -> Self {
        self.overrides
            .insert(platform_slug.to_ascii_lowercase(), dir.into());
        self
    }

    /// Root that platform directories are created under when not overridden.
    #[must_use]
    pub fn root(&self) -> &Path {
        self.storage_root.as_deref().unwrap_or(&self.default_root)
    }

    /// Directory for `platform_slug`.
    #[must_use]
    pub fn platform_dir(&self, platform_slug: &str) -> PathBuf {
        if let Some(dir) = self.overrides.get(&platform_slug.to_ascii_lowercase()) {
            return dir.clone();
        }
        self.root().join(platform_slug)
    }
}
