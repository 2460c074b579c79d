//! Archive type sniffing and the extract-or-keep decision.

use std::collections::HashSet;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use sevenz_rust::{Password, SevenZReader};
use tracing::{debug, instrument, warn};
use zip::ZipArchive;

use super::error::ExtractError;

const ZIP_MAGIC: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];
const SEVEN_Z_MAGIC: [u8; 6] = [0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C];

/// Platforms whose emulators load the archive itself as the ROM.
pub const NATIVE_ARCHIVE_PLATFORMS: &[&str] =
    &["arcade", "mame", "fbneo", "neogeo", "cps1", "cps2", "cps3"];

/// Container formats the extractor understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    SevenZ,
}

/// One file or directory record inside an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Path as stored in the archive, `/`-separated.
    pub name: String,
    /// Declared uncompressed size.
    pub size: u64,
    /// Directory record.
    pub is_dir: bool,
}

impl ArchiveEntry {
    /// True for resource-fork and Finder metadata that is never extracted.
    #[must_use]
    pub fn is_metadata_noise(&self) -> bool {
        is_metadata_noise(&self.name)
    }

    /// True when the entry sits inside a folder.
    #[must_use]
    pub fn is_nested(&self) -> bool {
        self.name.trim_end_matches('/').contains('/')
    }
}

/// `__MACOSX/` trees and `._` AppleDouble files.
pub(crate) fn is_metadata_noise(name: &str) -> bool {
    let normalized = name.replace('\\', "/");
    if normalized.starts_with("__MACOSX/") || normalized.contains("/__MACOSX/") {
        return true;
    }
    normalized
        .rsplit('/')
        .find(|segment| !segment.is_empty())
        .is_some_and(|base| base.starts_with("._"))
}

/// Reads the leading bytes of `path` and matches archive signatures.
///
/// Missing or short files are not archives.
pub fn detect_archive_kind(path: &Path) -> io::Result<Option<ArchiveKind>> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let mut header = [0_u8; 6];
    let mut filled = 0;
    while filled < header.len() {
        let read = file.read(&mut header[filled..])?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    if filled >= SEVEN_Z_MAGIC.len() && header == SEVEN_Z_MAGIC {
        return Ok(Some(ArchiveKind::SevenZ));
    }
    if filled >= ZIP_MAGIC.len() && header[..4] == ZIP_MAGIC {
        return Ok(Some(ArchiveKind::Zip));
    }
    Ok(None)
}

/// Lists every record of an archive.
///
/// # Errors
///
/// Returns [`ExtractError`] when the archive cannot be opened or parsed.
pub fn list_entries(path: &Path, kind: ArchiveKind) -> Result<Vec<ArchiveEntry>, ExtractError> {
    match kind {
        ArchiveKind::Zip => {
            let file = File::open(path).map_err(|e| ExtractError::io(path, e))?;
            let mut archive = ZipArchive::new(file).map_err(|e| ExtractError::zip(path, e))?;
            let mut entries = Vec::with_capacity(archive.len());
            for index in 0..archive.len() {
                let entry = archive
                    .by_index_raw(index)
                    .map_err(|e| ExtractError::zip(path, e))?;
                entries.push(ArchiveEntry {
                    name: entry.name().to_string(),
                    size: entry.size(),
                    is_dir: entry.is_dir(),
                });
            }
            Ok(entries)
        }
        ArchiveKind::SevenZ => {
            let reader = SevenZReader::open(path, Password::empty())
                .map_err(|e| ExtractError::seven_z(path, e.to_string()))?;
            Ok(reader
                .archive()
                .files
                .iter()
                .map(|entry| ArchiveEntry {
                    name: entry.name().to_string(),
                    size: entry.size(),
                    is_dir: entry.is_directory(),
                })
                .collect())
        }
    }
}

/// Decides whether a downloaded file should be unpacked.
#[derive(Debug, Clone)]
pub struct ArchiveInspector {
    native_archive_platforms: HashSet<String>,
}

impl Default for ArchiveInspector {
    fn default() -> Self {
        Self::with_native_platforms(NATIVE_ARCHIVE_PLATFORMS.iter().copied())
    }
}

impl ArchiveInspector {
    /// Creates an inspector with a custom native-archive allow-list.
    pub fn with_native_platforms<I, S>(platforms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            native_archive_platforms: platforms
                .into_iter()
                .map(|slug| slug.as_ref().to_ascii_lowercase())
                .collect(),
        }
    }

    /// True when `platform_slug` keeps archives packed.
    #[must_use]
    pub fn is_native_archive_platform(&self, platform_slug: &str) -> bool {
        self.native_archive_platforms
            .contains(&platform_slug.to_ascii_lowercase())
    }

    /// Archive kind of `path`, `None` for non-archives and unreadable files.
    #[must_use]
    pub fn archive_kind(&self, path: &Path) -> Option<ArchiveKind> {
        match detect_archive_kind(path) {
            Ok(kind) => kind,
            Err(error) => {
                warn!(path = %path.display(), %error, "cannot read archive header");
                None
            }
        }
    }

    /// Returns the archive kind when `path` should be extracted for `platform_slug`.
    ///
    /// Extraction happens for archives holding more than one file or any file
    /// inside a folder. Native-archive platforms, single flat entries, empty
    /// archives and non-archives are left as they are.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError`] when the header cannot be read, or when the
    /// file carries an archive signature but its entries cannot be listed.
    #[instrument(skip(self), fields(path = %path.display()))]
    pub fn extraction_kind(
        &self,
        path: &Path,
        platform_slug: &str,
    ) -> Result<Option<ArchiveKind>, ExtractError> {
        if self.is_native_archive_platform(platform_slug) {
            debug!("native archive platform; keeping archive");
            return Ok(None);
        }
        let Some(kind) = detect_archive_kind(path).map_err(|e| ExtractError::io(path, e))? else {
            return Ok(None);
        };
        let entries = list_entries(path, kind)?;
        let files: Vec<&ArchiveEntry> = entries
            .iter()
            .filter(|entry| !entry.is_dir && !entry.is_metadata_noise())
            .collect();
        let extract = files.len() > 1 || files.iter().any(|entry| entry.is_nested());
        debug!(files = files.len(), extract, "inspected archive");
        Ok(extract.then_some(kind))
    }

    /// True when `path` should be extracted for `platform_slug`.
    ///
    /// Corrupt archives count as not extractable here; use
    /// [`ArchiveInspector::extraction_kind`] to see the error.
    #[must_use]
    pub fn should_extract(&self, path: &Path, platform_slug: &str) -> bool {
        matches!(self.extraction_kind(path, platform_slug), Ok(Some(_)))
    }
}
