//! Streaming extraction of game archives into titled game folders.
//!
//! Every file entry is written to `<platform_dir>/<sanitized title>/<relative path>`.
//! Root-level files are classified while they are written so the launch file
//! can be resolved without a second pass over the folder.

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};

use sevenz_rust::{Password, SevenZReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use zip::ZipArchive;

use super::error::ExtractError;
use super::inspector::{ArchiveKind, is_metadata_noise};
use super::platform::is_game_extension;
use super::playlist::{
    DISC_EXTENSIONS, DiscPlaylistBuilder, PLAYLIST_EXTENSION, is_compressed_disc_file,
    is_disc_file, is_sheet_file,
};
use crate::download::extension_of;

/// Progress is reported each time this many more bytes are written (1 MiB).
pub const EXTRACT_PROGRESS_STEP: u64 = 1024 * 1024;

const COPY_BUFFER_SIZE: usize = 64 * 1024;
const MAX_TITLE_CHARS: usize = 200;

/// Makes a game title safe to use as a single folder name.
///
/// Reserved characters become `_`, whitespace runs collapse to one space, and
/// the result is trimmed and capped at 200 characters.
#[must_use]
pub fn sanitize_title(title: &str) -> String {
    let replaced: String = title
        .chars()
        .map(|c| match c {
            '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect();
    replaced
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(MAX_TITLE_CHARS)
        .collect::<String>()
        .trim_end()
        .to_string()
}

/// Relative output path of an archive entry; `None` when it escapes the folder.
fn safe_entry_path(name: &str) -> Option<PathBuf> {
    let normalized = name.replace('\\', "/");
    let mut relative = PathBuf::new();
    for component in Path::new(&normalized).components() {
        match component {
            Component::Normal(segment) => relative.push(segment),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    (!relative.as_os_str().is_empty()).then_some(relative)
}

/// Files produced by one extraction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionResult {
    /// First root-level game file that is not a disc image or playlist.
    pub primary_file: Option<PathBuf>,
    /// Launchable discs, ordered by disc number.
    pub disc_files: Vec<PathBuf>,
    /// Reused or generated playlist.
    pub playlist_file: Option<PathBuf>,
    /// Folder every entry was written into.
    pub game_folder: PathBuf,
    /// Every written file, in archive order.
    pub all_extracted_files: Vec<PathBuf>,
}

impl ExtractionResult {
    /// File an emulator should be pointed at.
    ///
    /// Playlist, then a cue/gdi sheet, then a compressed disc image, then the
    /// primary file, then the first disc, then any disc image found anywhere in
    /// the folder, then the folder itself.
    #[must_use]
    pub fn launch_path(&self) -> PathBuf {
        self.playlist_file
            .clone()
            .or_else(|| self.disc_files.iter().find(|p| is_sheet_file(p)).cloned())
            .or_else(|| {
                self.disc_files
                    .iter()
                    .find(|p| is_compressed_disc_file(p))
                    .cloned()
            })
            .or_else(|| self.primary_file.clone())
            .or_else(|| self.disc_files.first().cloned())
            .or_else(|| {
                self.all_extracted_files
                    .iter()
                    .find(|p| is_disc_file(p))
                    .cloned()
            })
            .unwrap_or_else(|| self.game_folder.clone())
    }
}

/// Writes entries and tracks classification and progress for one extraction.
struct EntrySink<'a> {
    game_folder: PathBuf,
    total_bytes: u64,
    bytes_written: u64,
    last_reported: u64,
    cancel: &'a CancellationToken,
    on_progress: &'a mut dyn FnMut(u64, u64),
    all_files: Vec<PathBuf>,
    disc_candidates: Vec<PathBuf>,
    primary_file: Option<PathBuf>,
    existing_playlist: Option<PathBuf>,
}

impl EntrySink<'_> {
    fn check_cancelled(&self) -> Result<(), ExtractError> {
        if self.cancel.is_cancelled() {
            Err(ExtractError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn write_entry(
        &mut self,
        name: &str,
        declared_size: u64,
        is_dir: bool,
        reader: &mut dyn Read,
    ) -> Result<(), ExtractError> {
        self.check_cancelled()?;
        if is_metadata_noise(name) {
            debug!(entry = name, "skipping metadata entry");
            io::copy(reader, &mut io::sink()).map_err(|e| ExtractError::io(name, e))?;
            return Ok(());
        }
        let relative = safe_entry_path(name).ok_or_else(|| ExtractError::UnsafeEntryPath {
            entry: name.to_string(),
        })?;
        let destination = self.game_folder.join(&relative);

        if is_dir {
            fs::create_dir_all(&destination).map_err(|e| ExtractError::io(&destination, e))?;
            return Ok(());
        }
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).map_err(|e| ExtractError::io(parent, e))?;
        }

        let written = self.copy_entry(reader, &destination)?;
        if written == 0 && declared_size > 0 {
            return Err(ExtractError::ZeroByteEntry {
                entry: name.to_string(),
                expected: declared_size,
            });
        }
        debug!(entry = name, expected = declared_size, written, "extracted entry");

        if relative.components().count() == 1 {
            self.classify_root_file(&destination);
        }
        self.all_files.push(destination);
        Ok(())
    }

    fn copy_entry(&mut self, reader: &mut dyn Read, destination: &Path) -> Result<u64, ExtractError> {
        let file = File::create(destination).map_err(|e| ExtractError::io(destination, e))?;
        let mut writer = BufWriter::with_capacity(COPY_BUFFER_SIZE, file);
        let mut buffer = vec![0_u8; COPY_BUFFER_SIZE];
        let mut written: u64 = 0;
        loop {
            self.check_cancelled()?;
            let read = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(read) => read,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ExtractError::io(destination, e)),
            };
            writer
                .write_all(&buffer[..read])
                .map_err(|e| ExtractError::io(destination, e))?;
            written += read as u64;
            self.bytes_written += read as u64;
            if self.bytes_written - self.last_reported >= EXTRACT_PROGRESS_STEP {
                self.last_reported = self.bytes_written;
                (self.on_progress)(self.bytes_written, self.total_bytes);
            }
        }
        writer.flush().map_err(|e| ExtractError::io(destination, e))?;
        Ok(written)
    }

    fn classify_root_file(&mut self, path: &Path) {
        let Some(ext) = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(extension_of)
        else {
            return;
        };
        if ext == PLAYLIST_EXTENSION {
            self.existing_playlist = Some(path.to_path_buf());
        } else if DISC_EXTENSIONS.contains(&ext.as_str()) {
            self.disc_candidates.push(path.to_path_buf());
        } else if self.primary_file.is_none() && is_game_extension(&ext) {
            self.primary_file = Some(path.to_path_buf());
        }
    }
}

/// Unpacks archives into per-game folders.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArchiveExtractor {
    playlist_builder: DiscPlaylistBuilder,
}

impl ArchiveExtractor {
    /// Folder a game titled `title` is installed into.
    #[must_use]
    pub fn game_folder(platform_dir: &Path, title: &str) -> PathBuf {
        platform_dir.join(sanitize_title(title))
    }

    /// Extracts `archive` into `<platform_dir>/<title>/` and resolves its launch files.
    ///
    /// `on_progress` receives `(bytes_written, total_bytes)` every
    /// [`EXTRACT_PROGRESS_STEP`] bytes. The token is checked before every
    /// entry and every copied chunk.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError`] for corrupt archives, unsafe entry paths,
    /// zero-byte outputs, I/O failures and cancellation.
    #[instrument(skip(self, cancel, on_progress), fields(archive = %archive.display()))]
    pub fn extract(
        &self,
        archive: &Path,
        kind: ArchiveKind,
        title: &str,
        platform_dir: &Path,
        cancel: &CancellationToken,
        on_progress: &mut dyn FnMut(u64, u64),
    ) -> Result<ExtractionResult, ExtractError> {
        let mut folder_title = sanitize_title(title);
        if folder_title.is_empty() {
            folder_title = archive
                .file_stem()
                .and_then(|stem| stem.to_str())
                .map(sanitize_title)
                .filter(|stem| !stem.is_empty())
                .unwrap_or_else(|| "game".to_string());
        }
        let game_folder = platform_dir.join(&folder_title);
        fs::create_dir_all(&game_folder).map_err(|e| ExtractError::io(&game_folder, e))?;
        info!(folder = %game_folder.display(), ?kind, "extracting archive");

        let mut sink = EntrySink {
            game_folder: game_folder.clone(),
            total_bytes: 0,
            bytes_written: 0,
            last_reported: 0,
            cancel,
            on_progress,
            all_files: Vec::new(),
            disc_candidates: Vec::new(),
            primary_file: None,
            existing_playlist: None,
        };
        match kind {
            ArchiveKind::Zip => extract_zip(archive, &mut sink)?,
            ArchiveKind::SevenZ => extract_seven_z(archive, &mut sink)?,
        }
        if sink.bytes_written != sink.last_reported {
            (sink.on_progress)(sink.bytes_written, sink.total_bytes);
        }

        let plan = self
            .playlist_builder
            .build(
                &game_folder,
                &folder_title,
                &sink.disc_candidates,
                sink.existing_playlist.as_deref(),
            )
            .map_err(|e| ExtractError::io(&game_folder, e))?;

        let result = ExtractionResult {
            primary_file: sink.primary_file,
            disc_files: plan.launchables,
            playlist_file: plan.playlist,
            game_folder,
            all_extracted_files: sink.all_files,
        };
        info!(
            files = result.all_extracted_files.len(),
            discs = result.disc_files.len(),
            launch = %result.launch_path().display(),
            "extraction complete"
        );
        Ok(result)
    }
}

fn extract_zip(archive_path: &Path, sink: &mut EntrySink<'_>) -> Result<(), ExtractError> {
    let file = File::open(archive_path).map_err(|e| ExtractError::io(archive_path, e))?;
    let mut archive = ZipArchive::new(file).map_err(|e| ExtractError::zip(archive_path, e))?;

    for index in 0..archive.len() {
        let entry = archive
            .by_index_raw(index)
            .map_err(|e| ExtractError::zip(archive_path, e))?;
        if !entry.is_dir() {
            sink.total_bytes += entry.size();
        }
    }

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| ExtractError::zip(archive_path, e))?;
        let name = entry.name().to_string();
        let size = entry.size();
        let is_dir = entry.is_dir();
        sink.write_entry(&name, size, is_dir, &mut entry)?;
    }
    Ok(())
}

fn extract_seven_z(archive_path: &Path, sink: &mut EntrySink<'_>) -> Result<(), ExtractError> {
    let mut reader = SevenZReader::open(archive_path, Password::empty())
        .map_err(|e| ExtractError::seven_z(archive_path, e.to_string()))?;
    sink.total_bytes = reader
        .archive()
        .files
        .iter()
        .filter(|entry| !entry.is_directory())
        .map(|entry| entry.size())
        .sum();

    let mut failure: Option<ExtractError> = None;
    let walk = reader.for_each_entries(|entry, entry_reader| {
        match sink.write_entry(entry.name(), entry.size(), entry.is_directory(), entry_reader) {
            Ok(()) => Ok(true),
            Err(error) => {
                failure = Some(error);
                Ok(false)
            }
        }
    });
    if let Some(error) = failure {
        return Err(error);
    }
    walk.map_err(|e| ExtractError::seven_z(archive_path, e.to_string()))
}

/// Removes a partially extracted game folder, logging instead of failing.
pub fn discard_game_folder(game_folder: &Path) {
    if let Err(error) = fs::remove_dir_all(game_folder)
        && error.kind() != io::ErrorKind::NotFound
    {
        warn!(folder = %game_folder.display(), %error, "cannot remove partial game folder");
    }
}
