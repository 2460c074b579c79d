//! Per-platform layout conventions for installed games.
//!
//! Some platforms keep updates and DLC next to the base game in `update/` and
//! `dlc/` folders. These helpers locate those folders from the installed
//! game's launch file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, instrument};

use super::extractor::sanitize_title;
use crate::download::extension_of;

/// Extensions recognised as a primary launchable game file.
#[rustfmt::skip]
pub const GAME_EXTENSIONS: &[&str] = &[
    // Nintendo Switch
    "xci", "nsp", "nca", "nro",
    // Nintendo 3DS
    "3ds", "cci", "cxi", "cia",
    // Nintendo DS
    "nds", "dsi",
    // Nintendo Wii / Wii U
    "wbfs", "wua", "wud", "wux", "wup", "rpx", "iso", "ciso", "wia", "rvz",
    // PlayStation
    "chd", "cue", "bin", "img", "mdf", "pbp", "vpk",
    // Sega
    "gdi", "cdi",
    // Generic containers
    "zip", "7z",
];

/// Folder layout of a platform that ships updates and DLC as separate files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformLayout {
    pub platform_slugs: &'static [&'static str],
    pub game_extensions: &'static [&'static str],
    pub update_extensions: &'static [&'static str],
    pub dlc_extensions: &'static [&'static str],
    pub update_folder: &'static str,
    pub dlc_folder: &'static str,
}

const SWITCH_SLUGS: &[&str] = &["switch", "nsw"];
const DEFAULT_UPDATE_EXTENSIONS: &[&str] = &["nsp"];

static PLATFORM_LAYOUTS: &[PlatformLayout] = &[
    PlatformLayout {
        platform_slugs: SWITCH_SLUGS,
        game_extensions: &["xci", "nsp", "nca", "nro"],
        update_extensions: &["nsp"],
        dlc_extensions: &["nsp"],
        update_folder: "update",
        dlc_folder: "dlc",
    },
    PlatformLayout {
        platform_slugs: &["vita", "psvita"],
        game_extensions: &["vpk", "zip"],
        update_extensions: &["vpk"],
        dlc_extensions: &["vpk"],
        update_folder: "update",
        dlc_folder: "dlc",
    },
    PlatformLayout {
        platform_slugs: &["wiiu"],
        game_extensions: &["wua", "wud", "wux", "wup", "rpx"],
        update_extensions: &["wup"],
        dlc_extensions: &["wup"],
        update_folder: "update",
        dlc_folder: "dlc",
    },
    PlatformLayout {
        platform_slugs: &["wii"],
        game_extensions: &["wbfs", "iso", "ciso", "wia", "rvz"],
        update_extensions: &["wad"],
        dlc_extensions: &["wad"],
        update_folder: "update",
        dlc_folder: "dlc",
    },
];

/// True when `extension` (lower-case, no dot) is a launchable game file.
#[must_use]
pub fn is_game_extension(extension: &str) -> bool {
    GAME_EXTENSIONS.contains(&extension)
}

/// True for Nintendo Switch slugs.
#[must_use]
pub fn is_switch_platform(platform_slug: &str) -> bool {
    SWITCH_SLUGS.contains(&platform_slug.to_ascii_lowercase().as_str())
}

/// Layout for `platform_slug`, if it has one.
#[must_use]
pub fn platform_layout(platform_slug: &str) -> Option<&'static PlatformLayout> {
    let slug = platform_slug.to_ascii_lowercase();
    PLATFORM_LAYOUTS
        .iter()
        .find(|layout| layout.platform_slugs.contains(&slug.as_str()))
}

/// True when the platform keeps updates/DLC in side folders.
#[must_use]
pub fn has_update_support(platform_slug: &str) -> bool {
    platform_layout(platform_slug).is_some()
}

fn existing_sibling_dir(local_path: &Path, folder: &str) -> Option<PathBuf> {
    if !local_path.exists() {
        return None;
    }
    let dir = local_path.parent()?.join(folder);
    dir.is_dir().then_some(dir)
}

/// `update/` folder next to the installed game file, when present.
///
/// Platforms without a layout fall back to the `update` folder name.
#[must_use]
pub fn updates_folder(local_path: &Path, platform_slug: Option<&str>) -> Option<PathBuf> {
    let folder = platform_slug
        .and_then(platform_layout)
        .map_or("update", |layout| layout.update_folder);
    existing_sibling_dir(local_path, folder)
}

/// `dlc/` folder next to the installed game file, when the platform has one.
#[must_use]
pub fn dlc_folder(local_path: &Path, platform_slug: &str) -> Option<PathBuf> {
    let layout = platform_layout(platform_slug)?;
    existing_sibling_dir(local_path, layout.dlc_folder)
}

fn list_files_with_extensions(dir: &Path, extensions: &[&str]) -> Vec<PathBuf> {
    let Ok(read_dir) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = read_dir
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .and_then(extension_of)
                .is_some_and(|ext| extensions.contains(&ext.as_str()))
        })
        .collect();
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    files
}

/// Update files for an installed game, sorted by name.
#[must_use]
pub fn list_update_files(local_path: &Path, platform_slug: Option<&str>) -> Vec<PathBuf> {
    let Some(folder) = updates_folder(local_path, platform_slug) else {
        return Vec::new();
    };
    let extensions = platform_slug
        .and_then(platform_layout)
        .map_or(DEFAULT_UPDATE_EXTENSIONS, |layout| layout.update_extensions);
    list_files_with_extensions(&folder, extensions)
}

/// DLC files for an installed game, sorted by name.
#[must_use]
pub fn list_dlc_files(local_path: &Path, platform_slug: &str) -> Vec<PathBuf> {
    let Some(layout) = platform_layout(platform_slug) else {
        return Vec::new();
    };
    let Some(folder) = dlc_folder(local_path, platform_slug) else {
        return Vec::new();
    };
    list_files_with_extensions(&folder, layout.dlc_extensions)
}

/// Moves a lone game file into `<platform_dir>/<title>/`.
///
/// The file keeps its name when it already starts with the sanitized title,
/// otherwise it is renamed to `<title>.<ext>`.
///
/// # Errors
///
/// Returns the I/O error of the directory creation, rename or copy fallback.
#[instrument(fields(rom = %rom_file.display()))]
pub fn organize_single_file(
    rom_file: &Path,
    game_title: &str,
    platform_dir: &Path,
) -> io::Result<PathBuf> {
    let title = sanitize_title(game_title);
    let game_folder = platform_dir.join(&title);
    fs::create_dir_all(&game_folder)?;

    let file_name = rom_file
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default();
    let target_name = if file_name.starts_with(&title) {
        file_name.to_string()
    } else {
        match extension_of(file_name) {
            Some(ext) => format!("{title}.{ext}"),
            None => title.clone(),
        }
    };
    let target = game_folder.join(target_name);

    if rom_file != target && fs::rename(rom_file, &target).is_err() {
        fs::copy(rom_file, &target)?;
        fs::remove_file(rom_file)?;
    }
    debug!(target = %target.display(), "organized single file");
    Ok(target)
}
