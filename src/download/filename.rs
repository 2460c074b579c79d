//! File name helpers for transfer artifacts.

use std::path::{Path, PathBuf};

use url::Url;

use super::constants::PARTIAL_SUFFIX;

/// Extensions that are never game files (cover art, web pages, documents).
const INVALID_ROM_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "webp", "bmp", "html", "htm", "txt", "pdf",
];

/// Lower-cased extension of `name`, without the dot.
#[must_use]
pub fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
}

/// True when `name` carries an image/document extension.
#[must_use]
pub fn is_invalid_rom_file_name(name: &str) -> bool {
    extension_of(name).is_some_and(|ext| INVALID_ROM_EXTENSIONS.contains(&ext.as_str()))
}

/// Temp path used while `file_name` is being transferred into `dir`.
#[must_use]
pub fn partial_path(dir: &Path, file_name: &str) -> PathBuf {
    dir.join(format!("{file_name}{PARTIAL_SUFFIX}"))
}

/// Replaces path separators and reserved characters so the name stays a single segment.
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim();
    match trimmed {
        "" | "." | ".." => "_".to_string(),
        other => other.to_string(),
    }
}

/// Derives a file name from the last non-empty URL path segment.
#[must_use]
pub fn file_name_from_url(url: &Url) -> Option<String> {
    let last = url.path_segments()?.rev().find(|segment| !segment.is_empty())?;
    let decoded = urlencoding::decode(last).map_or_else(|_| last.to_string(), |d| d.into_owned());
    Some(sanitize_filename(&decoded))
}
