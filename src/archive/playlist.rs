//! Multi-disc playlist (`.m3u`) selection, validation and generation.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, instrument};

use crate::download::extension_of;

/// Extensions of disc images and cue/gdi sheets.
pub const DISC_EXTENSIONS: &[&str] = &["bin", "cue", "chd", "iso", "img", "mdf", "gdi", "cdi"];

/// Playlist file extension.
pub const PLAYLIST_EXTENSION: &str = "m3u";

const COMPRESSED_DISC_EXTENSIONS: &[&str] = &["chd"];
const SHEET_EXTENSIONS: &[&str] = &["cue", "gdi"];
const RAW_DISC_EXTENSIONS: &[&str] = &["iso", "bin", "img"];

/// Filename patterns carrying a disc number, tried in order.
#[allow(clippy::expect_used)]
static DISC_NUMBER_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"[Dd]isc\s*(\d+)",
        r"[Dd]isk\s*(\d+)",
        r"[Cc][Dd]\s*(\d+)",
        r"\((\d+)\s*of\s*\d+\)",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("disc number regex is valid")) // Static pattern, safe to panic
    .collect()
});

/// `FILE "name" TYPE` lines of a cue sheet.
#[allow(clippy::expect_used)]
static CUE_FILE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)^\s*FILE\s+(?:"([^"]+)"|(\S+))"#).expect("cue FILE regex is valid") // Static pattern, safe to panic
});

fn file_name(path: &Path) -> &str {
    path.file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default()
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    extension_of(file_name(path)).is_some_and(|ext| extensions.contains(&ext.as_str()))
}

/// True when `path` is a disc image or sheet.
#[must_use]
pub fn is_disc_file(path: &Path) -> bool {
    has_extension(path, DISC_EXTENSIONS)
}

/// True when `path` is a cue or gdi sheet.
#[must_use]
pub fn is_sheet_file(path: &Path) -> bool {
    has_extension(path, SHEET_EXTENSIONS)
}

/// True when `path` is a self-contained compressed disc image.
#[must_use]
pub fn is_compressed_disc_file(path: &Path) -> bool {
    has_extension(path, COMPRESSED_DISC_EXTENSIONS)
}

/// Best-effort disc number from a file name.
#[must_use]
pub fn disc_number(name: &str) -> Option<u32> {
    DISC_NUMBER_PATTERNS.iter().find_map(|pattern| {
        pattern
            .captures(name)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse().ok())
    })
}

/// Orders files by detected disc number, then by name; unnumbered files last.
pub fn sort_by_disc_number(files: &mut [PathBuf]) {
    files.sort_by(|a, b| {
        let key_a = (disc_number(file_name(a)).unwrap_or(u32::MAX), file_name(a));
        let key_b = (disc_number(file_name(b)).unwrap_or(u32::MAX), file_name(b));
        key_a.cmp(&key_b)
    });
}

/// Picks the independently launchable discs from root-level disc candidates.
///
/// Compressed images win over sheets, sheets win over raw images; the data
/// tracks a sheet references are never launchable themselves.
#[must_use]
pub fn launchable_discs(candidates: &[PathBuf]) -> Vec<PathBuf> {
    let mut launchables = [COMPRESSED_DISC_EXTENSIONS, SHEET_EXTENSIONS, RAW_DISC_EXTENSIONS]
        .into_iter()
        .map(|extensions| {
            candidates
                .iter()
                .filter(|path| has_extension(path, extensions))
                .cloned()
                .collect::<Vec<_>>()
        })
        .find(|files| !files.is_empty())
        .unwrap_or_default();
    sort_by_disc_number(&mut launchables);
    launchables
}

/// Entries of a playlist file: blank and `#` lines skipped, inline `#` stripped.
///
/// # Errors
///
/// Returns the I/O error of reading `path`.
pub fn parse_playlist(path: &Path) -> io::Result<Vec<String>> {
    let contents = fs::read_to_string(path)?;
    Ok(contents
        .lines()
        .map(|line| line.split('#').next().unwrap_or_default().trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

fn resolve_relative(base: &Path, entry: &str) -> PathBuf {
    base.parent().unwrap_or(Path::new("")).join(entry)
}

/// True when the playlist lists at least one entry and every entry exists.
#[must_use]
pub fn is_playlist_complete(path: &Path) -> bool {
    match parse_playlist(path) {
        Ok(entries) => {
            !entries.is_empty()
                && entries
                    .iter()
                    .all(|entry| resolve_relative(path, entry).exists())
        }
        Err(_) => false,
    }
}

/// Data files referenced by `FILE` lines of a cue sheet.
///
/// # Errors
///
/// Returns the I/O error of reading `path`.
pub fn cue_references(path: &Path) -> io::Result<Vec<String>> {
    let contents = fs::read_to_string(path)?;
    Ok(contents
        .lines()
        .filter_map(|line| CUE_FILE_PATTERN.captures(line))
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
        .map(|m| m.as_str().to_string())
        .collect())
}

/// True when every `FILE` referenced by the cue sheet exists next to it.
#[must_use]
pub fn is_cue_complete(path: &Path) -> bool {
    match cue_references(path) {
        Ok(references) => references
            .iter()
            .all(|reference| resolve_relative(path, reference).exists()),
        Err(_) => false,
    }
}

/// Launchable discs and the playlist that ties them together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaylistPlan {
    /// Launchable discs ordered by disc number.
    pub launchables: Vec<PathBuf>,
    /// Reused or generated playlist; `None` with fewer than two launchables.
    pub playlist: Option<PathBuf>,
    /// True when an existing playlist was accepted.
    pub reused: bool,
}

/// Builds or validates the playlist of a multi-disc game.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscPlaylistBuilder;

impl DiscPlaylistBuilder {
    /// Resolves the playlist for `disc_candidates` inside `game_folder`.
    ///
    /// An existing playlist is reused only when it lists exactly the launchable
    /// set and every listed file exists; otherwise `<title>.m3u` is written.
    ///
    /// # Errors
    ///
    /// Returns the I/O error of writing a generated playlist.
    #[instrument(skip(self, disc_candidates), fields(folder = %game_folder.display()))]
    pub fn build(
        &self,
        game_folder: &Path,
        title: &str,
        disc_candidates: &[PathBuf],
        existing_playlist: Option<&Path>,
    ) -> io::Result<PlaylistPlan> {
        let launchables = launchable_discs(disc_candidates);
        if launchables.len() < 2 {
            return Ok(PlaylistPlan {
                launchables,
                playlist: None,
                reused: false,
            });
        }

        if let Some(existing) = existing_playlist
            && playlist_matches(existing, &launchables)
        {
            debug!(playlist = %existing.display(), "reusing existing playlist");
            return Ok(PlaylistPlan {
                launchables,
                playlist: Some(existing.to_path_buf()),
                reused: true,
            });
        }

        let playlist = game_folder.join(format!("{title}.{PLAYLIST_EXTENSION}"));
        write_playlist(&playlist, &launchables)?;
        debug!(playlist = %playlist.display(), discs = launchables.len(), "generated playlist");
        Ok(PlaylistPlan {
            launchables,
            playlist: Some(playlist),
            reused: false,
        })
    }
}

fn playlist_matches(playlist: &Path, launchables: &[PathBuf]) -> bool {
    let Ok(entries) = parse_playlist(playlist) else {
        return false;
    };
    let listed: BTreeSet<&str> = entries
        .iter()
        .map(|entry| {
            Path::new(entry)
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or(entry.as_str())
        })
        .collect();
    let expected: BTreeSet<&str> = launchables.iter().map(|path| file_name(path)).collect();
    listed.len() == entries.len()
        && listed == expected
        && entries
            .iter()
            .all(|entry| resolve_relative(playlist, entry).exists())
}

fn write_playlist(path: &Path, discs: &[PathBuf]) -> io::Result<()> {
    let contents = discs
        .iter()
        .map(|disc| file_name(disc))
        .collect::<Vec<_>>()
        .join("\n");
    fs::write(path, contents)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, b"x").unwrap();
        path
    }

    fn names(paths: &[PathBuf]) -> Vec<&str> {
        paths.iter().map(|p| file_name(p)).collect()
    }

    #[test]
    fn test_disc_number_patterns() {
        assert_eq!(disc_number("Game (Disc 2).cue"), Some(2));
        assert_eq!(disc_number("Game (disk3).bin"), Some(3));
        assert_eq!(disc_number("Game CD 4.iso"), Some(4));
        assert_eq!(disc_number("Game (2 of 3).bin"), Some(2));
        assert_eq!(disc_number("Game (USA).cue"), None);
    }

    #[test]
    fn test_numbered_discs_sort_before_unnumbered() {
        let mut files = vec![
            PathBuf::from("Game (USA).cue"),
            PathBuf::from("Game (2 of 3).bin"),
            PathBuf::from("Game (Disc 1).cue"),
            PathBuf::from("Another (USA).cue"),
        ];
        sort_by_disc_number(&mut files);
        assert_eq!(
            names(&files),
            [
                "Game (Disc 1).cue",
                "Game (2 of 3).bin",
                "Another (USA).cue",
                "Game (USA).cue"
            ]
        );
    }

    #[test]
    fn test_launchable_priority() {
        let mixed = vec![
            PathBuf::from("a.bin"),
            PathBuf::from("a.cue"),
            PathBuf::from("b.chd"),
        ];
        assert_eq!(names(&launchable_discs(&mixed)), ["b.chd"]);

        let sheets = vec![
            PathBuf::from("game (Track 1).bin"),
            PathBuf::from("game.cue"),
            PathBuf::from("game (Track 2).bin"),
        ];
        assert_eq!(names(&launchable_discs(&sheets)), ["game.cue"]);

        let raw = vec![PathBuf::from("d2.iso"), PathBuf::from("d1.img"), PathBuf::from("x.mdf")];
        assert_eq!(names(&launchable_discs(&raw)), ["d1.img", "d2.iso"]);
    }

    #[test]
    fn test_single_launchable_produces_no_playlist() {
        let dir = TempDir::new().unwrap();
        let cue = touch(dir.path(), "game.cue");
        let plan = DiscPlaylistBuilder
            .build(dir.path(), "Game", &[cue.clone()], None)
            .unwrap();
        assert_eq!(plan.launchables, vec![cue]);
        assert!(plan.playlist.is_none());
    }

    #[test]
    fn test_existing_playlist_with_exact_set_is_reused_verbatim() {
        let dir = TempDir::new().unwrap();
        let a = touch(dir.path(), "A.cue");
        let b = touch(dir.path(), "B.cue");
        let m3u = dir.path().join("custom.m3u");
        fs::write(&m3u, "# discs\nA.cue\r\nB.cue\n").unwrap();

        let plan = DiscPlaylistBuilder
            .build(dir.path(), "Game", &[a, b], Some(&m3u))
            .unwrap();

        assert!(plan.reused);
        assert_eq!(plan.playlist.as_deref(), Some(m3u.as_path()));
        assert_eq!(fs::read_to_string(&m3u).unwrap(), "# discs\nA.cue\r\nB.cue\n");
        assert!(!dir.path().join("Game.m3u").exists());
    }

    #[test]
    fn test_existing_playlist_missing_a_disc_is_regenerated() {
        let dir = TempDir::new().unwrap();
        let a = touch(dir.path(), "A.cue");
        let b = touch(dir.path(), "B.cue");
        let m3u = dir.path().join("custom.m3u");
        fs::write(&m3u, "A.cue\n").unwrap();

        let plan = DiscPlaylistBuilder
            .build(dir.path(), "Game", &[b, a], Some(&m3u))
            .unwrap();

        assert!(!plan.reused);
        let generated = dir.path().join("Game.m3u");
        assert_eq!(plan.playlist.as_deref(), Some(generated.as_path()));
        assert_eq!(fs::read_to_string(generated).unwrap(), "A.cue\nB.cue");
    }

    #[test]
    fn test_generated_playlist_orders_by_disc_number() {
        let dir = TempDir::new().unwrap();
        let d2 = touch(dir.path(), "FF7 (Disc 2).chd");
        let d10 = touch(dir.path(), "FF7 (Disc 10).chd");
        let d1 = touch(dir.path(), "FF7 (Disc 1).chd");

        let plan = DiscPlaylistBuilder
            .build(dir.path(), "FF7", &[d2, d10, d1], None)
            .unwrap();

        let contents = fs::read_to_string(plan.playlist.unwrap()).unwrap();
        assert_eq!(contents, "FF7 (Disc 1).chd\nFF7 (Disc 2).chd\nFF7 (Disc 10).chd");
    }

    #[test]
    fn test_parse_playlist_skips_comments_and_blank_lines() {
        let dir = TempDir::new().unwrap();
        let m3u = dir.path().join("g.m3u");
        fs::write(&m3u, "#EXTM3U\n\n disc1.cue # first\ndisc2.cue\n").unwrap();
        assert_eq!(parse_playlist(&m3u).unwrap(), ["disc1.cue", "disc2.cue"]);
    }

    #[test]
    fn test_is_playlist_complete() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "disc1.cue");
        let m3u = dir.path().join("g.m3u");
        fs::write(&m3u, "disc1.cue\ndisc2.cue\n").unwrap();
        assert!(!is_playlist_complete(&m3u));

        touch(dir.path(), "disc2.cue");
        assert!(is_playlist_complete(&m3u));

        fs::write(&m3u, "# empty\n").unwrap();
        assert!(!is_playlist_complete(&m3u));
    }

    #[test]
    fn test_is_cue_complete() {
        let dir = TempDir::new().unwrap();
        let cue = dir.path().join("game.cue");
        fs::write(
            &cue,
            "FILE \"game (Track 1).bin\" BINARY\n  TRACK 01 MODE2/2352\nFILE track2.bin BINARY\n",
        )
        .unwrap();
        assert_eq!(
            cue_references(&cue).unwrap(),
            ["game (Track 1).bin", "track2.bin"]
        );
        assert!(!is_cue_complete(&cue));

        touch(dir.path(), "game (Track 1).bin");
        touch(dir.path(), "track2.bin");
        assert!(is_cue_complete(&cue));
    }
}
