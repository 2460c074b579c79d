//! Post-download processing of game archives.
//!
//! - [`inspector`] - archive type sniffing and the extract-or-keep decision
//! - [`extractor`] - streaming extraction into `<platform>/<title>/` folders
//! - [`playlist`] - multi-disc launch file selection and `.m3u` generation
//! - [`platform`] - update/DLC folder conventions and single-file organization
//!
//! All functions here are blocking; async callers run them on
//! `tokio::task::spawn_blocking`.

mod error;
pub mod extractor;
pub mod inspector;
pub mod platform;
pub mod playlist;

pub use error::ExtractError;
pub use extractor::{
    ArchiveExtractor, EXTRACT_PROGRESS_STEP, ExtractionResult, discard_game_folder, sanitize_title,
};
pub use inspector::{
    ArchiveEntry, ArchiveInspector, ArchiveKind, NATIVE_ARCHIVE_PLATFORMS, detect_archive_kind,
    list_entries,
};
pub use platform::{
    PlatformLayout, dlc_folder, has_update_support, is_switch_platform, list_dlc_files,
    list_update_files, organize_single_file, platform_layout, updates_folder,
};
pub use playlist::{
    DiscPlaylistBuilder, PlaylistPlan, disc_number, is_cue_complete, is_playlist_complete,
    launchable_discs, parse_playlist,
};
