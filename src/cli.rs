//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Queue, download and install game files.
///
/// Romfetch keeps a persisted download queue, resumes interrupted transfers
/// and unpacks archives into launchable per-game folders.
#[derive(Parser, Debug)]
#[command(name = "romfetch")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (default: $XDG_CONFIG_HOME/romfetch/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding the queue database and default downloads
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Root that platform directories are created under
    #[arg(long, global = true)]
    pub storage_root: Option<PathBuf>,

    /// Maximum concurrent downloads (1-5)
    #[arg(short = 'c', long, global = true, value_parser = clap::value_parser!(u8).range(1..=5))]
    pub max_concurrent: Option<u8>,

    /// Requests smaller than this many MB skip the queue (50, 100, 250 or 500)
    #[arg(long, global = true, value_parser = ["50", "100", "250", "500"])]
    pub instant_threshold_mb: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Queue operations.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Enqueue a game file and wait until the queue is idle
    Fetch(FetchArgs),

    /// Show the queue
    List {
        /// Print the snapshot as JSON
        #[arg(long)]
        json: bool,
    },

    /// Pause a queued or running download
    Pause {
        /// Queue entry id
        id: i64,
    },

    /// Resume a paused download
    Resume {
        /// Queue entry id
        id: i64,
    },

    /// Cancel a download and delete its partial file
    Cancel {
        /// Queue entry id
        id: i64,
    },

    /// Retry every failed download that is not permanently failed
    RetryFailed,

    /// Re-run extraction of a failed entry from the archive on disk
    RetryExtraction {
        /// Queue entry id
        id: i64,
    },

    /// Re-check entries waiting for storage
    RecheckStorage,

    /// Remove completed entries from the queue
    ClearCompleted,

    /// Extract a local archive into a game folder without queueing
    Extract {
        /// Archive to unpack
        archive: PathBuf,

        /// Game title used for the folder name
        #[arg(long)]
        title: String,

        /// Platform slug, e.g. psx
        #[arg(long)]
        platform: String,
    },
}

/// Arguments of `romfetch fetch`.
#[derive(clap::Args, Debug)]
pub struct FetchArgs {
    /// Remote file URL
    pub url: String,

    /// Local game id
    #[arg(long)]
    pub game_id: i64,

    /// Remote catalog id (defaults to the game id)
    #[arg(long)]
    pub remote_id: Option<i64>,

    /// Game title
    #[arg(long)]
    pub title: String,

    /// Platform slug, e.g. psx
    #[arg(long)]
    pub platform: String,

    /// File name to save as (derived from the URL when absent)
    #[arg(long)]
    pub file_name: Option<String>,

    /// Expected size in bytes, used for storage and instant checks
    #[arg(long, default_value_t = 0)]
    pub size: u64,

    /// Disc id and disc number for one disc of a multi-disc game
    #[arg(long, num_args = 2, value_names = ["DISC_ID", "DISC_NUMBER"])]
    pub disc: Option<Vec<i64>>,
}
