//! CLI entry point for the romfetch tool.

use std::fs;
use std::io::{self, IsTerminal};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use romfetch_core::archive::ArchiveExtractor;
use romfetch_core::{
    ArchiveInspector, Database, DownloadQueueManager, DownloadRequest, PlatformDirectories,
    QueueSnapshot, QueueStore, ResumableDownloader,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

mod app;
mod app_config;
mod cli;

use app::config_runtime::{RuntimeSettings, resolve_default_log_level, resolve_runtime};
use app::progress_manager::spawn_progress_ui;
use app_config::load_file_config_from;
use cli::{Args, Command, FetchArgs};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();
    let loaded = load_file_config_from(args.config.as_deref())?;

    // Priority: RUST_LOG env var > quiet flag > verbose flag > config file > info
    let default_level = resolve_default_log_level(&args, loaded.config.as_ref());
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?args, config = ?loaded.path, "CLI arguments parsed");

    let settings = resolve_runtime(&args, loaded.config.as_ref())?;
    let directories = platform_directories(&settings);

    if let Command::Extract {
        archive,
        title,
        platform,
    } = &args.command
    {
        return run_extract(archive, title, &directories.platform_dir(platform)).await;
    }

    fs::create_dir_all(&settings.data_dir).with_context(|| {
        format!(
            "Failed to create data directory '{}'",
            settings.data_dir.display()
        )
    })?;
    let db_path = settings.database_path();
    let db = Database::new_with_options(&db_path, &settings.db_options)
        .await
        .with_context(|| format!("Failed to open queue database '{}'", db_path.display()))?;

    let downloader = ResumableDownloader::try_new_with_timeouts(
        settings.connect_timeout_secs,
        settings.read_timeout_secs,
    )
    .context("Failed to create HTTP client")?;
    let manager = DownloadQueueManager::builder(Arc::new(QueueStore::new(db)), directories)
        .downloader(downloader)
        .settings(settings.manager)
        .build()?;

    let result = run_command(&manager, args.command, !args.quiet).await;
    manager.shutdown().await;
    result
}

fn platform_directories(settings: &RuntimeSettings) -> PlatformDirectories {
    settings.platform_dirs.iter().fold(
        PlatformDirectories::new(settings.default_download_root())
            .with_storage_root(settings.storage_root.clone()),
        |directories, (slug, dir)| directories.with_override(slug, dir),
    )
}

async fn run_command(manager: &DownloadQueueManager, command: Command, show_ui: bool) -> Result<()> {
    // Read-only commands never admit anything.
    if let Command::List { json } = command {
        manager.load().await?;
        return print_snapshot(&manager.snapshot(), json);
    }

    let reset = manager.start().await?;
    if reset > 0 {
        info!(reset, "Resuming interrupted downloads");
    }

    match command {
        Command::Fetch(fetch) => {
            let outcome = manager.enqueue(fetch_request(fetch)?).await?;
            info!(?outcome, "Download queued");
        }
        Command::Pause { id } => report_toggle("Paused", id, manager.pause(id).await?),
        Command::Resume { id } => report_toggle("Resumed", id, manager.resume(id).await?),
        Command::Cancel { id } => report_toggle("Cancelled", id, manager.cancel(id).await?),
        Command::RetryFailed => {
            let summary = manager.retry_failed().await?;
            info!(
                requeued = summary.requeued,
                extraction_restarted = summary.extraction_restarted,
                skipped = summary.skipped,
                "Retried failed downloads"
            );
        }
        Command::RetryExtraction { id } => {
            report_toggle("Extraction restarted for", id, manager.retry_extraction(id).await?);
        }
        Command::RecheckStorage => {
            let moved = manager.recheck_storage().await?;
            info!(moved, "Storage re-checked");
        }
        Command::ClearCompleted => {
            let removed = manager.clear_completed().await?;
            info!(removed, "Cleared completed downloads");
        }
        Command::List { .. } | Command::Extract { .. } => {}
    }

    drive_until_idle(manager, show_ui && io::stderr().is_terminal()).await;

    let snapshot = manager.snapshot();
    for entry in &snapshot.queue {
        if let Some(reason) = &entry.error_reason {
            warn!(id = entry.id, title = %entry.display_title, %reason, "Download failed");
        }
    }
    Ok(())
}

fn fetch_request(fetch: FetchArgs) -> Result<DownloadRequest> {
    let mut request = DownloadRequest::new(
        fetch.game_id,
        fetch.remote_id.unwrap_or(fetch.game_id),
        fetch.url,
        fetch.title,
        fetch.platform,
    )
    .with_expected_size(fetch.size);
    if let Some(file_name) = fetch.file_name {
        request = request.with_file_name(file_name);
    }
    if let Some(disc) = fetch.disc {
        let [disc_id, disc_number] = disc[..] else {
            bail!("--disc expects a disc id and a disc number");
        };
        request = request.with_disc(disc_id, disc_number);
    }
    Ok(request)
}

fn report_toggle(action: &str, id: i64, changed: bool) {
    if changed {
        info!(id, "{action} download");
    } else {
        warn!(id, "{action} download: no change for the entry's current state");
    }
}

/// Runs the queue until idle or Ctrl-C, showing progress on a terminal.
async fn drive_until_idle(manager: &DownloadQueueManager, use_bar: bool) {
    let (handle, stop) = spawn_progress_ui(use_bar, manager.subscribe_state());
    tokio::select! {
        () = manager.wait_idle() => debug!("queue idle"),
        signal = tokio::signal::ctrl_c() => {
            if let Err(error) = signal {
                warn!(%error, "cannot listen for Ctrl-C");
            }
            info!("Interrupted; pausing active downloads");
        }
    }
    stop.cancel();
    if let Some(handle) = handle
        && let Err(error) = handle.await
    {
        debug!(%error, "progress UI ended abnormally");
    }
}

fn print_snapshot(snapshot: &QueueSnapshot, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(snapshot)?);
        return Ok(());
    }
    let rows = snapshot
        .active_downloads
        .iter()
        .chain(&snapshot.queue)
        .chain(&snapshot.completed);
    for entry in rows {
        let reason = entry.error_reason.as_deref().unwrap_or("");
        println!(
            "{:>5}  {:<20}  {:>12}/{:<12}  {}  {}",
            entry.id,
            entry.state_str,
            entry.bytes_downloaded,
            entry.total_bytes,
            entry.display_title,
            reason
        );
    }
    Ok(())
}

async fn run_extract(archive: &Path, title: &str, platform_dir: &Path) -> Result<()> {
    let archive = archive.to_path_buf();
    let title = title.to_string();
    let platform_dir = platform_dir.to_path_buf();
    let launch_path = tokio::task::spawn_blocking(move || {
        let Some(kind) = ArchiveInspector::default().archive_kind(&archive) else {
            bail!("'{}' is not a zip or 7z archive", archive.display());
        };
        let result = ArchiveExtractor::default().extract(
            &archive,
            kind,
            &title,
            &platform_dir,
            &CancellationToken::new(),
            &mut |written, total| debug!(written, total, "extracting"),
        )?;
        Ok(result.launch_path())
    })
    .await
    .context("Extraction task panicked")??;
    println!("{}", launch_path.display());
    Ok(())
}
