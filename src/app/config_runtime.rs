use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use romfetch_core::DatabaseOptions;
use romfetch_core::download::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use romfetch_core::manager::{
    DEFAULT_INSTANT_THRESHOLD_MB, DEFAULT_MAX_CONCURRENT, ManagerSettings,
};

use crate::app_config::{FileConfig, resolve_default_data_dir};
use crate::cli::Args;

/// File name of the queue database inside the data directory.
pub(crate) const QUEUE_DB_FILE: &str = "queue.db";

/// Settings after merging flags, config file and defaults.
///
/// Precedence: command line, then config file, then built-in defaults.
#[derive(Debug, Clone)]
pub(crate) struct RuntimeSettings {
    pub(crate) data_dir: PathBuf,
    pub(crate) storage_root: Option<PathBuf>,
    pub(crate) platform_dirs: BTreeMap<String, PathBuf>,
    pub(crate) manager: ManagerSettings,
    pub(crate) connect_timeout_secs: u64,
    pub(crate) read_timeout_secs: u64,
    pub(crate) db_options: DatabaseOptions,
}

impl RuntimeSettings {
    pub(crate) fn database_path(&self) -> PathBuf {
        self.data_dir.join(QUEUE_DB_FILE)
    }

    /// App-private download root used when no storage root is configured.
    pub(crate) fn default_download_root(&self) -> PathBuf {
        self.data_dir.join("roms")
    }
}

/// Log filter chosen from flags, then the config file.
pub(crate) fn resolve_default_log_level(args: &Args, file: Option<&FileConfig>) -> &'static str {
    if args.quiet {
        return "error";
    }
    match args.verbose {
        0 => file
            .and_then(|config| config.verbosity)
            .map_or("info", |verbosity| verbosity.filter()),
        1 => "debug",
        _ => "trace",
    }
}

pub(crate) fn resolve_runtime(args: &Args, file: Option<&FileConfig>) -> Result<RuntimeSettings> {
    let defaults = FileConfig::default();
    let file = file.unwrap_or(&defaults);

    let max_concurrent = args
        .max_concurrent
        .map(usize::from)
        .or(file.max_concurrent)
        .unwrap_or(DEFAULT_MAX_CONCURRENT);
    let instant_threshold_mb = match args.instant_threshold_mb.as_deref() {
        Some(raw) => raw
            .parse::<u64>()
            .with_context(|| format!("Invalid instant threshold '{raw}'"))?,
        None => file
            .instant_threshold_mb
            .unwrap_or(DEFAULT_INSTANT_THRESHOLD_MB),
    };
    let manager = ManagerSettings::new(max_concurrent, instant_threshold_mb)?;

    let mut db_options = DatabaseOptions::default();
    if let Some(max_connections) = file.db_max_connections {
        db_options.max_connections = max_connections;
    }
    if let Some(busy_timeout_ms) = file.db_busy_timeout_ms {
        db_options.busy_timeout_ms = busy_timeout_ms;
    }

    Ok(RuntimeSettings {
        data_dir: args
            .data_dir
            .clone()
            .or_else(|| file.data_dir.clone())
            .unwrap_or_else(resolve_default_data_dir),
        storage_root: args
            .storage_root
            .clone()
            .or_else(|| file.storage_root.clone()),
        platform_dirs: file.platform_dirs.clone(),
        manager,
        connect_timeout_secs: file.connect_timeout_secs.unwrap_or(CONNECT_TIMEOUT_SECS),
        read_timeout_secs: file.read_timeout_secs.unwrap_or(READ_TIMEOUT_SECS),
        db_options,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_config::VerbositySetting;
    use clap::Parser;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_resolve_runtime_defaults() {
        let args = parse(&["romfetch", "--data-dir", "/tmp/rf", "list"]);
        let settings = resolve_runtime(&args, None).unwrap();
        assert_eq!(settings.manager, ManagerSettings::default());
        assert_eq!(settings.database_path(), PathBuf::from("/tmp/rf/queue.db"));
        assert_eq!(settings.default_download_root(), PathBuf::from("/tmp/rf/roms"));
        assert_eq!(settings.connect_timeout_secs, CONNECT_TIMEOUT_SECS);
        assert_eq!(settings.read_timeout_secs, READ_TIMEOUT_SECS);
        assert!(settings.storage_root.is_none());
    }

    #[test]
    fn test_resolve_runtime_cli_overrides_file() {
        let file = FileConfig {
            max_concurrent: Some(2),
            instant_threshold_mb: Some(100),
            data_dir: Some(PathBuf::from("/from/file")),
            storage_root: Some(PathBuf::from("/file/roms")),
            ..FileConfig::default()
        };
        let args = parse(&[
            "romfetch",
            "-c",
            "4",
            "--storage-root",
            "/cli/roms",
            "list",
        ]);
        let settings = resolve_runtime(&args, Some(&file)).unwrap();
        assert_eq!(settings.manager.max_concurrent, 4);
        assert_eq!(settings.manager.instant_threshold_bytes, 100 * 1024 * 1024);
        assert_eq!(settings.data_dir, PathBuf::from("/from/file"));
        assert_eq!(settings.storage_root, Some(PathBuf::from("/cli/roms")));
    }

    #[test]
    fn test_resolve_runtime_db_and_timeouts_from_file() {
        let file = FileConfig {
            connect_timeout_secs: Some(5),
            read_timeout_secs: Some(60),
            db_max_connections: Some(3),
            db_busy_timeout_ms: Some(250),
            ..FileConfig::default()
        };
        let args = parse(&["romfetch", "list"]);
        let settings = resolve_runtime(&args, Some(&file)).unwrap();
        assert_eq!(settings.connect_timeout_secs, 5);
        assert_eq!(settings.read_timeout_secs, 60);
        assert_eq!(settings.db_options.max_connections, 3);
        assert_eq!(settings.db_options.busy_timeout_ms, 250);
    }

    #[test]
    fn test_log_level_precedence() {
        let file = FileConfig {
            verbosity: Some(VerbositySetting::Verbose),
            ..FileConfig::default()
        };
        assert_eq!(resolve_default_log_level(&parse(&["romfetch", "list"]), None), "info");
        assert_eq!(
            resolve_default_log_level(&parse(&["romfetch", "list"]), Some(&file)),
            "debug"
        );
        assert_eq!(
            resolve_default_log_level(&parse(&["romfetch", "-vv", "list"]), Some(&file)),
            "trace"
        );
        assert_eq!(
            resolve_default_log_level(&parse(&["romfetch", "-q", "-v", "list"]), Some(&file)),
            "error"
        );
    }
}
