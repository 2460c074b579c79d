//! Application configuration loading for CLI defaults.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use romfetch_core::manager::{MAX_CONCURRENT_DOWNLOADS, MIN_CONCURRENT_DOWNLOADS};

/// Prefix of per-platform directory override keys.
const PLATFORM_DIR_PREFIX: &str = "platform_dir.";

/// Instant thresholds offered by the launcher, in MB.
const INSTANT_THRESHOLD_CHOICES_MB: &[u64] = &[50, 100, 250, 500];

/// Key/value file configuration for romfetch defaults.
#[derive(Debug, Clone, Default)]
pub struct FileConfig {
    /// Root that platform directories are created under.
    pub storage_root: Option<PathBuf>,
    /// Directory holding the queue database and the default download root.
    pub data_dir: Option<PathBuf>,
    /// Concurrent transfers (1..=5).
    pub max_concurrent: Option<usize>,
    /// Requests smaller than this many MB start immediately.
    pub instant_threshold_mb: Option<u64>,
    /// HTTP connect timeout in seconds.
    pub connect_timeout_secs: Option<u64>,
    /// HTTP read timeout in seconds.
    pub read_timeout_secs: Option<u64>,
    /// Per-platform directory overrides, keyed by lower-case slug.
    pub platform_dirs: BTreeMap<String, PathBuf>,
    /// Default verbosity mode.
    pub verbosity: Option<VerbositySetting>,
    /// Optional database pool max connections (1..=20).
    pub db_max_connections: Option<u32>,
    /// Optional database busy timeout in milliseconds.
    pub db_busy_timeout_ms: Option<u32>,
}

impl FileConfig {
    /// Validates config values against runtime and CLI constraints.
    pub fn validate(&self) -> Result<()> {
        if let Some(max_concurrent) = self.max_concurrent
            && !(MIN_CONCURRENT_DOWNLOADS..=MAX_CONCURRENT_DOWNLOADS).contains(&max_concurrent)
        {
            bail!(
                "Invalid config value for `max_concurrent`: {max_concurrent}. Expected range: {MIN_CONCURRENT_DOWNLOADS}..={MAX_CONCURRENT_DOWNLOADS}"
            );
        }
        if let Some(threshold) = self.instant_threshold_mb
            && !INSTANT_THRESHOLD_CHOICES_MB.contains(&threshold)
        {
            bail!(
                "Invalid config value for `instant_threshold_mb`: {threshold}. Expected one of: 50, 100, 250, 500"
            );
        }
        validate_timeout_secs("connect_timeout_secs", self.connect_timeout_secs)?;
        validate_timeout_secs("read_timeout_secs", self.read_timeout_secs)?;
        validate_db_max_connections(self.db_max_connections)?;
        validate_db_busy_timeout_ms(self.db_busy_timeout_ms)?;

        Ok(())
    }
}

fn validate_db_max_connections(value: Option<u32>) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if !(1..=20).contains(&value) {
        bail!("Invalid config value for `db_max_connections`: {value}. Expected range: 1..=20");
    }
    Ok(())
}

fn validate_db_busy_timeout_ms(value: Option<u32>) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if value > 120_000 {
        bail!("Invalid config value for `db_busy_timeout_ms`: {value}. Expected range: 0..=120000");
    }
    Ok(())
}

fn validate_timeout_secs(field: &str, value: Option<u64>) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if !(1..=3600).contains(&value) {
        bail!("Invalid config value for `{field}`: {value}. Expected range: 1..=3600");
    }
    Ok(())
}

/// Supported config verbosity labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbositySetting {
    Default,
    Verbose,
    Quiet,
    Debug,
}

impl VerbositySetting {
    /// Log filter used when neither flags nor `RUST_LOG` override it.
    #[must_use]
    pub fn filter(self) -> &'static str {
        match self {
            Self::Default => "info",
            Self::Verbose => "debug",
            Self::Quiet => "error",
            Self::Debug => "trace",
        }
    }
}

/// Loaded config metadata.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Resolved config path if a base directory is known.
    pub path: Option<PathBuf>,
    /// Parsed file config when a config file exists and was valid.
    pub config: Option<FileConfig>,
}

/// Resolves default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/romfetch/config.toml`
/// 2. `$HOME/.config/romfetch/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("romfetch")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("romfetch")
            .join("config.toml"),
    )
}

/// Resolves the default data directory.
///
/// Priority:
/// 1. `$XDG_DATA_HOME/romfetch`
/// 2. `$HOME/.local/share/romfetch`
/// 3. `./.romfetch`
#[must_use]
pub fn resolve_default_data_dir() -> PathBuf {
    if let Some(xdg_data_home) = env_var_non_empty_os("XDG_DATA_HOME") {
        return PathBuf::from(xdg_data_home).join("romfetch");
    }
    match env_var_non_empty_os("HOME") {
        Some(home) => PathBuf::from(home)
            .join(".local")
            .join("share")
            .join("romfetch"),
        None => PathBuf::from(".romfetch"),
    }
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads config from `explicit` when given, otherwise from the default path if present.
pub fn load_file_config_from(explicit: Option<&Path>) -> Result<LoadedConfig> {
    if let Some(path) = explicit {
        let config = load_file_config(path)?;
        return Ok(LoadedConfig {
            path: Some(path.to_path_buf()),
            config: Some(config),
        });
    }

    let path = resolve_default_config_path();
    let Some(path_ref) = path.as_deref() else {
        return Ok(LoadedConfig { path, config: None });
    };
    if !path_ref.exists() {
        return Ok(LoadedConfig { path, config: None });
    }

    let config = load_file_config(path_ref)?;
    Ok(LoadedConfig {
        path,
        config: Some(config),
    })
}

fn load_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let mut cfg = FileConfig::default();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            bail!(
                "Invalid config syntax on line {}: expected key = value",
                line_index + 1
            );
        };

        let key = raw_key.trim();
        let value = raw_value.trim();
        let line_number = line_index + 1;

        match key {
            "storage_root" => {
                let parsed = parse_string_literal(value).with_context(|| {
                    format!("Invalid `storage_root` value on line {line_number}")
                })?;
                cfg.storage_root = Some(PathBuf::from(parsed));
            }
            "data_dir" => {
                let parsed = parse_string_literal(value)
                    .with_context(|| format!("Invalid `data_dir` value on line {line_number}"))?;
                cfg.data_dir = Some(PathBuf::from(parsed));
            }
            "max_concurrent" => {
                let parsed = parse_integer_u64(value).with_context(|| {
                    format!("Invalid `max_concurrent` value on line {line_number}")
                })?;
                let n = usize::try_from(parsed)
                    .map_err(|_| anyhow::anyhow!("max_concurrent out of range for usize"))?;
                cfg.max_concurrent = Some(n);
            }
            "instant_threshold_mb" => {
                let parsed = parse_integer_u64(value).with_context(|| {
                    format!("Invalid `instant_threshold_mb` value on line {line_number}")
                })?;
                cfg.instant_threshold_mb = Some(parsed);
            }
            "connect_timeout_secs" => {
                let parsed = parse_integer_u64(value).with_context(|| {
                    format!("Invalid `connect_timeout_secs` value on line {line_number}")
                })?;
                cfg.connect_timeout_secs = Some(parsed);
            }
            "read_timeout_secs" => {
                let parsed = parse_integer_u64(value).with_context(|| {
                    format!("Invalid `read_timeout_secs` value on line {line_number}")
                })?;
                cfg.read_timeout_secs = Some(parsed);
            }
            "verbosity" => {
                let parsed = parse_string_literal(value)
                    .with_context(|| format!("Invalid `verbosity` value on line {line_number}"))?;
                cfg.verbosity = Some(parse_verbosity(&parsed).with_context(|| {
                    format!("Invalid `verbosity` value '{parsed}' on line {line_number}")
                })?);
            }
            "db_max_connections" => {
                let parsed = parse_integer_u64(value).with_context(|| {
                    format!("Invalid `db_max_connections` value on line {line_number}")
                })?;
                let n = u32::try_from(parsed)
                    .map_err(|_| anyhow::anyhow!("db_max_connections out of range for u32"))?;
                cfg.db_max_connections = Some(n);
            }
            "db_busy_timeout_ms" => {
                let parsed = parse_integer_u64(value).with_context(|| {
                    format!("Invalid `db_busy_timeout_ms` value on line {line_number}")
                })?;
                let n = u32::try_from(parsed)
                    .map_err(|_| anyhow::anyhow!("db_busy_timeout_ms out of range for u32"))?;
                cfg.db_busy_timeout_ms = Some(n);
            }
            platform_key if platform_key.starts_with(PLATFORM_DIR_PREFIX) => {
                let slug = &platform_key[PLATFORM_DIR_PREFIX.len()..];
                if slug.is_empty() {
                    bail!("Missing platform slug in `{platform_key}` on line {line_number}");
                }
                let parsed = parse_string_literal(value).with_context(|| {
                    format!("Invalid `{platform_key}` value on line {line_number}")
                })?;
                cfg.platform_dirs
                    .insert(slug.to_ascii_lowercase(), PathBuf::from(parsed));
            }
            unknown => {
                bail!("Unknown configuration key: '{unknown}' on line {line_number}");
            }
        }
    }
    cfg.validate()?;
    Ok(cfg)
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string_literal(raw_value: &str) -> Result<String> {
    if raw_value.len() < 2 || !raw_value.starts_with('"') || !raw_value.ends_with('"') {
        bail!("Expected double-quoted string");
    }
    Ok(raw_value[1..raw_value.len() - 1].to_string())
}

fn parse_integer_u64(raw_value: &str) -> Result<u64> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected integer value");
    }
    let value = token.parse::<i128>()?;
    if value < 0 {
        bail!("Expected non-negative integer");
    }
    u64::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for u64"))
}

fn parse_verbosity(value: &str) -> Result<VerbositySetting> {
    match value {
        "default" => Ok(VerbositySetting::Default),
        "verbose" => Ok(VerbositySetting::Verbose),
        "quiet" => Ok(VerbositySetting::Quiet),
        "debug" => Ok(VerbositySetting::Debug),
        _ => bail!("Expected one of: default, verbose, quiet, debug"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config_partial_fields() {
        let cfg = parse_config_str(
            r#"
max_concurrent = 3
verbosity = "verbose"
"#,
        )
        .expect("partial config should parse");
        assert_eq!(cfg.max_concurrent, Some(3));
        assert_eq!(cfg.verbosity, Some(VerbositySetting::Verbose));
        assert!(cfg.storage_root.is_none());
    }

    #[test]
    fn test_parse_config_paths_and_platform_overrides() {
        let cfg = parse_config_str(
            r#"
storage_root = "/sdcard/roms"
data_dir = "/var/lib/romfetch"
platform_dir.PSX = "/mnt/ext/playstation" # external drive
"#,
        )
        .expect("path config should parse");
        assert_eq!(cfg.storage_root, Some(PathBuf::from("/sdcard/roms")));
        assert_eq!(cfg.data_dir, Some(PathBuf::from("/var/lib/romfetch")));
        assert_eq!(
            cfg.platform_dirs.get("psx"),
            Some(&PathBuf::from("/mnt/ext/playstation"))
        );
    }

    #[test]
    fn test_parse_config_rejects_empty_platform_slug() {
        let err = parse_config_str(r#"platform_dir. = "/x""#).expect_err("missing slug");
        assert!(err.to_string().contains("platform slug"));
    }

    #[test]
    fn test_parse_config_rejects_invalid_max_concurrent() {
        let err = parse_config_str("max_concurrent = 0").expect_err("invalid concurrency expected");
        assert!(err.to_string().contains("max_concurrent"));

        let err = parse_config_str("max_concurrent = 6").expect_err("invalid concurrency expected");
        assert!(err.to_string().contains("1..=5"));
    }

    #[test]
    fn test_parse_config_instant_threshold_choices() {
        let cfg = parse_config_str("instant_threshold_mb = 250").expect("valid threshold");
        assert_eq!(cfg.instant_threshold_mb, Some(250));

        let err = parse_config_str("instant_threshold_mb = 75").expect_err("not a choice");
        assert!(err.to_string().contains("instant_threshold_mb"));
    }

    #[test]
    fn test_parse_config_rejects_numeric_values_with_trailing_tokens() {
        let err = parse_config_str("max_concurrent = 4 trailing")
            .expect_err("expected trailing token error");
        assert!(err.to_string().contains("max_concurrent"));
    }

    #[test]
    fn test_parse_config_timeout_fields() {
        let cfg = parse_config_str(
            r#"
connect_timeout_secs = 15
read_timeout_secs = 120
"#,
        )
        .expect("timeout config should parse");
        assert_eq!(cfg.connect_timeout_secs, Some(15));
        assert_eq!(cfg.read_timeout_secs, Some(120));
    }

    #[test]
    fn test_parse_config_rejects_invalid_timeout_value() {
        let err = parse_config_str("connect_timeout_secs = 0")
            .expect_err("invalid timeout expected");
        assert!(err.to_string().contains("connect_timeout_secs"));
    }

    #[test]
    fn test_parse_config_rejects_unknown_keys() {
        let err = parse_config_str("unknown_key = 123").expect_err("unknown key error expected");
        assert!(err.to_string().contains("Unknown configuration key"));
        assert!(err.to_string().contains("unknown_key"));
    }

    #[test]
    fn test_parse_config_db_options() {
        let cfg = parse_config_str(
            r#"
db_max_connections = 10
db_busy_timeout_ms = 3000
"#,
        )
        .expect("db options should parse");
        assert_eq!(cfg.db_max_connections, Some(10));
        assert_eq!(cfg.db_busy_timeout_ms, Some(3000));

        let err = parse_config_str("db_busy_timeout_ms = 120001")
            .expect_err("value above 120000 should be rejected");
        assert!(err.to_string().contains("db_busy_timeout_ms"));
    }

    #[test]
    fn test_verbosity_filter() {
        assert_eq!(VerbositySetting::Default.filter(), "info");
        assert_eq!(VerbositySetting::Quiet.filter(), "error");
        assert_eq!(VerbositySetting::Debug.filter(), "trace");
    }

    #[test]
    fn test_load_explicit_config_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "max_concurrent = 2\n").expect("write config");

        let loaded = load_file_config_from(Some(&path)).expect("explicit config loads");
        assert_eq!(loaded.path.as_deref(), Some(path.as_path()));
        assert_eq!(loaded.config.and_then(|c| c.max_concurrent), Some(2));
    }
}
