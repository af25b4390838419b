// Configuration loading and parsing (pickem.toml).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::scoring::OvertimeAttributionKind;

/// File name of the single config file under `config/` and `defaults/`.
pub const CONFIG_FILE: &str = "pickem.toml";

/// Log filter used when neither `RUST_LOG` nor `[logging] filter` is set.
pub const DEFAULT_LOG_FILTER: &str = "pickem=info,warn";

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to seed config from defaults: {message}")]
    SeedError { message: String },
}

// ---------------------------------------------------------------------------
// Top-level assembled Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub team: TeamConfig,
    pub db_path: PathBuf,
    pub nhl: NhlConfig,
    pub draft: DraftConfig,
    pub scoring: ScoringConfig,
    pub log_filter: String,
}

// ---------------------------------------------------------------------------
// pickem.toml structs
// ---------------------------------------------------------------------------

/// Raw deserialization target for the entire pickem.toml file.
#[derive(Debug, Clone, Deserialize)]
struct ConfigFile {
    team: TeamConfig,
    #[serde(default)]
    database: DatabaseSection,
    nhl: NhlConfig,
    #[serde(default)]
    draft: DraftConfig,
    #[serde(default)]
    scoring: ScoringConfig,
    #[serde(default)]
    logging: LoggingSection,
}

/// The franchise whose games are picked.
#[derive(Debug, Clone, Deserialize)]
pub struct TeamConfig {
    /// Three-letter abbreviation as the upstream reports it (e.g. "SEA").
    pub abbrev: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct DatabaseSection {
    #[serde(default)]
    path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NhlConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct DraftConfig {
    pub enforce_turn_order: bool,
    pub exclusive_player_picks: bool,
}

impl Default for DraftConfig {
    fn default() -> Self {
        DraftConfig {
            enforce_turn_order: false,
            exclusive_player_picks: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub overtime_attribution: OvertimeAttributionKind,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct LoggingSection {
    #[serde(default)]
    filter: String,
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate configuration from `config/pickem.toml` relative to
/// `base_dir`.
///
/// Does not seed from `defaults/`; see [`load_config_in`].
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let path = base_dir.join("config").join(CONFIG_FILE);
    let text = read_file(&path)?;
    let file: ConfigFile = toml::from_str(&text).map_err(|e| ConfigError::ParseError {
        path: path.clone(),
        source: e,
    })?;

    let db_path = if file.database.path.trim().is_empty() {
        default_db_path()?
    } else {
        PathBuf::from(file.database.path)
    };

    let log_filter = if file.logging.filter.trim().is_empty() {
        DEFAULT_LOG_FILTER.to_string()
    } else {
        file.logging.filter
    };

    let config = Config {
        team: file.team,
        db_path,
        nhl: file.nhl,
        draft: file.draft,
        scoring: file.scoring,
        log_filter,
    };

    validate(&config)?;

    Ok(config)
}

/// Seed `config/pickem.toml` from `defaults/pickem.toml` when it is missing.
///
/// Returns the path written, or `None` when a config file already existed.
/// An existing `config/pickem.toml` is never overwritten.
pub fn ensure_config_file(base_dir: &Path) -> Result<Option<PathBuf>, ConfigError> {
    let target = base_dir.join("config").join(CONFIG_FILE);
    if target.exists() {
        return Ok(None);
    }

    let source = base_dir.join("defaults").join(CONFIG_FILE);
    let seed = |what: &str, path: &Path, e: std::io::Error| ConfigError::SeedError {
        message: format!("{what} {}: {e}", path.display()),
    };

    let body = std::fs::read(&source).map_err(|e| seed("cannot read defaults from", &source, e))?;
    if let Some(dir) = target.parent() {
        std::fs::create_dir_all(dir).map_err(|e| seed("cannot create", dir, e))?;
    }
    let mut file = match std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&target)
    {
        Ok(file) => file,
        // Another process seeded it first.
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(None),
        Err(e) => return Err(seed("cannot create", &target, e)),
    };
    std::io::Write::write_all(&mut file, &body).map_err(|e| seed("cannot write", &target, e))?;

    Ok(Some(target))
}

/// Load config relative to `base_dir`, copying defaults first.
pub fn load_config_in(base_dir: &Path) -> Result<Config, ConfigError> {
    if let Some(path) = ensure_config_file(base_dir)? {
        tracing::info!(path = %path.display(), "seeded config from defaults");
    }
    load_config_from(base_dir)
}

/// [`load_config_in`] for the current directory.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound { path: ".".into() })?;
    load_config_in(&cwd)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

/// `<platform data dir>/pickem.db`, e.g. `~/.local/share/pickem/pickem.db`.
fn default_db_path() -> Result<PathBuf, ConfigError> {
    let dirs = directories::ProjectDirs::from("", "", "pickem").ok_or_else(|| {
        ConfigError::ValidationError {
            field: "database.path".into(),
            message: "empty and no platform data directory is available".into(),
        }
    })?;
    Ok(dirs.data_dir().join("pickem.db"))
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    let abbrev = &config.team.abbrev;
    if abbrev.len() != 3 || !abbrev.chars().all(|c| c.is_ascii_uppercase()) {
        return Err(ConfigError::ValidationError {
            field: "team.abbrev".into(),
            message: format!("must be three uppercase letters, got {abbrev:?}"),
        });
    }

    let url = &config.nhl.base_url;
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(ConfigError::ValidationError {
            field: "nhl.base_url".into(),
            message: format!("must be an http(s) URL, got {url:?}"),
        });
    }

    if config.nhl.timeout_secs == 0 {
        return Err(ConfigError::ValidationError {
            field: "nhl.timeout_secs".into(),
            message: "must be greater than 0".into(),
        });
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
