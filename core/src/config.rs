//! Configuration loading
//!
//! Loads configuration from `~/.config/timetravel/timetravel.toml` (or the
//! `TIMETRAVEL_CONFIG` env var). Every field has a default, so a missing file
//! is not an error.

use crate::errors::{Result, TimetravelError};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct TimetravelConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub migrations: MigrationsConfig,

    #[serde(default)]
    pub records: RecordsConfig,
}

/// SQLite connection settings
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file (`~/` is expanded)
    #[serde(default = "default_db_path")]
    pub path: String,

    /// Maximum pooled connections
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// How long a connection waits on a locked database before failing
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// How long to wait for a pooled connection
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,
}

fn default_db_path() -> String {
    dirs::data_dir()
        .map(|d| {
            d.join("timetravel")
                .join("timetravel.db")
                .to_string_lossy()
                .into_owned()
        })
        .unwrap_or_else(|| "timetravel.db".to_string())
}

fn default_pool_size() -> u32 {
    8
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_connection_timeout_ms() -> u64 {
    5000
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            pool_size: default_pool_size(),
            busy_timeout_ms: default_busy_timeout_ms(),
            connection_timeout_ms: default_connection_timeout_ms(),
        }
    }
}

impl DatabaseConfig {
    /// Get the resolved database path (expanding ~ if needed)
    pub fn resolved_path(&self) -> PathBuf {
        if let Some(stripped) = self.path.strip_prefix("~/")
            && let Some(home) = dirs::home_dir()
        {
            return home.join(stripped);
        }
        PathBuf::from(&self.path)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }
}

/// Schema migration settings
#[derive(Debug, Deserialize, Clone)]
pub struct MigrationsConfig {
    #[serde(default = "default_run_on_startup")]
    pub run_on_startup: bool,

    /// Directory of `*.sql` files; the embedded set is used when unset
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

fn default_run_on_startup() -> bool {
    true
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            run_on_startup: default_run_on_startup(),
            dir: None,
        }
    }
}

/// Record store behavior
#[derive(Debug, Deserialize, Clone, Default)]
pub struct RecordsConfig {
    /// Also write an event-log row for every read
    #[serde(default)]
    pub log_reads: bool,
}

impl TimetravelConfig {
    pub const ENV_CONFIG_PATH: &'static str = "TIMETRAVEL_CONFIG";
    pub const DEFAULT_CONFIG_FILENAME: &'static str = "timetravel.toml";

    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let path = Self::resolve_config_path();

        if !path.exists() {
            tracing::debug!(
                path = %path.display(),
                "timetravel config not found, using defaults"
            );
            return Ok(Self::default());
        }

        Self::load_from_path(&path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            TimetravelError::config_with_source(
                format!("failed to read config at {}", path.display()),
                e,
            )
        })?;

        Self::parse(&contents)
    }

    /// Parse configuration from TOML string
    pub fn parse(contents: &str) -> Result<Self> {
        let cfg: TimetravelConfig = toml::from_str(contents)
            .map_err(|e| TimetravelError::config_with_source("failed to parse config", e))?;

        cfg.validate()?;
        Ok(cfg)
    }

    fn resolve_config_path() -> PathBuf {
        if let Ok(path) = std::env::var(Self::ENV_CONFIG_PATH) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .map(|d| d.join("timetravel").join(Self::DEFAULT_CONFIG_FILENAME))
            .unwrap_or_else(|| PathBuf::from(Self::DEFAULT_CONFIG_FILENAME))
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.pool_size == 0 {
            return Err(TimetravelError::config("database.pool_size must be at least 1"));
        }
        if self.database.path.trim().is_empty() {
            return Err(TimetravelError::config("database.path must not be empty"));
        }
        if self.database.busy_timeout_ms == 0 {
            tracing::warn!(
                "database.busy_timeout_ms is 0; concurrent writers will fail instead of waiting"
            );
        }
        Ok(())
    }
}
