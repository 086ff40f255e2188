//! Process configuration.
//!
//! Loaded from a TOML file when `--config` is given, otherwise from the
//! environment (after reading `.env`). Unset keys take their defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// SQLite database holding jobs, items and logs
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Cron expression (with seconds) for the periodic trigger
    #[serde(default = "default_trigger_schedule")]
    pub trigger_schedule: String,

    /// Maximum number of job runs started by the trigger at once
    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: usize,
}

// Default values
fn default_db_path() -> PathBuf {
    PathBuf::from("/var/lib/becky/becky.db")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_trigger_schedule() -> String {
    // Top of every hour
    "0 0 * * * *".to_string()
}

fn default_max_concurrent_runs() -> usize {
    2
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            log_level: default_log_level(),
            trigger_schedule: default_trigger_schedule(),
            max_concurrent_runs: default_max_concurrent_runs(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config.validated())
    }

    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from `BECKY_DB_PATH`, `LOG_LEVEL`, `TRIGGER_SCHEDULE` and
    /// `MAX_CONCURRENT_RUNS` as returned by `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            db_path: lookup("BECKY_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(default_db_path),
            log_level: lookup("LOG_LEVEL").unwrap_or_else(default_log_level),
            trigger_schedule: lookup("TRIGGER_SCHEDULE").unwrap_or_else(default_trigger_schedule),
            max_concurrent_runs: lookup("MAX_CONCURRENT_RUNS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_max_concurrent_runs),
        }
        .validated()
    }

    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::from_env()),
        }
    }

    fn validated(mut self) -> Self {
        self.max_concurrent_runs = self.max_concurrent_runs.max(1);
        self
    }
}
