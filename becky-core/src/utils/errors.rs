//! Error types for the backup engine.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transfer error: {0}")]
    Transfer(String),

    #[error("Verification failed for {count} item(s)")]
    VerificationFailed { count: usize, paths: Vec<String> },

    #[error("Scan error at {path}: {source}")]
    Scan {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Job already running: {0}")]
    AlreadyRunning(String),

    #[error("Invalid log level: {0}")]
    InvalidLogLevel(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Raised while turning a job's stored parameters into a typed configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing field `{field}`")]
    MissingField { field: String },

    #[error("invalid field `{field}`: {reason}")]
    InvalidField { field: String, reason: String },

    #[error("provider `{0}` is not supported")]
    UnsupportedProvider(String),

    #[error("scanner `{0}` is not supported")]
    UnsupportedScanner(String),
}

pub type Result<T> = std::result::Result<T, BackupError>;
