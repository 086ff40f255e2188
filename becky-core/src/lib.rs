//! Becky backup engine
//!
//! Scans selected directory trees for changes, stores changed files in a
//! local, SSH or S3 backend, and keeps a versioned record of every stored
//! path so any earlier run can be browsed and restored.

pub mod config;
pub mod context;
pub mod db;
pub mod fs;
pub mod logging;
pub mod models;
pub mod orchestrator;
pub mod paths;
pub mod progress;
pub mod provider;
pub mod scanner;
pub mod timestamp;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use config::{JobConfig, ProviderKind, ScannerKind};
pub use orchestrator::{JobRunner, RunClaim, RunSummary};
pub use utils::errors::{BackupError, ConfigError};
pub type Result<T> = std::result::Result<T, BackupError>;
