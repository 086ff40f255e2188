//! Shared utilities for the backup engine.

pub mod errors;

pub use errors::{BackupError, ConfigError, Result};
