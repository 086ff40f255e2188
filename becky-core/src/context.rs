//! Handles shared by the scanner and provider during one operation on a job.

use crate::db::connection::{DbConnection, DbPool};
use crate::logging::JobLogger;
use crate::progress::StatusReporter;
use crate::BackupError;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct RunContext {
    pub pool: DbPool,
    pub job_id: String,
    /// Root that logical paths are resolved against
    pub fs_root: PathBuf,
    pub logger: JobLogger,
    pub status: StatusReporter,
    pub cancel: CancellationToken,
}

impl RunContext {
    pub fn new(pool: DbPool, job_id: &str, fs_root: PathBuf, cancel: CancellationToken) -> Self {
        Self {
            logger: JobLogger::new(pool.clone(), job_id),
            status: StatusReporter::new(pool.clone(), job_id),
            pool,
            job_id: job_id.to_string(),
            fs_root,
            cancel,
        }
    }

    pub fn conn(&self) -> crate::Result<DbConnection> {
        Ok(self.pool.get()?)
    }

    /// Fails with `Cancelled` once the token has fired. Checked between
    /// items, never in the middle of one.
    pub fn check_cancelled(&self) -> crate::Result<()> {
        if self.cancel.is_cancelled() {
            Err(BackupError::Cancelled)
        } else {
            Ok(())
        }
    }
}
