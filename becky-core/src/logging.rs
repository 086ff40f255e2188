//! Job-scoped log sink.
//!
//! Each message becomes a `tracing` event and a row in the job's log table,
//! so it is visible both in the process output and to whoever reads the
//! job history later.

use crate::db::connection::DbPool;
use crate::models::log::{self, LogLevel};
use crate::timestamp;

#[derive(Clone)]
pub struct JobLogger {
    pool: DbPool,
    job_id: String,
}

impl JobLogger {
    pub fn new(pool: DbPool, job_id: impl Into<String>) -> Self {
        Self {
            pool,
            job_id: job_id.into(),
        }
    }

    /// Record a message. Persistence failures are reported through
    /// `tracing` and never reach the caller.
    pub fn log(&self, level: LogLevel, tag: &str, message: &str) {
        let job_id = self.job_id.as_str();
        match level {
            LogLevel::Info => tracing::info!(job_id, tag, "{}", message),
            LogLevel::Warning => tracing::warn!(job_id, tag, "{}", message),
            LogLevel::Error => tracing::error!(job_id, tag, "{}", message),
            LogLevel::Debug => tracing::debug!(job_id, tag, "{}", message),
        }

        if let Err(e) = self.persist(level, tag, message) {
            tracing::warn!(job_id, tag, error = %e, "Failed to persist log row");
        }
    }

    fn persist(&self, level: LogLevel, tag: &str, message: &str) -> crate::Result<()> {
        let conn = self.pool.get()?;
        log::insert(&conn, &self.job_id, level, tag, message, &timestamp::now())
    }

    pub fn info(&self, tag: &str, message: impl AsRef<str>) {
        self.log(LogLevel::Info, tag, message.as_ref());
    }

    pub fn warning(&self, tag: &str, message: impl AsRef<str>) {
        self.log(LogLevel::Warning, tag, message.as_ref());
    }

    pub fn error(&self, tag: &str, message: impl AsRef<str>) {
        self.log(LogLevel::Error, tag, message.as_ref());
    }

    pub fn debug(&self, tag: &str, message: impl AsRef<str>) {
        self.log(LogLevel::Debug, tag, message.as_ref());
    }
}
