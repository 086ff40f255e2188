//! Status publishing and throttled progress for a running job.

use crate::db::connection::DbPool;
use crate::models::status::{self, BackupStatus};
use std::time::Duration;

/// Publish a status every this many processed items.
const DEFAULT_INTERVAL: usize = 100;

/// Writes a job's status row.
#[derive(Clone)]
pub struct StatusReporter {
    pool: DbPool,
    job_id: String,
}

impl StatusReporter {
    pub fn new(pool: DbPool, job_id: impl Into<String>) -> Self {
        Self {
            pool,
            job_id: job_id.into(),
        }
    }

    pub fn set(&self, message: &str, percentage: u8, running: bool) -> crate::Result<BackupStatus> {
        let mut conn = self.pool.get()?;
        status::replace(&mut conn, &self.job_id, message, percentage, running)
    }

    /// Publish a running status; a failed write is logged and ignored.
    pub fn publish(&self, message: &str, percentage: u8) {
        if let Err(e) = self.set(message, percentage, true) {
            tracing::warn!(job_id = %self.job_id, error = %e, "Failed to publish status");
        }
    }
}

/// Counts processed items for one stage of a run.
#[derive(Debug, Clone)]
pub struct Progress {
    stage: String,
    total: usize,
    processed: usize,
    interval: usize,
}

impl Progress {
    pub fn new(stage: impl Into<String>, total: usize) -> Self {
        Self {
            stage: stage.into(),
            total,
            processed: 0,
            interval: DEFAULT_INTERVAL,
        }
    }

    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        ((self.processed.min(self.total) * 100) / self.total) as u8
    }

    pub fn message(&self) -> String {
        format!("{} {}/{}", self.stage, self.processed, self.total)
    }

    /// Count one item. Returns the status to publish on every interval
    /// boundary and on the last item.
    pub fn tick(&mut self) -> Option<(String, u8)> {
        self.processed += 1;
        if self.processed % self.interval == 0 || self.processed == self.total {
            Some((self.message(), self.percent()))
        } else {
            None
        }
    }

    pub fn advance(&mut self, reporter: &StatusReporter) {
        if let Some((message, percent)) = self.tick() {
            reporter.publish(&message, percent);
        }
    }
}

pub fn format_duration(duration: Duration) -> String {
    let seconds = duration.as_secs();
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderKind;
    use crate::testing::Fixture;
    use serde_json::json;

    #[test]
    fn test_tick_publishes_on_interval_and_end() {
        let mut progress = Progress {
            interval: 2,
            ..Progress::new("Copying files", 5)
        };
        assert_eq!(progress.tick(), None);
        assert_eq!(progress.tick(), Some(("Copying files 2/5".to_string(), 40)));
        assert_eq!(progress.tick(), None);
        assert!(progress.tick().is_some());
        assert_eq!(progress.tick(), Some(("Copying files 5/5".to_string(), 100)));
    }

    #[test]
    fn test_default_interval_publishes_every_hundred() {
        let mut progress = Progress::new("Copying files", 250);
        let published: Vec<usize> = (1..=250).filter(|_| progress.tick().is_some()).collect();
        assert_eq!(published, vec![100, 200, 250]);
    }

    #[test]
    fn test_empty_stage_is_complete() {
        let progress = Progress::new("Scanning", 0);
        assert_eq!(progress.percent(), 100);
    }

    #[test]
    fn test_reporter_writes_status() -> crate::Result<()> {
        let fixture = Fixture::new();
        let job = fixture.create_job(ProviderKind::Local, json!({ "output_path": "/b" }));
        let reporter = StatusReporter::new(fixture.pool.clone(), &job.id);

        let mut progress = Progress::new("Copying files", 1);
        progress.advance(&reporter);

        let conn = fixture.pool.get()?;
        let status = status::find(&conn, &job.id)?.unwrap();
        assert_eq!(status.message, "Copying files 1/1");
        assert_eq!(status.percentage, 100);
        assert!(status.running);
        Ok(())
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(30)), "30s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
        assert_eq!(format_duration(Duration::from_secs(3665)), "1h 1m");
    }
}
