//! Entry points for running, restoring and verifying a job.
//!
//! A backup run is: scan the job's selections, hand the changed paths to
//! the provider, then commit the stored items, the scanner records and the
//! run timestamp in one transaction. The status row says `Idle` on success
//! and `error: …` on failure; it never stays marked running once the run
//! returns.

use crate::config::JobConfig;
use crate::context::RunContext;
use crate::db::connection::DbPool;
use crate::models::backup_item::{self, NewBackupItem};
use crate::models::backup_job::{self, BackupJob};
use crate::models::log::{self, LogRow};
use crate::models::status::{self, BackupStatus, IDLE_MESSAGE};
use crate::models::{metadata, selection};
use crate::paths;
use crate::progress::format_duration;
use crate::provider::command::{CommandRunner, SystemCommandRunner};
use crate::provider::{Provider, RemoteEntries};
use crate::scanner::Scanner;
use crate::timestamp::{self, Timestamp};
use crate::BackupError;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

const TAG: &str = "orchestrator";

pub const SCANNING_MESSAGE: &str = "Scanning for files...";
pub const BACKING_UP_MESSAGE: &str = "Backing up files...";
const QUEUED_MESSAGE: &str = "Waiting to start...";
const INTERRUPTED_MESSAGE: &str = "error: run interrupted before completion";

/// Outcome of a successful backup run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub job_id: String,
    pub timestamp: Timestamp,
    pub scanned: usize,
    pub changed: usize,
    pub committed: usize,
}

/// Runs jobs against the store. Cheap to clone; clones share the set of
/// in-flight runs and the cancellation token.
#[derive(Clone)]
pub struct JobRunner {
    db: DbPool,
    running_jobs: Arc<Mutex<HashSet<String>>>,
    commands: Arc<dyn CommandRunner>,
    cancel: CancellationToken,
}

/// A claim on one run of a job, held from the moment the job is picked
/// until its run ends. Dropping a claim whose run never recorded a final
/// status marks the job interrupted so it does not stay blocked.
pub struct RunClaim {
    db: DbPool,
    running_jobs: Arc<Mutex<HashSet<String>>>,
    job_id: String,
    settled: bool,
}

impl RunClaim {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }
}

impl Drop for RunClaim {
    fn drop(&mut self) {
        if !self.settled {
            let released = self
                .db
                .get()
                .map_err(BackupError::from)
                .and_then(|mut conn| status::replace(&mut conn, &self.job_id, INTERRUPTED_MESSAGE, 0, false));
            if let Err(e) = released {
                tracing::warn!(job_id = %self.job_id, error = %e, "Failed to release run claim");
            }
        }
        lock(&self.running_jobs).remove(&self.job_id);
    }
}

fn lock(m: &Mutex<HashSet<String>>) -> MutexGuard<'_, HashSet<String>> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl JobRunner {
    pub fn new(db: DbPool) -> Self {
        Self {
            db,
            running_jobs: Arc::new(Mutex::new(HashSet::new())),
            commands: Arc::new(SystemCommandRunner),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_command_runner(mut self, commands: Arc<dyn CommandRunner>) -> Self {
        self.commands = commands;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn pool(&self) -> &DbPool {
        &self.db
    }

    /// Stop in-flight runs at their next item boundary.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_running(&self, job_id: &str) -> bool {
        lock(&self.running_jobs).contains(job_id)
    }

    fn find_job(&self, job_id: &str) -> crate::Result<BackupJob> {
        let conn = self.db.get()?;
        backup_job::find_by_id(&conn, job_id)?.ok_or_else(|| BackupError::JobNotFound(job_id.to_string()))
    }

    fn load_config(&self, job: &BackupJob) -> crate::Result<JobConfig> {
        let conn = self.db.get()?;
        let parameters = backup_job::parameters(&conn, &job.id)?;
        Ok(JobConfig::load(job, &parameters)?)
    }

    fn context(&self, config: &JobConfig) -> RunContext {
        RunContext::new(
            self.db.clone(),
            &config.job_id,
            config.fs_root.clone(),
            self.cancel.clone(),
        )
    }

    fn provider(&self, config: &JobConfig) -> crate::Result<Provider> {
        Provider::from_config(config, self.commands.clone())
    }

    /// Claim the job for one run. Refused while another run of the same job
    /// is in flight here, or while its persisted status says running. The
    /// persisted flag is set in the same statement that checks it, so two
    /// processes sharing the database cannot both claim the job.
    pub fn claim(&self, job_id: &str) -> crate::Result<RunClaim> {
        self.find_job(job_id)?;
        let mut running = lock(&self.running_jobs);
        if running.contains(job_id) {
            return Err(BackupError::AlreadyRunning(job_id.to_string()));
        }
        let conn = self.db.get()?;
        if !status::claim(&conn, job_id, QUEUED_MESSAGE)? {
            return Err(BackupError::AlreadyRunning(job_id.to_string()));
        }
        running.insert(job_id.to_string());
        Ok(RunClaim {
            db: self.db.clone(),
            running_jobs: self.running_jobs.clone(),
            job_id: job_id.to_string(),
            settled: false,
        })
    }

    pub fn run_backup(&self, job_id: &str) -> crate::Result<RunSummary> {
        self.run_backup_at(job_id, timestamp::now())
    }

    /// Run a backup stamped with `run_timestamp` (truncated to seconds).
    pub fn run_backup_at(&self, job_id: &str, run_timestamp: Timestamp) -> crate::Result<RunSummary> {
        let claim = self.claim(job_id)?;
        self.run_claimed_at(claim, run_timestamp)
    }

    /// Run a backup for a job claimed earlier with [`JobRunner::claim`].
    pub fn run_claimed(&self, claim: RunClaim) -> crate::Result<RunSummary> {
        self.run_claimed_at(claim, timestamp::now())
    }

    fn run_claimed_at(&self, mut claim: RunClaim, run_timestamp: Timestamp) -> crate::Result<RunSummary> {
        let run_timestamp = timestamp::truncate(run_timestamp);
        let job = self.find_job(&claim.job_id)?;
        let job_id = job.id.as_str();

        let ctx = RunContext::new(self.db.clone(), job_id, PathBuf::from("/"), self.cancel.clone());
        let started = Instant::now();
        tracing::info!(job_id = %job_id, name = %job.name, run = %timestamp::format(&run_timestamp), "Starting backup run");

        match self.backup(&job, &run_timestamp) {
            Ok(summary) => {
                ctx.logger.info(
                    TAG,
                    format!(
                        "Backup finished in {}: {} scanned, {} changed, {} committed.",
                        format_duration(started.elapsed()),
                        summary.scanned,
                        summary.changed,
                        summary.committed
                    ),
                );
                ctx.status.set(IDLE_MESSAGE, 0, false)?;
                claim.settled = true;
                Ok(summary)
            }
            Err(e) => {
                ctx.logger.error(TAG, format!("Backup failed: {}", e));
                match ctx.status.set(&format!("error: {}", e), 0, false) {
                    Ok(_) => claim.settled = true,
                    Err(status_err) => {
                        tracing::error!(job_id = %job_id, error = %status_err, "Failed to record run failure")
                    }
                }
                Err(e)
            }
        }
    }

    fn backup(&self, job: &BackupJob, run_timestamp: &Timestamp) -> crate::Result<RunSummary> {
        let config = self.load_config(job)?;
        let ctx = self.context(&config);
        ctx.status.set(SCANNING_MESSAGE, 0, true)?;

        let roots: Vec<String> = selection::find_by_job_id(&*ctx.conn()?, &job.id)?
            .into_iter()
            .map(|s| s.path)
            .collect();
        let scanner = Scanner::for_kind(config.scanner);
        let report = scanner.scan(&ctx, &roots, run_timestamp)?;

        ctx.status.set(BACKING_UP_MESSAGE, 0, true)?;
        let stored = self.provider(&config)?.backup(&ctx, &report.changed, run_timestamp)?;

        let mut ready: Vec<NewBackupItem> = Vec::with_capacity(stored.len());
        for mut item in stored {
            ctx.check_cancelled()?;
            if item.checksum.is_none() {
                match paths::file_checksum(&item.source) {
                    Ok(checksum) => item.checksum = Some(checksum),
                    Err(e) => {
                        ctx.logger
                            .warning(TAG, format!("Could not checksum {}: {}", item.path, e));
                        continue;
                    }
                }
            }
            ready.push(item);
        }

        ctx.check_cancelled()?;
        ctx.status.publish("Saving backup records...", 100);
        let mut committed = HashSet::with_capacity(ready.len());
        {
            let mut conn = ctx.conn()?;
            let tx = conn.transaction()?;
            for item in &ready {
                backup_item::insert(&tx, &job.id, item)?;
                committed.insert(item.path.clone());
            }
            scanner.commit(&tx, &job.id, &report, &committed, run_timestamp)?;
            metadata::append_backup_timestamp(&tx, &job.id, run_timestamp)?;
            tx.commit()?;
        }

        Ok(RunSummary {
            job_id: job.id.clone(),
            timestamp: *run_timestamp,
            scanned: report.observed.len(),
            changed: report.changed.len(),
            committed: committed.len(),
        })
    }

    /// Restore the selected paths, and everything recorded beneath them, as
    /// they were at `as_of` (latest when `None`).
    pub fn restore_files(
        &self,
        job_id: &str,
        selections: &[String],
        destination: &Path,
        as_of: Option<Timestamp>,
    ) -> crate::Result<Vec<PathBuf>> {
        let config = self.load_config(&self.find_job(job_id)?)?;
        let ctx = self.context(&config);
        let as_of = as_of.map(timestamp::truncate);

        let items = backup_item::resolve_selection(&*ctx.conn()?, job_id, selections, as_of.as_ref())?;
        ctx.logger.info(
            TAG,
            format!(
                "Restoring {} selection(s) as of {}: {} item(s).",
                selections.len(),
                as_of.as_ref().map(timestamp::format).unwrap_or_else(|| "latest".to_string()),
                items.len()
            ),
        );
        self.provider(&config)?.restore(&ctx, &items, destination)
    }

    /// Check every stored file version. Fails with `VerificationFailed`
    /// naming the mismatching paths.
    pub fn verify_files(&self, job_id: &str) -> crate::Result<usize> {
        let config = self.load_config(&self.find_job(job_id)?)?;
        let ctx = self.context(&config);
        self.provider(&config)?.verify(&ctx)
    }

    pub fn remote_entries(
        &self,
        job_id: &str,
        directory: &str,
        as_of: Option<Timestamp>,
    ) -> crate::Result<RemoteEntries> {
        let config = self.load_config(&self.find_job(job_id)?)?;
        let ctx = self.context(&config);
        let as_of = as_of.map(timestamp::truncate);
        self.provider(&config)?.remote_entries(&ctx, directory, as_of.as_ref())
    }

    pub fn list_backup_timestamps(&self, job_id: &str) -> crate::Result<Vec<Timestamp>> {
        self.find_job(job_id)?;
        metadata::backup_timestamps(&*self.db.get()?, job_id)
    }

    /// Current status; `None` for a job that never ran.
    pub fn status(&self, job_id: &str) -> crate::Result<Option<BackupStatus>> {
        self.find_job(job_id)?;
        status::find(&*self.db.get()?, job_id)
    }

    pub fn logs(&self, job_id: &str, page: u32, rows_per_page: u32) -> crate::Result<Vec<LogRow>> {
        self.find_job(job_id)?;
        log::find_page(&*self.db.get()?, job_id, page, rows_per_page)
    }

    /// Enabled jobs with no run in flight.
    pub fn due_jobs(&self) -> crate::Result<Vec<BackupJob>> {
        let conn = self.db.get()?;
        let busy: HashSet<String> = status::find_running(&conn)?
            .into_iter()
            .map(|s| s.job_id)
            .collect();
        Ok(backup_job::find_enabled(&conn)?
            .into_iter()
            .filter(|job| !busy.contains(&job.id) && !self.is_running(&job.id))
            .collect())
    }

    /// Clear running statuses left behind by a process that died mid-run.
    /// Call once at startup, before any run begins.
    pub fn recover_interrupted(&self) -> crate::Result<usize> {
        let stale: Vec<BackupStatus> = status::find_running(&*self.db.get()?)?
            .into_iter()
            .filter(|s| !self.is_running(&s.job_id))
            .collect();

        for s in &stale {
            tracing::warn!(job_id = %s.job_id, message = %s.message, "Clearing status of interrupted run");
            let mut conn = self.db.get()?;
            status::replace(&mut conn, &s.job_id, INTERRUPTED_MESSAGE, 0, false)?;
        }
        Ok(stale.len())
    }
}
