use becky_core::{BackupError, JobRunner, RunClaim};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_cron_scheduler::{Job, JobScheduler};

/// Periodic trigger: on every tick, start a run for each enabled job that
/// is not already running, at most `max_concurrent_runs` at a time.
pub struct TriggerScheduler {
    scheduler: Mutex<JobScheduler>,
    runner: JobRunner,
    permits: Arc<Semaphore>,
    max_concurrent_runs: usize,
}

impl TriggerScheduler {
    pub async fn new(runner: JobRunner, max_concurrent_runs: usize) -> anyhow::Result<Self> {
        let scheduler = JobScheduler::new().await?;
        let max_concurrent_runs = max_concurrent_runs.max(1);
        Ok(Self {
            scheduler: Mutex::new(scheduler),
            runner,
            permits: Arc::new(Semaphore::new(max_concurrent_runs)),
            max_concurrent_runs,
        })
    }

    pub async fn install(&self, cron_expression: &str) -> anyhow::Result<()> {
        let runner = self.runner.clone();
        let permits = self.permits.clone();

        let job = Job::new_async(cron_expression, move |_uuid, _lock| {
            let runner = runner.clone();
            let permits = permits.clone();
            Box::pin(async move {
                trigger_due_jobs(runner, permits).await;
            })
        })?;

        self.scheduler.lock().await.add(job).await?;
        tracing::info!(cron = %cron_expression, "Backup trigger installed");
        Ok(())
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        self.scheduler.lock().await.start().await?;
        Ok(())
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.scheduler.lock().await.shutdown().await?;
        Ok(())
    }

    /// Wait for started runs to return, up to `timeout`. Returns false on timeout.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let all = u32::try_from(self.max_concurrent_runs).unwrap_or(u32::MAX);
        tokio::time::timeout(timeout, self.permits.acquire_many(all))
            .await
            .is_ok()
    }
}

/// Claim every job that is due now, then start their runs. Each run holds
/// one permit for its whole duration; claimed jobs beyond the limit wait
/// for a free permit and are not picked again by later ticks.
pub async fn trigger_due_jobs(runner: JobRunner, permits: Arc<Semaphore>) -> Vec<JoinHandle<()>> {
    let lookup = runner.clone();
    let claims = match tokio::task::spawn_blocking(move || claim_due_jobs(&lookup)).await {
        Ok(Ok(claims)) => claims,
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Failed to list due jobs");
            return Vec::new();
        }
        Err(e) => {
            tracing::error!(error = %e, "Due-job lookup panicked");
            return Vec::new();
        }
    };

    if claims.is_empty() {
        tracing::debug!("No jobs due");
        return Vec::new();
    }
    tracing::info!(count = claims.len(), "Triggering due jobs");

    let mut handles = Vec::with_capacity(claims.len());
    for claim in claims {
        let Ok(permit) = permits.clone().acquire_owned().await else {
            tracing::warn!("Run permits closed, not starting further jobs");
            break;
        };
        let runner = runner.clone();
        handles.push(tokio::spawn(async move {
            let job_id = claim.job_id().to_string();
            let outcome = tokio::task::spawn_blocking(move || runner.run_claimed(claim)).await;
            match outcome {
                Ok(Ok(summary)) => {
                    tracing::info!(job_id = %job_id, changed = summary.changed, committed = summary.committed, "Scheduled backup finished")
                }
                Ok(Err(e)) => tracing::error!(job_id = %job_id, error = %e, "Scheduled backup failed"),
                Err(e) => tracing::error!(job_id = %job_id, error = %e, "Scheduled backup panicked"),
            }
            drop(permit);
        }));
    }
    handles
}

fn claim_due_jobs(runner: &JobRunner) -> becky_core::Result<Vec<RunClaim>> {
    let mut claims = Vec::new();
    for job in runner.due_jobs()? {
        match runner.claim(&job.id) {
            Ok(claim) => claims.push(claim),
            Err(BackupError::AlreadyRunning(_)) => {
                tracing::warn!(job_id = %job.id, "Skipping scheduled run: job already running")
            }
            Err(e) => tracing::error!(job_id = %job.id, error = %e, "Failed to claim job"),
        }
    }
    Ok(claims)
}
