mod cli;
mod commands;
mod config;
mod logger;
mod scheduler;
mod shutdown;

use crate::cli::{Cli, Command};
use crate::config::AppConfig;
use crate::scheduler::TriggerScheduler;
use becky_core::db::connection::{close_pool, create_pool};
use becky_core::db::migrate::migrate;
use becky_core::JobRunner;
use clap::Parser;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How long `serve` waits for in-flight runs after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(db) = &cli.db {
        config.db_path = db.clone();
    }
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    logger::init(&config.log_level)?;

    // Initialize database
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let pool = create_pool(&config.db_path)?;
    migrate(&pool)?;

    let cancel = CancellationToken::new();
    let runner = JobRunner::new(pool.clone()).with_cancel(cancel.clone());

    let outcome = match cli.command {
        Command::Serve => serve(&config, runner, cancel).await,
        Command::Run { job_id } => run_once(runner, job_id, cancel).await,
        command => {
            match tokio::task::spawn_blocking(move || commands::execute(&runner, command)).await? {
                Ok(document) => {
                    println!("{}", serde_json::to_string_pretty(&document)?);
                    Ok(())
                }
                Err(e) => Err(e),
            }
        }
    };

    close_pool(&pool);
    outcome
}

async fn serve(config: &AppConfig, runner: JobRunner, cancel: CancellationToken) -> anyhow::Result<()> {
    tracing::info!(db = %config.db_path.display(), cron = %config.trigger_schedule, "Starting backup daemon");

    let recovery = runner.clone();
    let recovered = tokio::task::spawn_blocking(move || recovery.recover_interrupted()).await??;
    if recovered > 0 {
        tracing::warn!(count = recovered, "Cleared interrupted runs");
    }

    let scheduler = TriggerScheduler::new(runner, config.max_concurrent_runs).await?;
    scheduler.install(&config.trigger_schedule).await?;
    scheduler.start().await?;

    shutdown::wait_for_signal().await;

    // Cleanup
    tracing::info!("Shutting down...");
    cancel.cancel();
    if let Err(e) = scheduler.shutdown().await {
        tracing::warn!("Scheduler shutdown error: {}", e);
    }
    if !scheduler.drain(DRAIN_TIMEOUT).await {
        tracing::warn!("Runs still in flight after {:?}", DRAIN_TIMEOUT);
    }
    tracing::info!("Daemon stopped");
    Ok(())
}

async fn run_once(runner: JobRunner, job_id: String, cancel: CancellationToken) -> anyhow::Result<()> {
    let watcher = shutdown::cancel_on_signal(cancel.clone());
    let outcome = tokio::task::spawn_blocking(move || runner.run_backup(&job_id)).await?;
    cancel.cancel();
    let _ = watcher.await;

    let summary = outcome?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
