//! Handlers for the one-shot subcommands. Each returns the JSON document
//! printed on stdout.

use crate::cli::{AddJob, Command, JobCommand, SelectCommand};
use becky_core::config::{FS_ROOT_KEY, PROVIDER_SETTINGS_KEY};
use becky_core::models::backup_job::{self, BackupJob, CreateBackupJob};
use becky_core::models::selection;
use becky_core::models::status::IDLE_MESSAGE;
use becky_core::timestamp;
use becky_core::{BackupError, JobConfig, JobRunner};
use rusqlite::Connection;
use serde_json::{json, Map, Value};

const REDACTED_SETTINGS: [&str; 1] = ["secret_key"];

pub fn execute(runner: &JobRunner, command: Command) -> anyhow::Result<Value> {
    match command {
        Command::Restore { job_id, paths, destination, at } => {
            let restored = runner.restore_files(&job_id, &paths, &destination, at)?;
            Ok(json!({
                "job_id": job_id,
                "restored": restored.len(),
                "paths": restored,
            }))
        }
        Command::Verify { job_id } => match runner.verify_files(&job_id) {
            Ok(verified) => Ok(json!({ "job_id": job_id, "verified": verified })),
            Err(BackupError::VerificationFailed { count, paths }) => {
                anyhow::bail!("{} stored item(s) failed verification: {}", count, paths.join(", "))
            }
            Err(e) => Err(e.into()),
        },
        Command::Browse { job_id, directory, at } => {
            Ok(serde_json::to_value(runner.remote_entries(&job_id, &directory, at)?)?)
        }
        Command::Timestamps { job_id } => {
            let stamps: Vec<String> = runner
                .list_backup_timestamps(&job_id)?
                .iter()
                .map(timestamp::format)
                .collect();
            Ok(json!(stamps))
        }
        Command::Status { job_id } => match runner.status(&job_id)? {
            Some(status) => Ok(serde_json::to_value(status)?),
            None => Ok(json!({
                "job_id": job_id,
                "message": IDLE_MESSAGE,
                "percentage": 0,
                "running": false,
            })),
        },
        Command::Logs { job_id, page, rows } => Ok(serde_json::to_value(runner.logs(&job_id, page, rows)?)?),
        Command::Job(job) => {
            let mut conn = runner.pool().get()?;
            job_command(&mut conn, job)
        }
        Command::Select(select) => {
            let conn = runner.pool().get()?;
            select_command(&conn, select)
        }
        Command::Serve | Command::Run { .. } => {
            anyhow::bail!("serve and run are handled by the async entry point")
        }
    }
}

fn job_command(conn: &mut Connection, command: JobCommand) -> anyhow::Result<Value> {
    match command {
        JobCommand::Add(add) => add_job(conn, add),
        JobCommand::List => {
            let jobs = backup_job::find_all(conn)?;
            Ok(serde_json::to_value(jobs)?)
        }
        JobCommand::Show { job_id } => show_job(conn, &find_job(conn, &job_id)?),
        JobCommand::Set { job_id, name, settings, fs_root } => {
            let job = find_job(conn, &job_id)?;
            let tx = conn.transaction()?;
            if let Some(name) = name {
                backup_job::rename(&tx, &job.id, &name)?;
            }
            if !settings.is_empty() {
                let mut parameters = backup_job::parameters(&tx, &job.id)?;
                let mut merged = match parameters.remove(PROVIDER_SETTINGS_KEY) {
                    Some(Value::Object(existing)) => existing,
                    _ => Map::new(),
                };
                for (key, value) in settings {
                    merged.insert(key, Value::String(value));
                }
                backup_job::set_parameter(&tx, &job.id, PROVIDER_SETTINGS_KEY, &Value::Object(merged))?;
            }
            if let Some(root) = fs_root {
                backup_job::set_parameter(&tx, &job.id, FS_ROOT_KEY, &json!(root))?;
            }
            validate(&tx, &job.id)?;
            tx.commit()?;
            show_job(conn, &find_job(conn, &job_id)?)
        }
        JobCommand::Enable { job_id } => set_enabled(conn, &job_id, true),
        JobCommand::Disable { job_id } => set_enabled(conn, &job_id, false),
        JobCommand::Delete { job_id } => {
            if !backup_job::delete(conn, &job_id)? {
                return Err(BackupError::JobNotFound(job_id).into());
            }
            tracing::info!(job_id = %job_id, "Job deleted");
            Ok(json!({ "deleted": job_id }))
        }
    }
}

fn select_command(conn: &Connection, command: SelectCommand) -> anyhow::Result<Value> {
    match command {
        SelectCommand::Add { job_id, path } => {
            find_job(conn, &job_id)?;
            Ok(serde_json::to_value(selection::add(conn, &job_id, &path)?)?)
        }
        SelectCommand::Remove { job_id, path } => {
            find_job(conn, &job_id)?;
            let removed = selection::remove(conn, &job_id, &path)?;
            Ok(json!({ "job_id": job_id, "path": path, "removed": removed }))
        }
        SelectCommand::List { job_id } => {
            find_job(conn, &job_id)?;
            Ok(serde_json::to_value(selection::find_by_job_id(conn, &job_id)?)?)
        }
    }
}

fn add_job(conn: &mut Connection, add: AddJob) -> anyhow::Result<Value> {
    let settings: Map<String, Value> = add
        .settings
        .into_iter()
        .map(|(key, value)| (key, Value::String(value)))
        .collect();

    let mut parameters = Map::new();
    parameters.insert(PROVIDER_SETTINGS_KEY.to_string(), Value::Object(settings));
    if let Some(root) = add.fs_root {
        parameters.insert(FS_ROOT_KEY.to_string(), json!(root));
    }

    let draft = BackupJob {
        id: String::new(),
        name: add.name.clone(),
        provider: add.provider.as_str().to_string(),
        scanner: add.scanner.map(|s| s.as_str().to_string()),
        running: !add.disabled,
        created_at: String::new(),
        updated_at: String::new(),
    };
    JobConfig::load(&draft, &parameters).map_err(BackupError::from)?;

    let job = backup_job::create(
        conn,
        &CreateBackupJob {
            name: add.name,
            provider: add.provider,
            scanner: add.scanner,
            running: !add.disabled,
            parameters,
        },
    )?;

    tracing::info!(job_id = %job.id, provider = %add.provider, "Job created");
    show_job(conn, &job)
}

/// Reject a job whose stored parameters do not form a usable configuration.
fn validate(conn: &Connection, job_id: &str) -> anyhow::Result<()> {
    let job = find_job(conn, job_id)?;
    let parameters = backup_job::parameters(conn, job_id)?;
    JobConfig::load(&job, &parameters).map_err(BackupError::from)?;
    Ok(())
}

fn show_job(conn: &Connection, job: &BackupJob) -> anyhow::Result<Value> {
    let mut parameters = backup_job::parameters(conn, &job.id)?;
    if let Some(Value::Object(settings)) = parameters.get_mut(PROVIDER_SETTINGS_KEY) {
        for key in REDACTED_SETTINGS {
            if let Some(value) = settings.get_mut(key) {
                *value = json!("********");
            }
        }
    }
    let selections: Vec<String> = selection::find_by_job_id(conn, &job.id)?
        .into_iter()
        .map(|s| s.path)
        .collect();

    let mut document = serde_json::to_value(job)?;
    if let Value::Object(fields) = &mut document {
        fields.insert("parameters".to_string(), Value::Object(parameters));
        fields.insert("selections".to_string(), json!(selections));
    }
    Ok(document)
}

fn set_enabled(conn: &Connection, job_id: &str, enabled: bool) -> anyhow::Result<Value> {
    if !backup_job::set_running(conn, job_id, enabled)? {
        return Err(BackupError::JobNotFound(job_id.to_string()).into());
    }
    Ok(json!({ "job_id": job_id, "enabled": enabled }))
}

fn find_job(conn: &Connection, job_id: &str) -> anyhow::Result<BackupJob> {
    backup_job::find_by_id(conn, job_id)?
        .ok_or_else(|| BackupError::JobNotFound(job_id.to_string()).into())
}
