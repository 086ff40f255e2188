use crate::config::{ProviderKind, ScannerKind};
use crate::timestamp;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// ── BackupJob ──

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupJob {
    pub id: String,
    pub name: String,
    pub provider: String,
    pub scanner: Option<String>,
    /// Eligible for runs started by the periodic trigger
    pub running: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct CreateBackupJob {
    pub name: String,
    pub provider: ProviderKind,
    pub scanner: Option<ScannerKind>,
    pub running: bool,
    pub parameters: Map<String, Value>,
}

fn row_to_job(row: &Row) -> rusqlite::Result<BackupJob> {
    Ok(BackupJob {
        id: row.get("id")?,
        name: row.get("name")?,
        provider: row.get("provider")?,
        scanner: row.get("scanner")?,
        running: row.get("running")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

pub fn find_all(conn: &Connection) -> crate::Result<Vec<BackupJob>> {
    let mut stmt = conn.prepare("SELECT * FROM backup_jobs ORDER BY created_at, name")?;
    let rows = stmt.query_map([], row_to_job)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Jobs whose `running` flag makes them eligible for the periodic trigger.
pub fn find_enabled(conn: &Connection) -> crate::Result<Vec<BackupJob>> {
    let mut stmt =
        conn.prepare("SELECT * FROM backup_jobs WHERE running = 1 ORDER BY created_at, name")?;
    let rows = stmt.query_map([], row_to_job)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn find_by_id(conn: &Connection, id: &str) -> crate::Result<Option<BackupJob>> {
    let job = conn
        .query_row("SELECT * FROM backup_jobs WHERE id = ?", params![id], row_to_job)
        .optional()?;
    Ok(job)
}

pub fn create(conn: &mut Connection, data: &CreateBackupJob) -> crate::Result<BackupJob> {
    let id = Uuid::new_v4().to_string();
    let now = timestamp::format(&timestamp::now());

    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO backup_jobs (id, name, provider, scanner, running, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            id,
            data.name,
            data.provider.as_str(),
            data.scanner.map(|s| s.as_str()),
            data.running,
            now,
            now,
        ],
    )?;
    for (key, value) in &data.parameters {
        set_parameter(&tx, &id, key, value)?;
    }
    tx.commit()?;

    find_by_id(conn, &id)?.ok_or_else(|| crate::BackupError::JobNotFound(id))
}

pub fn rename(conn: &Connection, id: &str, name: &str) -> crate::Result<bool> {
    let changes = conn.execute(
        "UPDATE backup_jobs SET name = ?1, updated_at = ?2 WHERE id = ?3",
        params![name, timestamp::format(&timestamp::now()), id],
    )?;
    Ok(changes > 0)
}

pub fn set_running(conn: &Connection, id: &str, running: bool) -> crate::Result<bool> {
    let changes = conn.execute(
        "UPDATE backup_jobs SET running = ?1, updated_at = ?2 WHERE id = ?3",
        params![running, timestamp::format(&timestamp::now()), id],
    )?;
    Ok(changes > 0)
}

/// Delete a job; selections, records, items, metadata, status and logs
/// go with it through the foreign keys.
pub fn delete(conn: &Connection, id: &str) -> crate::Result<bool> {
    let changes = conn.execute("DELETE FROM backup_jobs WHERE id = ?", params![id])?;
    Ok(changes > 0)
}

// ── Parameters ──

pub fn parameters(conn: &Connection, job_id: &str) -> crate::Result<Map<String, Value>> {
    let mut stmt = conn.prepare("SELECT key, value FROM backup_parameters WHERE job_id = ?")?;
    let rows = stmt.query_map(params![job_id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    let mut map = Map::new();
    for r in rows {
        let (key, raw) = r?;
        map.insert(key, serde_json::from_str(&raw)?);
    }
    Ok(map)
}

pub fn set_parameter(conn: &Connection, job_id: &str, key: &str, value: &Value) -> crate::Result<()> {
    conn.execute(
        "INSERT INTO backup_parameters (job_id, key, value) VALUES (?1, ?2, ?3)
         ON CONFLICT(job_id, key) DO UPDATE SET value = excluded.value",
        params![job_id, key, serde_json::to_string(value)?],
    )?;
    Ok(())
}

pub fn remove_parameter(conn: &Connection, job_id: &str, key: &str) -> crate::Result<bool> {
    let changes = conn.execute(
        "DELETE FROM backup_parameters WHERE job_id = ?1 AND key = ?2",
        params![job_id, key],
    )?;
    Ok(changes > 0)
}
