//! Current progress of a job, one row per job.

use crate::timestamp::{self, Timestamp};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

pub const IDLE_MESSAGE: &str = "Idle";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupStatus {
    pub job_id: String,
    pub message: String,
    pub percentage: u8,
    pub running: bool,
    pub updated_at: Timestamp,
}

fn row_to_status(row: &Row) -> rusqlite::Result<BackupStatus> {
    Ok(BackupStatus {
        job_id: row.get("job_id")?,
        message: row.get("message")?,
        percentage: row.get("percentage")?,
        running: row.get("running")?,
        updated_at: row.get("updated_at")?,
    })
}

pub fn find(conn: &Connection, job_id: &str) -> crate::Result<Option<BackupStatus>> {
    let status = conn
        .query_row("SELECT * FROM backup_status WHERE job_id = ?", params![job_id], row_to_status)
        .optional()?;
    Ok(status)
}

/// Replace the job's status wholesale. Delete and insert commit together,
/// so readers see either the old row or the new one.
pub fn replace(
    conn: &mut Connection,
    job_id: &str,
    message: &str,
    percentage: u8,
    running: bool,
) -> crate::Result<BackupStatus> {
    let status = BackupStatus {
        job_id: job_id.to_string(),
        message: message.to_string(),
        percentage: percentage.min(100),
        running,
        updated_at: timestamp::now(),
    };

    let tx = conn.transaction()?;
    tx.execute("DELETE FROM backup_status WHERE job_id = ?", params![job_id])?;
    tx.execute(
        "INSERT INTO backup_status (job_id, message, percentage, running, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            status.job_id,
            status.message,
            status.percentage,
            status.running,
            status.updated_at
        ],
    )?;
    tx.commit()?;
    Ok(status)
}

/// Mark the job running unless its status already says so. Returns false
/// when another run holds the job. Check and write are one statement.
pub fn claim(conn: &Connection, job_id: &str, message: &str) -> crate::Result<bool> {
    let changes = conn.execute(
        "INSERT INTO backup_status (job_id, message, percentage, running, updated_at)
         VALUES (?1, ?2, 0, 1, ?3)
         ON CONFLICT(job_id) DO UPDATE SET
           message = excluded.message,
           percentage = 0,
           running = 1,
           updated_at = excluded.updated_at
         WHERE backup_status.running = 0",
        params![job_id, message, timestamp::now()],
    )?;
    Ok(changes > 0)
}

/// Statuses still marked running, e.g. left behind by a crashed process.
pub fn find_running(conn: &Connection) -> crate::Result<Vec<BackupStatus>> {
    let mut stmt = conn.prepare("SELECT * FROM backup_status WHERE running = 1")?;
    let rows = stmt.query_map([], row_to_status)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}
