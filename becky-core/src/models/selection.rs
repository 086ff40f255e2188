use crate::paths;
use crate::timestamp;
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};

/// A root the user opted into backing up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupSelection {
    pub id: i64,
    pub job_id: String,
    pub path: String,
    pub created_at: String,
}

fn row_to_selection(row: &Row) -> rusqlite::Result<BackupSelection> {
    Ok(BackupSelection {
        id: row.get("id")?,
        job_id: row.get("job_id")?,
        path: row.get("path")?,
        created_at: row.get("created_at")?,
    })
}

pub fn find_by_job_id(conn: &Connection, job_id: &str) -> crate::Result<Vec<BackupSelection>> {
    let mut stmt = conn.prepare("SELECT * FROM backup_selections WHERE job_id = ? ORDER BY path")?;
    let rows = stmt.query_map(params![job_id], row_to_selection)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Add a selection; adding the same path twice keeps a single row.
pub fn add(conn: &Connection, job_id: &str, path: &str) -> crate::Result<BackupSelection> {
    let path = paths::normalize(path);
    conn.execute(
        "INSERT OR IGNORE INTO backup_selections (job_id, path, created_at) VALUES (?1, ?2, ?3)",
        params![job_id, path, timestamp::format(&timestamp::now())],
    )?;
    let selection = conn.query_row(
        "SELECT * FROM backup_selections WHERE job_id = ?1 AND path = ?2",
        params![job_id, path],
        row_to_selection,
    )?;
    Ok(selection)
}

pub fn remove(conn: &Connection, job_id: &str, path: &str) -> crate::Result<bool> {
    let changes = conn.execute(
        "DELETE FROM backup_selections WHERE job_id = ?1 AND path = ?2",
        params![job_id, paths::normalize(path)],
    )?;
    Ok(changes > 0)
}
