use crate::timestamp::Timestamp;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, Row};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
    Debug,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Debug => "DEBUG",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = crate::BackupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "INFO" => Ok(LogLevel::Info),
            "WARNING" | "WARN" => Ok(LogLevel::Warning),
            "ERROR" => Ok(LogLevel::Error),
            "DEBUG" => Ok(LogLevel::Debug),
            _ => Err(crate::BackupError::InvalidLogLevel(s.to_string())),
        }
    }
}

impl ToSql for LogLevel {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for LogLevel {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: crate::BackupError| FromSqlError::Other(Box::new(e)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogRow {
    pub id: i64,
    pub job_id: String,
    pub level: LogLevel,
    pub tag: String,
    pub message: String,
    pub timestamp: Timestamp,
}

fn row_to_log(row: &Row) -> rusqlite::Result<LogRow> {
    Ok(LogRow {
        id: row.get("id")?,
        job_id: row.get("job_id")?,
        level: row.get("level")?,
        tag: row.get("tag")?,
        message: row.get("message")?,
        timestamp: row.get("timestamp")?,
    })
}

pub fn insert(
    conn: &Connection,
    job_id: &str,
    level: LogLevel,
    tag: &str,
    message: &str,
    timestamp: &Timestamp,
) -> crate::Result<()> {
    conn.execute(
        "INSERT INTO backup_logs (job_id, level, tag, message, timestamp) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![job_id, level, tag, message, timestamp],
    )?;
    Ok(())
}

/// One page of a job's log, newest first. Pages start at 0.
pub fn find_page(conn: &Connection, job_id: &str, page: u32, rows_per_page: u32) -> crate::Result<Vec<LogRow>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM backup_logs WHERE job_id = ?1 ORDER BY timestamp DESC, id DESC LIMIT ?2 OFFSET ?3",
    )?;
    let offset = i64::from(page) * i64::from(rows_per_page);
    let rows = stmt.query_map(params![job_id, rows_per_page, offset], row_to_log)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}
