//! Per-path modification-time bookkeeping for the differential scanner.

use crate::timestamp::Timestamp;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DifferentialRecord {
    pub path: String,
    /// What `current_modified` held before the latest scan overwrote it
    pub previous_modified: Option<Timestamp>,
    pub current_modified: Option<Timestamp>,
    pub scanned_at: Timestamp,
}

fn row_to_record(row: &Row) -> rusqlite::Result<DifferentialRecord> {
    Ok(DifferentialRecord {
        path: row.get("path")?,
        previous_modified: row.get("previous_modified")?,
        current_modified: row.get("current_modified")?,
        scanned_at: row.get("scanned_at")?,
    })
}

pub fn find_by_job_id(conn: &Connection, job_id: &str) -> crate::Result<HashMap<String, DifferentialRecord>> {
    let mut stmt = conn.prepare("SELECT * FROM differential_records WHERE job_id = ?")?;
    let rows = stmt.query_map(params![job_id], row_to_record)?;
    let mut records = HashMap::new();
    for r in rows {
        let record = r?;
        records.insert(record.path.clone(), record);
    }
    Ok(records)
}

pub fn find(conn: &Connection, job_id: &str, path: &str) -> crate::Result<Option<DifferentialRecord>> {
    let record = conn
        .query_row(
            "SELECT * FROM differential_records WHERE job_id = ?1 AND path = ?2",
            params![job_id, path],
            row_to_record,
        )
        .optional()?;
    Ok(record)
}

/// Shift `current_modified` into `previous_modified` and store the new
/// reading; a first sighting leaves `previous_modified` unset.
pub fn record_scan(
    conn: &Connection,
    job_id: &str,
    path: &str,
    modified: &Timestamp,
    scanned_at: &Timestamp,
) -> crate::Result<()> {
    conn.execute(
        "INSERT INTO differential_records (job_id, path, previous_modified, current_modified, scanned_at)
         VALUES (?1, ?2, NULL, ?3, ?4)
         ON CONFLICT(job_id, path) DO UPDATE SET
           previous_modified = differential_records.current_modified,
           current_modified = excluded.current_modified,
           scanned_at = excluded.scanned_at",
        params![job_id, path, modified, scanned_at],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderKind;
    use crate::testing::Fixture;
    use crate::timestamp;
    use serde_json::json;

    #[test]
    fn test_record_scan_shifts_values() -> crate::Result<()> {
        let fixture = Fixture::new();
        let job = fixture.create_job(ProviderKind::Local, json!({ "output_path": "/b" }));
        let conn = fixture.pool.get()?;
        let t1 = timestamp::from_unix(1_000).unwrap();
        let t2 = timestamp::from_unix(2_000).unwrap();

        record_scan(&conn, &job.id, "/data/a", &t1, &t1)?;
        let record = find(&conn, &job.id, "/data/a")?.unwrap();
        assert_eq!(record.previous_modified, None);
        assert_eq!(record.current_modified, Some(t1));

        record_scan(&conn, &job.id, "/data/a", &t2, &t2)?;
        let record = find(&conn, &job.id, "/data/a")?.unwrap();
        assert_eq!(record.previous_modified, Some(t1));
        assert_eq!(record.current_modified, Some(t2));
        assert_eq!(record.scanned_at, t2);

        assert_eq!(find_by_job_id(&conn, &job.id)?.len(), 1);
        Ok(())
    }
}
