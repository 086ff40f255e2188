use crate::timestamp::{self, Timestamp};
use rusqlite::{params, Connection};

/// Appended once per successful run; the values are the restorable points in time.
pub const BACKUP_TIMESTAMP_KEY: &str = "backup_timestamp";

pub fn append(conn: &Connection, job_id: &str, key: &str, value: &str) -> crate::Result<()> {
    conn.execute(
        "INSERT INTO backup_metadata (job_id, key, value, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![job_id, key, value, timestamp::format(&timestamp::now())],
    )?;
    Ok(())
}

/// Values stored under `key`, in insertion order.
pub fn values(conn: &Connection, job_id: &str, key: &str) -> crate::Result<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT value FROM backup_metadata WHERE job_id = ?1 AND key = ?2 ORDER BY id")?;
    let rows = stmt.query_map(params![job_id, key], |row| row.get::<_, String>(0))?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn append_backup_timestamp(conn: &Connection, job_id: &str, run_timestamp: &Timestamp) -> crate::Result<()> {
    append(conn, job_id, BACKUP_TIMESTAMP_KEY, &timestamp::format(run_timestamp))
}

/// Timestamps of successful runs, ascending and without duplicates.
pub fn backup_timestamps(conn: &Connection, job_id: &str) -> crate::Result<Vec<Timestamp>> {
    let mut stamps: Vec<Timestamp> = values(conn, job_id, BACKUP_TIMESTAMP_KEY)?
        .iter()
        .filter_map(|value| timestamp::parse(value))
        .collect();
    stamps.sort();
    stamps.dedup();
    Ok(stamps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderKind;
    use crate::testing::Fixture;
    use serde_json::json;

    #[test]
    fn test_backup_timestamps_sorted() -> crate::Result<()> {
        let fixture = Fixture::new();
        let job = fixture.create_job(ProviderKind::Local, json!({ "output_path": "/b" }));
        let conn = fixture.pool.get()?;

        let t1 = timestamp::from_unix(1_000).unwrap();
        let t2 = timestamp::from_unix(2_000).unwrap();
        append_backup_timestamp(&conn, &job.id, &t2)?;
        append_backup_timestamp(&conn, &job.id, &t1)?;
        append_backup_timestamp(&conn, &job.id, &t2)?;
        append(&conn, &job.id, "other", "x")?;

        assert_eq!(backup_timestamps(&conn, &job.id)?, vec![t1, t2]);
        assert_eq!(values(&conn, &job.id, "other")?, vec!["x".to_string()]);
        Ok(())
    }
}
