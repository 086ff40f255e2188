use super::{ScanReport, ScannedPath};
use crate::context::RunContext;
use crate::models::differential::{self, DifferentialRecord};
use crate::timestamp::Timestamp;
use rusqlite::Connection;
use std::collections::HashSet;

/// Compares each path's modification time against the reading stored by
/// the previous committed scan.
#[derive(Debug, Default, Clone, Copy)]
pub struct DifferentialScanner;

/// A path is changed when it was never recorded or its modification time
/// moved in either direction.
pub fn is_changed(record: Option<&DifferentialRecord>, modified: &Timestamp) -> bool {
    match record.and_then(|r| r.current_modified.as_ref()) {
        Some(current) => current != modified,
        None => true,
    }
}

impl DifferentialScanner {
    pub fn detect(&self, ctx: &RunContext, observed: &[ScannedPath]) -> crate::Result<Vec<ScannedPath>> {
        let conn = ctx.conn()?;
        let records = differential::find_by_job_id(&conn, &ctx.job_id)?;
        Ok(observed
            .iter()
            .filter(|p| is_changed(records.get(&p.path), &p.modified))
            .cloned()
            .collect())
    }

    /// Advance the record of every observed path, except changed paths that
    /// did not reach the item store.
    pub fn commit(
        &self,
        conn: &Connection,
        job_id: &str,
        report: &ScanReport,
        committed: &HashSet<String>,
        scanned_at: &Timestamp,
    ) -> crate::Result<()> {
        let changed: HashSet<&str> = report.changed.iter().map(|p| p.path.as_str()).collect();
        for scanned in &report.observed {
            if changed.contains(scanned.path.as_str()) && !committed.contains(&scanned.path) {
                continue;
            }
            differential::record_scan(conn, job_id, &scanned.path, &scanned.modified, scanned_at)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderKind;
    use crate::scanner::Scanner;
    use crate::testing::{set_mtime, ts, Fixture};
    use serde_json::json;

    fn changed_paths(report: &ScanReport) -> Vec<&str> {
        report.changed.iter().map(|p| p.path.as_str()).collect()
    }

    fn all_committed(report: &ScanReport) -> HashSet<String> {
        report.changed.iter().map(|p| p.path.clone()).collect()
    }

    #[test]
    fn test_is_changed() {
        let record = DifferentialRecord {
            path: "/a".to_string(),
            previous_modified: None,
            current_modified: Some(ts(100)),
            scanned_at: ts(100),
        };
        assert!(is_changed(None, &ts(100)));
        assert!(!is_changed(Some(&record), &ts(100)));
        assert!(is_changed(Some(&record), &ts(200)));
        assert!(is_changed(Some(&record), &ts(50)));
    }

    #[test]
    fn test_first_scan_then_only_modified_file() -> crate::Result<()> {
        let fixture = Fixture::new();
        let job = fixture.create_job(ProviderKind::LocalDifferential, json!({ "output_path": "/b" }));
        fixture.write("/data/a.txt", b"a", 1_000);
        let b = fixture.write("/data/b.txt", b"b", 1_000);
        fixture.write("/data/.hidden", b"h", 1_000);

        let ctx = fixture.context(&job.id);
        let scanner = Scanner::for_kind(crate::config::ScannerKind::LocalDifferential);
        let roots = vec!["/data".to_string()];

        let first = scanner.scan(&ctx, &roots, &ts(5_000))?;
        assert_eq!(first.changed.len(), 4);
        scanner.commit(&*ctx.conn()?, &job.id, &first, &all_committed(&first), &ts(5_000))?;

        let unchanged = scanner.scan(&ctx, &roots, &ts(6_000))?;
        assert!(unchanged.changed.is_empty());
        assert_eq!(unchanged.observed.len(), 4);

        set_mtime(&b, 2_000);
        let second = scanner.scan(&ctx, &roots, &ts(7_000))?;
        assert_eq!(changed_paths(&second), vec!["/data/b.txt"]);
        scanner.commit(&*ctx.conn()?, &job.id, &second, &all_committed(&second), &ts(7_000))?;

        let record = differential::find(&*ctx.conn()?, &job.id, "/data/b.txt")?.unwrap();
        assert_eq!(record.previous_modified, Some(ts(1_000)));
        assert_eq!(record.current_modified, Some(ts(2_000)));
        assert_eq!(record.scanned_at, ts(7_000));
        Ok(())
    }

    #[test]
    fn test_scan_without_commit_is_repeatable() -> crate::Result<()> {
        let fixture = Fixture::new();
        let job = fixture.create_job(ProviderKind::LocalDifferential, json!({ "output_path": "/b" }));
        fixture.write("/data/a.txt", b"a", 1_000);

        let ctx = fixture.context(&job.id);
        let scanner = Scanner::for_kind(crate::config::ScannerKind::LocalDifferential);
        let roots = vec!["/data".to_string()];

        let first = scanner.scan(&ctx, &roots, &ts(5_000))?;
        let again = scanner.scan(&ctx, &roots, &ts(5_001))?;
        assert_eq!(first.changed, again.changed);
        assert!(differential::find_by_job_id(&*ctx.conn()?, &job.id)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_uncommitted_path_stays_changed() -> crate::Result<()> {
        let fixture = Fixture::new();
        let job = fixture.create_job(ProviderKind::LocalDifferential, json!({ "output_path": "/b" }));
        fixture.write("/data/a.txt", b"a", 1_000);
        fixture.write("/data/b.txt", b"b", 1_000);

        let ctx = fixture.context(&job.id);
        let scanner = Scanner::for_kind(crate::config::ScannerKind::LocalDifferential);
        let roots = vec!["/data".to_string()];

        let first = scanner.scan(&ctx, &roots, &ts(5_000))?;
        let mut committed = all_committed(&first);
        committed.remove("/data/b.txt");
        scanner.commit(&*ctx.conn()?, &job.id, &first, &committed, &ts(5_000))?;

        let second = scanner.scan(&ctx, &roots, &ts(6_000))?;
        assert_eq!(changed_paths(&second), vec!["/data/b.txt"]);
        Ok(())
    }

    #[test]
    fn test_missing_selection_contributes_nothing() -> crate::Result<()> {
        let fixture = Fixture::new();
        let job = fixture.create_job(ProviderKind::LocalDifferential, json!({ "output_path": "/b" }));

        let ctx = fixture.context(&job.id);
        let scanner = Scanner::for_kind(crate::config::ScannerKind::LocalDifferential);
        let report = scanner.scan(&ctx, &["/nowhere".to_string()], &ts(5_000))?;
        assert!(report.observed.is_empty());
        assert!(report.changed.is_empty());
        Ok(())
    }
}
