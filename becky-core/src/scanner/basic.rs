use super::ScannedPath;
use crate::context::RunContext;
use crate::models::backup_item;

/// Reports every path the item store has never recorded. Nothing is kept
/// between runs besides the items themselves.
#[derive(Debug, Default, Clone, Copy)]
pub struct BasicScanner;

impl BasicScanner {
    pub fn detect(&self, ctx: &RunContext, observed: &[ScannedPath]) -> crate::Result<Vec<ScannedPath>> {
        let conn = ctx.conn()?;
        let recorded = backup_item::recorded_paths(&conn, &ctx.job_id)?;
        Ok(observed
            .iter()
            .filter(|p| !recorded.contains(&p.path))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderKind;
    use crate::models::backup_item::NewBackupItem;
    use crate::scanner::collect_paths;
    use crate::testing::{ts, Fixture};
    use serde_json::json;

    #[test]
    fn test_reports_unseen_paths_only() -> crate::Result<()> {
        let fixture = Fixture::new();
        let job = fixture.create_job(ProviderKind::Local, json!({ "output_path": "/b" }));
        let file = fixture.write("/data/a.txt", b"a", 1_000);
        fixture.write("/data/b.txt", b"b", 1_000);

        let ctx = fixture.context(&job.id);
        let observed = collect_paths(&ctx, &["/data".to_string()])?;
        assert_eq!(BasicScanner.detect(&ctx, &observed)?.len(), 3);

        let mut item = NewBackupItem::capture("/data/a.txt", &file, Some(ts(10)));
        item.checksum = Some("x".to_string());
        backup_item::insert(&*ctx.conn()?, &job.id, &item)?;

        let changed = BasicScanner.detect(&ctx, &observed)?;
        let paths: Vec<&str> = changed.iter().map(|p| p.path.as_str()).collect();
        assert_eq!(changed.len(), 2);
        assert!(!paths.contains(&"/data/a.txt"));
        Ok(())
    }
}
