//! Fixtures shared by the unit tests.

use crate::config::{ProviderKind, FS_ROOT_KEY, PROVIDER_SETTINGS_KEY};
use crate::context::RunContext;
use crate::db::connection::{create_pool, DbPool};
use crate::db::migrate::migrate;
use crate::models::{backup_job, selection};
use crate::timestamp::{self, Timestamp};
use serde_json::{json, Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

pub(crate) fn ts(secs: i64) -> Timestamp {
    timestamp::from_unix(secs).unwrap()
}

/// Set a path's modification time to `secs` after the epoch.
pub(crate) fn set_mtime(path: &Path, secs: u64) {
    let file = fs::File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(secs)).unwrap();
}

pub(crate) struct Fixture {
    pub dir: TempDir,
    pub pool: DbPool,
    /// `fs_root` of jobs created through the fixture
    pub root: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let pool = create_pool(&dir.path().join("becky.db")).unwrap();
        migrate(&pool).unwrap();
        let root = dir.path().join("root");
        fs::create_dir_all(&root).unwrap();
        Self { dir, pool, root }
    }

    /// A scratch directory next to the source root.
    pub fn scratch(&self, name: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::create_dir_all(&path).unwrap();
        path
    }

    pub fn create_job(&self, provider: ProviderKind, settings: Value) -> backup_job::BackupJob {
        let mut parameters = Map::new();
        parameters.insert(PROVIDER_SETTINGS_KEY.to_string(), settings);
        parameters.insert(FS_ROOT_KEY.to_string(), json!(self.root.to_string_lossy()));

        let mut conn = self.pool.get().unwrap();
        backup_job::create(
            &mut conn,
            &backup_job::CreateBackupJob {
                name: "test job".to_string(),
                provider,
                scanner: None,
                running: true,
                parameters,
            },
        )
        .unwrap()
    }

    pub fn select(&self, job_id: &str, path: &str) {
        let conn = self.pool.get().unwrap();
        selection::add(&conn, job_id, path).unwrap();
    }

    pub fn context(&self, job_id: &str) -> RunContext {
        RunContext::new(self.pool.clone(), job_id, self.root.clone(), CancellationToken::new())
    }

    pub fn path(&self, logical: &str) -> PathBuf {
        crate::paths::join(&self.root, logical)
    }

    pub fn mkdir(&self, logical: &str) -> PathBuf {
        let path = self.path(logical);
        fs::create_dir_all(&path).unwrap();
        path
    }

    /// Write a source file and pin its modification time.
    pub fn write(&self, logical: &str, content: &[u8], mtime_secs: u64) -> PathBuf {
        let path = self.path(logical);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        set_mtime(&path, mtime_secs);
        path
    }
}
