use crate::db::connection::DbPool;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS backup_jobs (
  id TEXT PRIMARY KEY,
  name TEXT NOT NULL,
  provider TEXT NOT NULL,
  scanner TEXT,
  running INTEGER NOT NULL DEFAULT 0,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS backup_parameters (
  job_id TEXT NOT NULL REFERENCES backup_jobs(id) ON DELETE CASCADE,
  key TEXT NOT NULL,
  value TEXT NOT NULL,
  PRIMARY KEY (job_id, key)
);

CREATE TABLE IF NOT EXISTS backup_selections (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  job_id TEXT NOT NULL REFERENCES backup_jobs(id) ON DELETE CASCADE,
  path TEXT NOT NULL,
  created_at TEXT NOT NULL,
  UNIQUE (job_id, path)
);

CREATE TABLE IF NOT EXISTS differential_records (
  job_id TEXT NOT NULL REFERENCES backup_jobs(id) ON DELETE CASCADE,
  path TEXT NOT NULL,
  previous_modified TEXT,
  current_modified TEXT,
  scanned_at TEXT NOT NULL,
  PRIMARY KEY (job_id, path)
);

CREATE TABLE IF NOT EXISTS backup_items (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  job_id TEXT NOT NULL REFERENCES backup_jobs(id) ON DELETE CASCADE,
  path TEXT NOT NULL,
  directory TEXT NOT NULL,
  filename TEXT NOT NULL,
  file_type TEXT NOT NULL CHECK(file_type IN ('file','directory','unknown')),
  size INTEGER NOT NULL DEFAULT 0,
  modified TEXT,
  checksum TEXT NOT NULL,
  storage_name TEXT NOT NULL UNIQUE,
  creation_time TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS backup_metadata (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  job_id TEXT NOT NULL REFERENCES backup_jobs(id) ON DELETE CASCADE,
  key TEXT NOT NULL,
  value TEXT NOT NULL,
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS backup_status (
  job_id TEXT NOT NULL UNIQUE REFERENCES backup_jobs(id) ON DELETE CASCADE,
  message TEXT NOT NULL,
  percentage INTEGER NOT NULL DEFAULT 0 CHECK(percentage BETWEEN 0 AND 100),
  running INTEGER NOT NULL DEFAULT 0,
  updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS backup_logs (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  job_id TEXT NOT NULL REFERENCES backup_jobs(id) ON DELETE CASCADE,
  level TEXT NOT NULL CHECK(level IN ('INFO','WARNING','ERROR','DEBUG')),
  tag TEXT NOT NULL,
  message TEXT NOT NULL,
  timestamp TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_backup_items_path ON backup_items(job_id, path, creation_time);
CREATE INDEX IF NOT EXISTS idx_backup_items_directory ON backup_items(job_id, directory, creation_time);
CREATE INDEX IF NOT EXISTS idx_backup_metadata_key ON backup_metadata(job_id, key);
CREATE INDEX IF NOT EXISTS idx_backup_logs_job ON backup_logs(job_id, timestamp DESC);
"#;

pub fn migrate(pool: &DbPool) -> crate::Result<()> {
    tracing::info!("[DB] Starting database migration...");

    let conn = pool.get()?;
    conn.execute_batch(SCHEMA)?;

    tracing::info!("[DB] Migration completed successfully");
    Ok(())
}
