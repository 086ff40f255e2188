use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;
use std::time::Duration;

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConnection = PooledConnection<SqliteConnectionManager>;

/// Open a pool on `db_path`. Pragmas are applied to every pooled
/// connection since `foreign_keys` is per-connection state in SQLite.
pub fn create_pool(db_path: &Path) -> crate::Result<DbPool> {
    let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
        conn.busy_timeout(Duration::from_secs(10))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )
    });
    let pool = Pool::builder().max_size(8).build(manager)?;
    Ok(pool)
}

pub fn close_pool(pool: &DbPool) {
    // r2d2 closes connections when the pool is dropped; fold the WAL back first.
    if let Ok(conn) = pool.get() {
        if let Err(e) = conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE)") {
            tracing::warn!(error = %e, "WAL checkpoint failed");
        }
    }
}
