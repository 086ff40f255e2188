//! Versioned record of transferred paths.
//!
//! Every run that transfers a path adds one immutable item stamped with the
//! run timestamp. "Path as of T" is the item with the greatest
//! `(creation_time, id)` among those with `creation_time <= T`; the id
//! breaks ties between items of the same run in insertion order.

use crate::fs::metadata::{FileKind, FileMetadata};
use crate::paths;
use crate::timestamp::{self, Timestamp};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, Row};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use uuid::Uuid;

impl ToSql for FileKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for FileKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupItem {
    pub id: i64,
    pub job_id: String,
    pub path: String,
    pub directory: String,
    pub filename: String,
    pub file_type: FileKind,
    pub size: u64,
    pub modified: Option<Timestamp>,
    /// md5 hex of the content, `"0"` for directories
    pub checksum: String,
    /// Name of the stored object inside the backend
    pub storage_name: String,
    pub creation_time: Timestamp,
}

/// A version captured from the source filesystem, not yet committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBackupItem {
    pub path: String,
    pub directory: String,
    pub filename: String,
    pub file_type: FileKind,
    pub size: u64,
    pub modified: Option<Timestamp>,
    /// Filled by the provider or at commit time
    pub checksum: Option<String>,
    pub storage_name: String,
    pub creation_time: Timestamp,
    /// Where the content is read from
    pub source: PathBuf,
}

impl NewBackupItem {
    /// Capture `path` (read from `source`) for the run at `creation_time`,
    /// or now when unspecified. Metadata is best-effort: an absent file
    /// yields size 0 and an unknown type.
    pub fn capture(path: &str, source: &Path, creation_time: Option<Timestamp>) -> Self {
        let path = paths::normalize(path);
        let (directory, filename) = paths::split(&path);
        let metadata = FileMetadata::of(source);

        Self {
            checksum: (metadata.kind == FileKind::Directory)
                .then(|| paths::DIRECTORY_CHECKSUM.to_string()),
            path,
            directory,
            filename,
            file_type: metadata.kind,
            size: metadata.size,
            modified: metadata.modified,
            storage_name: Uuid::new_v4().to_string(),
            creation_time: creation_time.map(timestamp::truncate).unwrap_or_else(timestamp::now),
            source: source.to_path_buf(),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.file_type == FileKind::Directory
    }
}

fn row_to_item(row: &Row) -> rusqlite::Result<BackupItem> {
    Ok(BackupItem {
        id: row.get("id")?,
        job_id: row.get("job_id")?,
        path: row.get("path")?,
        directory: row.get("directory")?,
        filename: row.get("filename")?,
        file_type: row.get("file_type")?,
        size: row.get::<_, i64>("size")?.max(0) as u64,
        modified: row.get("modified")?,
        checksum: row.get("checksum")?,
        storage_name: row.get("storage_name")?,
        creation_time: row.get("creation_time")?,
    })
}

fn collect(stmt: &mut rusqlite::Statement<'_>, params: impl rusqlite::Params) -> crate::Result<Vec<BackupItem>> {
    let rows = stmt.query_map(params, row_to_item)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Commit a captured item. The checksum must be known by now.
pub fn insert(conn: &Connection, job_id: &str, item: &NewBackupItem) -> crate::Result<BackupItem> {
    let checksum = item.checksum.as_deref().ok_or_else(|| {
        crate::BackupError::Transfer(format!("no checksum computed for {}", item.path))
    })?;
    conn.execute(
        "INSERT INTO backup_items
           (job_id, path, directory, filename, file_type, size, modified, checksum, storage_name, creation_time)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            job_id,
            item.path,
            item.directory,
            item.filename,
            item.file_type,
            item.size as i64,
            item.modified,
            checksum,
            item.storage_name,
            item.creation_time,
        ],
    )?;
    let id = conn.last_insert_rowid();
    let committed = conn.query_row("SELECT * FROM backup_items WHERE id = ?", params![id], row_to_item)?;
    Ok(committed)
}

pub fn find_by_job_id(conn: &Connection, job_id: &str) -> crate::Result<Vec<BackupItem>> {
    let mut stmt = conn.prepare("SELECT * FROM backup_items WHERE job_id = ? ORDER BY id")?;
    collect(&mut stmt, params![job_id])
}

/// Every recorded file version, which is what verification checks.
pub fn find_files_by_job_id(conn: &Connection, job_id: &str) -> crate::Result<Vec<BackupItem>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM backup_items WHERE job_id = ? AND file_type = 'file' ORDER BY id",
    )?;
    collect(&mut stmt, params![job_id])
}

/// Version history of one path, oldest first.
pub fn history(conn: &Connection, job_id: &str, path: &str) -> crate::Result<Vec<BackupItem>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM backup_items WHERE job_id = ?1 AND path = ?2 ORDER BY creation_time, id",
    )?;
    collect(&mut stmt, params![job_id, paths::normalize(path)])
}

/// Paths that have at least one recorded version.
pub fn recorded_paths(conn: &Connection, job_id: &str) -> crate::Result<HashSet<String>> {
    let mut stmt = conn.prepare("SELECT DISTINCT path FROM backup_items WHERE job_id = ?")?;
    let rows = stmt.query_map(params![job_id], |row| row.get::<_, String>(0))?;
    Ok(rows.collect::<rusqlite::Result<HashSet<_>>>()?)
}

/// Keep the newest item of each path, by `(creation_time, id)`.
fn newest_per_path(items: Vec<BackupItem>) -> BTreeMap<String, BackupItem> {
    let mut newest: BTreeMap<String, BackupItem> = BTreeMap::new();
    for item in items {
        let replace = match newest.get(&item.path) {
            Some(current) => (item.creation_time, item.id) > (current.creation_time, current.id),
            None => true,
        };
        if replace {
            newest.insert(item.path.clone(), item);
        }
    }
    newest
}

/// Newest version, as of `as_of` (unbounded when `None`), of every path
/// whose parent is `directory`.
pub fn list_entries_at(
    conn: &Connection,
    job_id: &str,
    directory: &str,
    as_of: Option<&Timestamp>,
) -> crate::Result<Vec<BackupItem>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM backup_items
         WHERE job_id = ?1 AND directory = ?2 AND (?3 IS NULL OR creation_time <= ?3)
         ORDER BY id",
    )?;
    let items = collect(&mut stmt, params![job_id, paths::normalize(directory), as_of])?;
    Ok(newest_per_path(items).into_values().collect())
}

/// Names of the children of `directory` that had recorded descendants as
/// of `as_of`.
pub fn nested_child_names(
    conn: &Connection,
    job_id: &str,
    directory: &str,
    as_of: Option<&Timestamp>,
) -> crate::Result<BTreeSet<String>> {
    let prefix = paths::subtree_prefix(directory);
    let mut stmt = conn.prepare(
        "SELECT DISTINCT directory FROM backup_items
         WHERE job_id = ?1 AND substr(directory, 1, length(?2)) = ?2
           AND (?3 IS NULL OR creation_time <= ?3)",
    )?;
    let rows = stmt.query_map(params![job_id, prefix, as_of], |row| row.get::<_, String>(0))?;

    let mut names = BTreeSet::new();
    for r in rows {
        let nested = r?;
        let rest = &nested[prefix.len().min(nested.len())..];
        if let Some(name) = rest.split('/').next().filter(|n| !n.is_empty()) {
            names.insert(name.to_string());
        }
    }
    Ok(names)
}

/// Resolve user selections to the items a restore as of `as_of` needs:
/// each selected path itself plus everything recorded beneath it, newest
/// version per path. Sorted shallowest first.
pub fn resolve_selection(
    conn: &Connection,
    job_id: &str,
    selected: &[String],
    as_of: Option<&Timestamp>,
) -> crate::Result<Vec<BackupItem>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM backup_items
         WHERE job_id = ?1
           AND (path = ?2 OR directory = ?2 OR substr(directory, 1, length(?3)) = ?3)
           AND (?4 IS NULL OR creation_time <= ?4)
         ORDER BY id",
    )?;

    let mut gathered = Vec::new();
    let mut seen = HashSet::new();
    for selection in selected {
        let selection = paths::normalize(selection);
        let prefix = paths::subtree_prefix(&selection);
        for item in collect(&mut stmt, params![job_id, selection, prefix, as_of])? {
            if seen.insert(item.id) {
                gathered.push(item);
            }
        }
    }

    let mut resolved: Vec<BackupItem> = newest_per_path(gathered).into_values().collect();
    resolved.sort_by(|a, b| {
        paths::depth(&a.path)
            .cmp(&paths::depth(&b.path))
            .then_with(|| a.path.cmp(&b.path))
    });
    Ok(resolved)
}
