//! Change detection over a job's selected roots.
//!
//! A scan walks every root, adds each root's ancestor directories, and
//! reads one modification time per path. The variant then decides which of
//! those paths are changed. Scanning has no side effects: what a scan saw
//! is recorded by [`Scanner::commit`] in the same transaction that commits
//! the transferred items, so scanning twice without a commit yields the
//! same result and a path whose transfer failed is picked up again next run.

pub mod basic;
pub mod differential;

use crate::config::ScannerKind;
use crate::context::RunContext;
use crate::fs::metadata::{FileKind, FileMetadata};
use crate::fs::walker;
use crate::paths;
use crate::timestamp::{self, Timestamp};
use crate::BackupError;
use basic::BasicScanner;
use differential::DifferentialScanner;
use rusqlite::Connection;
use std::collections::HashSet;
use std::path::PathBuf;

const TAG: &str = "scanner";

/// A path observed on the source filesystem during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedPath {
    /// Logical path, relative to the job's `fs_root`
    pub path: String,
    pub source: PathBuf,
    pub is_dir: bool,
    pub modified: Timestamp,
}

#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    /// Every path read during the scan
    pub observed: Vec<ScannedPath>,
    /// The subset to transfer in this run
    pub changed: Vec<ScannedPath>,
}

pub enum Scanner {
    /// Changed == never recorded in the item store
    Basic(BasicScanner),
    /// Changed == modification time differs from the previous scan
    Differential(DifferentialScanner),
}

impl Scanner {
    pub fn for_kind(kind: ScannerKind) -> Self {
        match kind {
            ScannerKind::Local => Scanner::Basic(BasicScanner),
            ScannerKind::LocalDifferential => Scanner::Differential(DifferentialScanner),
        }
    }

    pub fn scan(
        &self,
        ctx: &RunContext,
        roots: &[String],
        run_timestamp: &Timestamp,
    ) -> crate::Result<ScanReport> {
        ctx.logger.info(
            TAG,
            format!(
                "Started file scanning of {} selection(s) for run {}.",
                roots.len(),
                timestamp::format(run_timestamp)
            ),
        );

        let observed = collect_paths(ctx, roots)?;
        let changed = match self {
            Scanner::Basic(scanner) => scanner.detect(ctx, &observed)?,
            Scanner::Differential(scanner) => scanner.detect(ctx, &observed)?,
        };

        ctx.logger.info(
            TAG,
            format!("Found {} changed of {} scanned paths.", changed.len(), observed.len()),
        );
        Ok(ScanReport { observed, changed })
    }

    /// Record what the scan observed. `committed` holds the changed paths
    /// that made it into the item store; the others stay changed.
    pub fn commit(
        &self,
        conn: &Connection,
        job_id: &str,
        report: &ScanReport,
        committed: &HashSet<String>,
        run_timestamp: &Timestamp,
    ) -> crate::Result<()> {
        match self {
            Scanner::Basic(_) => Ok(()),
            Scanner::Differential(scanner) => {
                scanner.commit(conn, job_id, report, committed, run_timestamp)
            }
        }
    }
}

/// Walk the roots and read every path's metadata once. Roots that no
/// longer exist contribute nothing; unreadable paths are logged and skipped.
pub(crate) fn collect_paths(ctx: &RunContext, roots: &[String]) -> crate::Result<Vec<ScannedPath>> {
    let mut seen = HashSet::new();
    let mut scanned = Vec::new();

    for (index, root) in roots.iter().enumerate() {
        ctx.check_cancelled()?;
        let root = paths::normalize(root);
        let source = paths::join(&ctx.fs_root, &root);

        if std::fs::symlink_metadata(&source).is_err() {
            ctx.logger.info(TAG, format!("Selection {} does not exist, skipping.", root));
            continue;
        }

        for ancestor in paths::ancestors(&root).into_iter().rev() {
            let ancestor_source = paths::join(&ctx.fs_root, &ancestor);
            observe(ctx, &mut seen, &mut scanned, ancestor, ancestor_source);
        }

        walker::walk_tree(
            &source,
            |entry| {
                if ctx.cancel.is_cancelled() {
                    return;
                }
                match paths::to_logical(&ctx.fs_root, &entry.path) {
                    Some(path) => observe(ctx, &mut seen, &mut scanned, path, entry.path),
                    None => ctx.logger.warning(
                        TAG,
                        format!("Skipping {}: not representable as a job path.", entry.path.display()),
                    ),
                }
            },
            |err| ctx.logger.warning(TAG, format!("Skipping unreadable entry: {}", err)),
        );

        ctx.status.publish(
            &format!("Scanning for files {}/{}", index + 1, roots.len()),
            (((index + 1) * 100) / roots.len()) as u8,
        );
    }

    ctx.check_cancelled()?;
    Ok(scanned)
}

fn observe(
    ctx: &RunContext,
    seen: &mut HashSet<String>,
    scanned: &mut Vec<ScannedPath>,
    path: String,
    source: PathBuf,
) {
    if path == "/" || seen.contains(&path) {
        return;
    }
    match FileMetadata::from_path(&source) {
        Ok(FileMetadata {
            modified: Some(modified),
            kind,
            ..
        }) => {
            seen.insert(path.clone());
            scanned.push(ScannedPath {
                path,
                source,
                is_dir: kind == FileKind::Directory,
                modified,
            });
        }
        Ok(_) => ctx.logger.warning(TAG, format!("Skipping {}: no modification time.", path)),
        Err(source) => {
            let err = BackupError::Scan { path, source };
            ctx.logger.warning(TAG, err.to_string());
        }
    }
}
