//! Storage backends.
//!
//! A [`Provider`] moves scanned paths into a backend and back out again.
//! The shared steps (capturing items, ordering, restore planning and
//! checksum comparison) live here; each backend only implements the
//! transfer itself:
//!
//! - `store`: put item contents into the backend, return the items that made it
//! - `fetch`: write stored contents to restore targets
//! - `stored_checksums`: md5 of each stored object, keyed by storage name

pub mod command;
pub mod local;
pub mod remote;
pub mod s3;

use crate::config::{JobConfig, ProviderSettings};
use crate::context::RunContext;
use crate::fs::metadata::{self, FileKind};
use crate::models::backup_item::{self, BackupItem, NewBackupItem};
use crate::paths;
use crate::scanner::ScannedPath;
use crate::timestamp::Timestamp;
use crate::BackupError;
use command::CommandRunner;
use local::LocalProvider;
use remote::RemoteProvider;
use s3::S3Provider;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const TAG: &str = "provider";

pub enum Provider {
    Local(LocalProvider),
    Remote(RemoteProvider),
    S3(S3Provider),
}

/// A recorded item and the path it is restored to.
#[derive(Debug, Clone)]
pub struct RestoreTarget {
    pub item: BackupItem,
    pub target: PathBuf,
}

/// Immediate children of a directory as recorded at some point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RemoteEntries {
    pub files: Vec<String>,
    pub directories: Vec<String>,
}

impl Provider {
    pub fn from_config(config: &JobConfig, commands: Arc<dyn CommandRunner>) -> crate::Result<Self> {
        Ok(match &config.settings {
            ProviderSettings::Local(settings) => Provider::Local(LocalProvider::new(settings.clone())),
            ProviderSettings::Remote(settings) => {
                Provider::Remote(RemoteProvider::new(settings.clone(), commands))
            }
            ProviderSettings::S3(settings) => Provider::S3(S3Provider::new(settings.clone(), commands)?),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Provider::Local(_) => "local",
            Provider::Remote(_) => "remote",
            Provider::S3(_) => "s3",
        }
    }

    /// Transfer the scanned paths and return the captured items that were
    /// stored, shallowest first. Items whose transfer failed are logged and
    /// left out; checksums may still be missing for batch backends.
    pub fn backup(
        &self,
        ctx: &RunContext,
        scanned: &[ScannedPath],
        run_timestamp: &Timestamp,
    ) -> crate::Result<Vec<NewBackupItem>> {
        let mut items = Vec::with_capacity(scanned.len());
        for path in scanned {
            let item = NewBackupItem::capture(&path.path, &path.source, Some(*run_timestamp));
            if item.file_type == FileKind::Unknown {
                ctx.logger
                    .warning(TAG, format!("{} disappeared before it could be backed up.", item.path));
                continue;
            }
            items.push(item);
        }
        items.sort_by_key(|item| paths::depth(&item.path));

        let total = items.len();
        ctx.logger
            .info(TAG, format!("Backing up {} item(s) to the {} backend.", total, self.name()));

        let stored = match self {
            Provider::Local(p) => p.store(ctx, items)?,
            Provider::Remote(p) => p.store(ctx, items)?,
            Provider::S3(p) => p.store(ctx, items)?,
        };

        ctx.logger.info(TAG, format!("{} of {} item(s) backed up.", stored.len(), total));
        Ok(stored)
    }

    /// Recreate the given items under `destination`. Existing files whose
    /// content already matches are left alone. Returns the destination
    /// paths that now hold the selected versions.
    pub fn restore(
        &self,
        ctx: &RunContext,
        items: &[BackupItem],
        destination: &Path,
    ) -> crate::Result<Vec<PathBuf>> {
        fs::create_dir_all(destination)?;
        ctx.logger.info(
            TAG,
            format!("Restoring {} item(s) to {}.", items.len(), destination.display()),
        );

        let mut restored = Vec::new();
        let mut pending = Vec::new();
        for target in plan_restore(ctx, items, destination) {
            ctx.check_cancelled()?;
            if target.item.file_type == FileKind::Directory {
                match fs::create_dir_all(&target.target) {
                    Ok(()) => restored.push(target.target),
                    Err(e) => ctx.logger.warning(
                        TAG,
                        format!("Could not create directory {}: {}", target.target.display(), e),
                    ),
                }
            } else if already_restored(&target) {
                ctx.logger
                    .debug(TAG, format!("{} is already up to date.", target.target.display()));
                restored.push(target.target);
            } else {
                pending.push(target);
            }
        }

        let fetched = match self {
            Provider::Local(p) => p.fetch(ctx, &pending)?,
            Provider::Remote(p) => p.fetch(ctx, &pending)?,
            Provider::S3(p) => p.fetch(ctx, &pending)?,
        };

        for target in fetched {
            if let Some(modified) = &target.item.modified {
                if let Err(e) = metadata::apply_modified(&target.target, modified) {
                    ctx.logger.debug(
                        TAG,
                        format!("Could not restore modification time of {}: {}", target.target.display(), e),
                    );
                }
            }
            restored.push(target.target.clone());
        }

        ctx.logger.info(TAG, format!("{} item(s) restored.", restored.len()));
        Ok(restored)
    }

    /// Compare every recorded file version against the backend's copy.
    /// Returns the number of verified files.
    pub fn verify(&self, ctx: &RunContext) -> crate::Result<usize> {
        let items = backup_item::find_files_by_job_id(&*ctx.conn()?, &ctx.job_id)?;
        ctx.logger.info(TAG, format!("Verifying {} stored file(s).", items.len()));

        let actual = match self {
            Provider::Local(p) => p.stored_checksums(ctx, &items)?,
            Provider::Remote(p) => p.stored_checksums(ctx, &items)?,
            Provider::S3(p) => p.stored_checksums(ctx, &items)?,
        };

        let mut mismatched = BTreeSet::new();
        for item in &items {
            match actual.get(&item.storage_name) {
                Some(checksum) if *checksum == item.checksum => {}
                Some(checksum) => {
                    ctx.logger.warning(
                        TAG,
                        format!(
                            "Checksum mismatch for {} (version of {}): recorded {}, stored {}.",
                            item.path, item.creation_time, item.checksum, checksum
                        ),
                    );
                    mismatched.insert(item.path.clone());
                }
                None => {
                    ctx.logger.warning(
                        TAG,
                        format!("Stored copy of {} (version of {}) is missing.", item.path, item.creation_time),
                    );
                    mismatched.insert(item.path.clone());
                }
            }
        }

        if mismatched.is_empty() {
            ctx.logger.info(TAG, format!("Verified {} file(s).", items.len()));
            return Ok(items.len());
        }

        ctx.logger.info(
            TAG,
            format!("Found {} file(s) that didn't pass verification.", mismatched.len()),
        );
        Err(BackupError::VerificationFailed {
            count: mismatched.len(),
            paths: mismatched.into_iter().collect(),
        })
    }

    /// List the children of `directory` as they were at `as_of`.
    pub fn remote_entries(
        &self,
        ctx: &RunContext,
        directory: &str,
        as_of: Option<&Timestamp>,
    ) -> crate::Result<RemoteEntries> {
        let conn = ctx.conn()?;
        let directory = paths::normalize(directory);
        let own = backup_item::list_entries_at(&conn, &ctx.job_id, &directory, as_of)?;
        let nested = backup_item::nested_child_names(&conn, &ctx.job_id, &directory, as_of)?;

        let mut kinds: BTreeMap<String, FileKind> = own
            .into_iter()
            .map(|item| (item.filename, item.file_type))
            .collect();
        for name in nested {
            kinds.entry(name).or_insert(FileKind::Directory);
        }

        let mut entries = RemoteEntries::default();
        for (name, kind) in kinds {
            match kind {
                FileKind::Directory => entries.directories.push(name),
                _ => entries.files.push(name),
            }
        }
        Ok(entries)
    }
}

/// Pair items with their targets, dropping items that sit beneath a path
/// restored as a file.
fn plan_restore(ctx: &RunContext, items: &[BackupItem], destination: &Path) -> Vec<RestoreTarget> {
    let kinds: HashMap<&str, FileKind> = items
        .iter()
        .map(|item| (item.path.as_str(), item.file_type))
        .collect();

    let mut plan = Vec::with_capacity(items.len());
    for item in items {
        let shadowing = paths::ancestors(&item.path)
            .into_iter()
            .find(|ancestor| kinds.get(ancestor.as_str()).is_some_and(|k| *k != FileKind::Directory));
        if let Some(ancestor) = shadowing {
            ctx.logger.debug(
                TAG,
                format!("Skipping {}: {} is a file in this version.", item.path, ancestor),
            );
            continue;
        }
        plan.push(RestoreTarget {
            item: item.clone(),
            target: paths::join(destination, &item.path),
        });
    }
    plan
}

fn already_restored(target: &RestoreTarget) -> bool {
    target.target.is_file()
        && paths::file_checksum(&target.target).is_ok_and(|sum| sum == target.item.checksum)
}

/// Copy a stored object to its restore target, creating parents.
pub(crate) fn place(stored: &Path, target: &Path) -> std::io::Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(stored, target)?;
    Ok(())
}
