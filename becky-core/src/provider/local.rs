use super::{place, RestoreTarget, TAG};
use crate::config::LocalSettings;
use crate::context::RunContext;
use crate::models::backup_item::{BackupItem, NewBackupItem};
use crate::paths;
use crate::progress::Progress;
use crate::BackupError;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;

/// Stores every version as `<output_path>/<storage_name>` on a local or
/// mounted filesystem.
pub struct LocalProvider {
    settings: LocalSettings,
}

impl LocalProvider {
    pub fn new(settings: LocalSettings) -> Self {
        Self { settings }
    }

    fn stored_path(&self, storage_name: &str) -> PathBuf {
        self.settings.output_path.join(storage_name)
    }

    pub fn store(&self, ctx: &RunContext, items: Vec<NewBackupItem>) -> crate::Result<Vec<NewBackupItem>> {
        fs::create_dir_all(&self.settings.output_path).map_err(|e| {
            BackupError::Transfer(format!(
                "cannot create output directory {}: {}",
                self.settings.output_path.display(),
                e
            ))
        })?;

        let mut progress = Progress::new("Backing up files", items.len());
        let mut stored = Vec::with_capacity(items.len());
        for mut item in items {
            ctx.check_cancelled()?;
            match self.store_one(&mut item) {
                Ok(()) => stored.push(item),
                Err(e) => ctx
                    .logger
                    .warning(TAG, format!("Could not back up {}: {}", item.path, e)),
            }
            progress.advance(&ctx.status);
        }
        Ok(stored)
    }

    /// Copy one item and checksum the copy that landed in the backend.
    fn store_one(&self, item: &mut NewBackupItem) -> io::Result<()> {
        let destination = self.stored_path(&item.storage_name);
        if item.is_dir() {
            return fs::create_dir_all(&destination);
        }
        fs::copy(&item.source, &destination)?;
        item.checksum = Some(paths::file_checksum(&destination)?);
        Ok(())
    }

    pub fn fetch<'a>(
        &self,
        ctx: &RunContext,
        targets: &'a [RestoreTarget],
    ) -> crate::Result<Vec<&'a RestoreTarget>> {
        let mut progress = Progress::new("Restoring files", targets.len());
        let mut fetched = Vec::with_capacity(targets.len());
        for target in targets {
            ctx.check_cancelled()?;
            match place(&self.stored_path(&target.item.storage_name), &target.target) {
                Ok(()) => fetched.push(target),
                Err(e) => ctx.logger.warning(
                    TAG,
                    format!("Could not restore {}: {}", target.item.path, e),
                ),
            }
            progress.advance(&ctx.status);
        }
        Ok(fetched)
    }

    pub fn stored_checksums(
        &self,
        ctx: &RunContext,
        items: &[BackupItem],
    ) -> crate::Result<HashMap<String, String>> {
        let mut checksums = HashMap::with_capacity(items.len());
        for item in items {
            ctx.check_cancelled()?;
            if let Ok(checksum) = paths::file_checksum(&self.stored_path(&item.storage_name)) {
                checksums.insert(item.storage_name.clone(), checksum);
            }
        }
        Ok(checksums)
    }
}
