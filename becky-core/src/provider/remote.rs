//! Remote host over SSH.
//!
//! Transfers are batched into one `rsync` per run. The source files are
//! staged as symlinks named by storage name, so the remote directory ends
//! up flat, one object per stored version. Directories are only recorded,
//! never transferred.

use super::command::{run_accepting, run_checked, shell_quote, CommandRunner, Invocation};
use super::{place, RestoreTarget, TAG};
use crate::config::RemoteSettings;
use crate::context::RunContext;
use crate::models::backup_item::{BackupItem, NewBackupItem};
use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// rsync exit codes that still leave the transferred files in place;
/// 23 and 24 mean some files could not be sent or vanished
const ACCEPTED_EXITS: [i32; 3] = [0, 23, 24];

/// xargs exits with 123 when md5sum failed for some of its arguments
const XARGS_PARTIAL: i32 = 123;

pub struct RemoteProvider {
    settings: RemoteSettings,
    commands: Arc<dyn CommandRunner>,
}

impl RemoteProvider {
    pub fn new(settings: RemoteSettings, commands: Arc<dyn CommandRunner>) -> Self {
        Self { settings, commands }
    }

    fn remote_dir(&self) -> &str {
        match self.settings.remote_path.trim_end_matches('/') {
            "" => "/",
            trimmed => trimmed,
        }
    }

    fn remote_object(&self, storage_name: &str) -> String {
        format!("{}/{}", self.remote_dir().trim_end_matches('/'), storage_name)
    }

    /// `host:/dir/`, the rsync spelling of the remote directory's contents.
    fn rsync_remote(&self) -> String {
        format!("{}:{}/", self.settings.remote_addr, self.remote_dir().trim_end_matches('/'))
    }

    fn rsh(&self) -> OsString {
        let id = self.settings.ssh_id_path.to_string_lossy();
        format!("--rsh=ssh -i {} -o BatchMode=yes", shell_quote(&id)).into()
    }

    fn ssh(&self) -> Invocation {
        Invocation::new("ssh")
            .arg("-i")
            .arg(&self.settings.ssh_id_path)
            .args(["-o", "BatchMode=yes"])
            .arg(&self.settings.remote_addr)
    }

    fn rsync(&self, list: &Path, from: impl Into<OsString>, to: impl Into<OsString>) -> Invocation {
        let mut files_from = OsString::from("--files-from=");
        files_from.push(list);
        Invocation::new("rsync")
            .arg(self.rsh())
            .args(["--copy-links", "--times", "--out-format=%n"])
            .arg(files_from)
            .arg(from)
            .arg(to)
    }

    pub fn store(&self, ctx: &RunContext, items: Vec<NewBackupItem>) -> crate::Result<Vec<NewBackupItem>> {
        let staging = tempfile::Builder::new().prefix("becky-rsync-").tempdir()?;
        let objects = staging.path().join("objects");
        fs::create_dir(&objects)?;

        let mut listed = Vec::new();
        let mut skipped = HashSet::new();
        for item in items.iter().filter(|i| !i.is_dir()) {
            ctx.check_cancelled()?;
            match std::os::unix::fs::symlink(&item.source, objects.join(&item.storage_name)) {
                Ok(()) => listed.push(item.storage_name.as_str()),
                Err(e) => {
                    ctx.logger
                        .warning(TAG, format!("Could not stage {}: {}", item.path, e));
                    skipped.insert(item.storage_name.clone());
                }
            }
        }

        if !listed.is_empty() {
            let list = staging.path().join("files-from");
            fs::write(&list, listed.join("\n"))?;

            run_checked(
                &*self.commands,
                &self.ssh().args(["mkdir", "-p", "--"]).arg(shell_quote(self.remote_dir())),
            )?;

            ctx.status
                .publish(&format!("Backing up files 0/{}", listed.len()), 0);
            ctx.logger.debug(
                TAG,
                format!(
                    "Sending {} file(s) to {}.",
                    listed.len(),
                    self.rsync_remote()
                ),
            );
            let mut source = objects.clone().into_os_string();
            source.push("/");
            let output = run_accepting(
                &*self.commands,
                &self.rsync(&list, source, self.rsync_remote()),
                &ACCEPTED_EXITS,
            )?;

            let mut sent = listed.len();
            if !output.success() {
                let stdout = output.stdout_str();
                let names = sent_names(&stdout);
                let missing: Vec<&NewBackupItem> = items
                    .iter()
                    .filter(|i| !i.is_dir() && !skipped.contains(&i.storage_name))
                    .filter(|i| !names.contains(i.storage_name.as_str()))
                    .collect();
                for item in missing {
                    ctx.logger.warning(
                        TAG,
                        format!("Could not transfer {}: {}", item.path, output.stderr_str()),
                    );
                    skipped.insert(item.storage_name.clone());
                    sent = sent.saturating_sub(1);
                }
            }
            ctx.status
                .publish(&format!("Backing up files {}/{}", sent, listed.len()), 100);
        }

        Ok(items
            .into_iter()
            .filter(|item| !skipped.contains(&item.storage_name))
            .collect())
    }

    pub fn fetch<'a>(
        &self,
        ctx: &RunContext,
        targets: &'a [RestoreTarget],
    ) -> crate::Result<Vec<&'a RestoreTarget>> {
        if targets.is_empty() {
            return Ok(Vec::new());
        }

        let staging = tempfile::Builder::new().prefix("becky-rsync-").tempdir()?;
        let objects = staging.path().join("objects");
        fs::create_dir(&objects)?;
        let list = staging.path().join("files-from");
        let names: Vec<&str> = targets.iter().map(|t| t.item.storage_name.as_str()).collect();
        fs::write(&list, names.join("\n"))?;

        let mut destination = objects.clone().into_os_string();
        destination.push("/");
        run_accepting(
            &*self.commands,
            &self.rsync(&list, self.rsync_remote(), destination),
            &ACCEPTED_EXITS,
        )?;

        let mut fetched = Vec::with_capacity(targets.len());
        for target in targets {
            ctx.check_cancelled()?;
            match place(&objects.join(&target.item.storage_name), &target.target) {
                Ok(()) => fetched.push(target),
                Err(e) => ctx
                    .logger
                    .warning(TAG, format!("Could not restore {}: {}", target.item.path, e)),
            }
        }
        Ok(fetched)
    }

    /// One `md5sum` pass on the remote host over every stored object.
    pub fn stored_checksums(
        &self,
        ctx: &RunContext,
        items: &[BackupItem],
    ) -> crate::Result<HashMap<String, String>> {
        if items.is_empty() {
            return Ok(HashMap::new());
        }
        ctx.check_cancelled()?;

        let mut input = Vec::new();
        for item in items {
            input.extend_from_slice(self.remote_object(&item.storage_name).as_bytes());
            input.push(0);
        }

        let output = run_accepting(
            &*self.commands,
            &self.ssh().args(["xargs", "-0", "md5sum", "--"]).stdin(input),
            &[0, XARGS_PARTIAL],
        )?;
        Ok(parse_md5sum(&output.stdout_str()))
    }
}

/// Names printed by `--out-format=%n`, one per transferred file.
fn sent_names(stdout: &str) -> HashSet<&str> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect()
}

/// `<md5>  <path>` lines → storage name (last path segment) → md5.
fn parse_md5sum(stdout: &str) -> HashMap<String, String> {
    stdout
        .lines()
        .filter_map(|line| line.split_once("  "))
        .filter_map(|(checksum, path)| {
            let name = path.rsplit('/').next()?;
            Some((name.to_string(), checksum.to_string()))
        })
        .collect()
}
