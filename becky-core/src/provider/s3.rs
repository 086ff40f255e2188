//! S3-compatible object storage through `s3cmd`.
//!
//! One object per stored file version at `s3://<bucket>/<storage_name>`.
//! S3 has no directories, so directory items are recorded but not stored.
//! Credentials reach `s3cmd` through a private config file, never argv.

use super::command::{run_checked, CommandRunner, Invocation};
use super::{RestoreTarget, TAG};
use crate::config::S3Settings;
use crate::utils::errors::ConfigError;
use crate::context::RunContext;
use crate::models::backup_item::{BackupItem, NewBackupItem};
use crate::progress::Progress;
use std::collections::HashMap;
use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;

pub struct S3Provider {
    settings: S3Settings,
    commands: Arc<dyn CommandRunner>,
    /// Owner-only `s3cmd` config; removed when the provider is dropped
    config_file: NamedTempFile,
}

impl S3Provider {
    pub fn new(settings: S3Settings, commands: Arc<dyn CommandRunner>) -> crate::Result<Self> {
        let config_file = write_config(&settings)?;
        Ok(Self {
            settings,
            commands,
            config_file,
        })
    }

    fn uri(&self, storage_name: &str) -> String {
        format!("s3://{}/{}", self.settings.bucket_name, storage_name)
    }

    /// `s3cmd -c <config> <words>`
    fn s3cmd<I, S>(&self, words: I) -> Invocation
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Invocation::new("s3cmd")
            .arg("-c")
            .arg(self.config_file.path())
            .args(words)
    }

    fn exists(&self, uri: &str) -> crate::Result<bool> {
        let output = run_checked(&*self.commands, &self.s3cmd(["ls", uri]))?;
        Ok(!output.stdout_str().trim().is_empty())
    }

    fn put(&self, item: &NewBackupItem) -> crate::Result<()> {
        let uri = self.uri(&item.storage_name);
        if self.exists(&uri)? {
            return Ok(());
        }
        // Single-part uploads keep the ETag equal to the content md5 for verify.
        let words: [OsString; 4] = [
            "put".into(),
            "--disable-multipart".into(),
            item.source.clone().into_os_string(),
            uri.into(),
        ];
        run_checked(&*self.commands, &self.s3cmd(words))?;
        Ok(())
    }

    pub fn store(&self, ctx: &RunContext, items: Vec<NewBackupItem>) -> crate::Result<Vec<NewBackupItem>> {
        let mut progress = Progress::new("Backing up files", items.len());
        let mut stored = Vec::with_capacity(items.len());
        for item in items {
            ctx.check_cancelled()?;
            if item.is_dir() {
                stored.push(item);
            } else {
                match self.put(&item) {
                    Ok(()) => stored.push(item),
                    Err(e) => ctx
                        .logger
                        .warning(TAG, format!("Could not back up {}: {}", item.path, e)),
                }
            }
            progress.advance(&ctx.status);
        }
        Ok(stored)
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
            match self.get(target) {
                Ok(()) => fetched.push(target),
                Err(e) => ctx
                    .logger
                    .warning(TAG, format!("Could not restore {}: {}", target.item.path, e)),
            }
            progress.advance(&ctx.status);
        }
        Ok(fetched)
    }

    fn get(&self, target: &RestoreTarget) -> crate::Result<()> {
        if let Some(parent) = target.target.parent() {
            fs::create_dir_all(parent)?;
        }
        let words: [OsString; 4] = [
            "get".into(),
            "--force".into(),
            self.uri(&target.item.storage_name).into(),
            target.target.clone().into_os_string(),
        ];
        run_checked(&*self.commands, &self.s3cmd(words))?;
        Ok(())
    }

    /// Ask the bucket for each object's md5. Objects that cannot be listed
    /// are left out and count as mismatches.
    pub fn stored_checksums(
        &self,
        ctx: &RunContext,
        items: &[BackupItem],
    ) -> crate::Result<HashMap<String, String>> {
        let mut checksums = HashMap::with_capacity(items.len());
        for item in items {
            ctx.check_cancelled()?;
            let uri = self.uri(&item.storage_name);
            match run_checked(&*self.commands, &self.s3cmd(["ls", "--list-md5", uri.as_str()])) {
                Ok(output) => {
                    if let Some(checksum) = parse_listed_md5(&output.stdout_str()) {
                        checksums.insert(item.storage_name.clone(), checksum);
                    }
                }
                Err(e) => ctx
                    .logger
                    .warning(TAG, format!("Could not list {}: {}", uri, e)),
            }
        }
        Ok(checksums)
    }
}

/// Write the `[default]` section holding the job's credentials and endpoint.
/// The file is created owner-only.
fn write_config(settings: &S3Settings) -> crate::Result<NamedTempFile> {
    let mut lines = vec![
        "[default]".to_string(),
        format!("access_key = {}", config_value("access_key", &settings.access_key)?),
        format!("secret_key = {}", config_value("secret_key", &settings.secret_key)?),
    ];
    if let Some(host) = &settings.host {
        lines.push(format!("host_base = {}", config_value("host", host)?));
    }
    // Path-style addressing on a custom endpoint unless a template is given
    if let Some(host_bucket) = settings.host_bucket.as_deref().or(settings.host.as_deref()) {
        lines.push(format!("host_bucket = {}", config_value("host_bucket", host_bucket)?));
    }

    let mut file = tempfile::Builder::new().prefix("becky-s3cmd-").suffix(".cfg").tempfile()?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(file.path(), fs::Permissions::from_mode(0o600))?;
    }
    file.write_all(lines.join("\n").as_bytes())?;
    file.write_all(b"\n")?;
    file.flush()?;
    Ok(file)
}

/// A value that would end its config line early is refused.
fn config_value<'a>(key: &str, value: &'a str) -> crate::Result<&'a str> {
    if value.contains(['\n', '\r']) {
        return Err(ConfigError::InvalidField {
            field: key.to_string(),
            reason: "must be a single line".to_string(),
        }
        .into());
    }
    Ok(value)
}

/// `<date> <time> <size> <md5> <uri>` → md5
fn parse_listed_md5(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .next()?
        .split_whitespace()
        .nth(3)
        .map(str::to_string)
}
