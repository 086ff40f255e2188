//! Typed per-job configuration.
//!
//! A job's parameters are stored as a JSON-valued key/value bag. They are
//! parsed once, when the job is loaded for a run, into [`JobConfig`]; a
//! missing or ill-typed key fails there with the field's name.

use crate::models::backup_job::BackupJob;
use crate::utils::errors::ConfigError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Parameter key holding the backend settings object.
pub const PROVIDER_SETTINGS_KEY: &str = "providerSettings";

/// Parameter key holding the filesystem root that logical paths resolve under.
pub const FS_ROOT_KEY: &str = "fs_root";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    #[serde(rename = "local")]
    Local,
    #[serde(rename = "local+differential")]
    LocalDifferential,
    #[serde(rename = "remote")]
    Remote,
    #[serde(rename = "remote+differential")]
    RemoteDifferential,
    #[serde(rename = "s3")]
    S3,
    #[serde(rename = "s3+differential")]
    S3Differential,
}

/// Storage backend behind a provider kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Local,
    Remote,
    S3,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 6] = [
        ProviderKind::Local,
        ProviderKind::LocalDifferential,
        ProviderKind::Remote,
        ProviderKind::RemoteDifferential,
        ProviderKind::S3,
        ProviderKind::S3Differential,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Local => "local",
            ProviderKind::LocalDifferential => "local+differential",
            ProviderKind::Remote => "remote",
            ProviderKind::RemoteDifferential => "remote+differential",
            ProviderKind::S3 => "s3",
            ProviderKind::S3Differential => "s3+differential",
        }
    }

    pub fn backend(&self) -> Backend {
        match self {
            ProviderKind::Local | ProviderKind::LocalDifferential => Backend::Local,
            ProviderKind::Remote | ProviderKind::RemoteDifferential => Backend::Remote,
            ProviderKind::S3 | ProviderKind::S3Differential => Backend::S3,
        }
    }

    pub fn is_differential(&self) -> bool {
        matches!(
            self,
            ProviderKind::LocalDifferential
                | ProviderKind::RemoteDifferential
                | ProviderKind::S3Differential
        )
    }

    /// Scanner used when the job does not name one.
    pub fn default_scanner(&self) -> ScannerKind {
        if self.is_differential() {
            ScannerKind::LocalDifferential
        } else {
            ScannerKind::Local
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProviderKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ConfigError::UnsupportedProvider(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScannerKind {
    /// Changed means "never recorded in the item store".
    #[serde(rename = "local")]
    Local,
    /// Changed means "modification time differs from the last scan".
    #[serde(rename = "local+differential")]
    LocalDifferential,
}

impl ScannerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScannerKind::Local => "local",
            ScannerKind::LocalDifferential => "local+differential",
        }
    }
}

impl fmt::Display for ScannerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScannerKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(ScannerKind::Local),
            "local+differential" => Ok(ScannerKind::LocalDifferential),
            other => Err(ConfigError::UnsupportedScanner(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalSettings {
    /// Directory that receives one entry per stored version
    pub output_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSettings {
    /// `host` or `user@host`
    pub remote_addr: String,

    /// Directory on the remote host that receives stored versions
    pub remote_path: String,

    /// Private key handed to `ssh -i`
    pub ssh_id_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Settings {
    pub bucket_name: String,
    pub access_key: String,
    pub secret_key: String,

    /// Endpoint host for S3-compatible services; AWS when unset
    pub host: Option<String>,

    /// Virtual-host template, e.g. `%(bucket)s.s3.example.com`
    pub host_bucket: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderSettings {
    Local(LocalSettings),
    Remote(RemoteSettings),
    S3(S3Settings),
}

impl ProviderSettings {
    /// Parse the `providerSettings` object for the given backend.
    pub fn parse(backend: Backend, settings: &Map<String, Value>) -> Result<Self, ConfigError> {
        Ok(match backend {
            Backend::Local => ProviderSettings::Local(LocalSettings {
                output_path: PathBuf::from(required_str(settings, "output_path")?),
            }),
            Backend::Remote => ProviderSettings::Remote(RemoteSettings {
                remote_addr: required_str(settings, "remote_addr")?,
                remote_path: required_str(settings, "remote_path")?,
                ssh_id_path: PathBuf::from(required_str(settings, "ssh_id_path")?),
            }),
            Backend::S3 => ProviderSettings::S3(S3Settings {
                bucket_name: required_str(settings, "bucket_name")?,
                access_key: required_str(settings, "access_key")?,
                secret_key: required_str(settings, "secret_key")?,
                host: optional_str(settings, "host")?,
                host_bucket: optional_str(settings, "host_bucket")?,
            }),
        })
    }
}

/// Everything a run needs to know about a job, parsed and validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobConfig {
    pub job_id: String,
    pub provider: ProviderKind,
    pub scanner: ScannerKind,
    pub fs_root: PathBuf,
    pub settings: ProviderSettings,
}

impl JobConfig {
    pub fn load(job: &BackupJob, parameters: &Map<String, Value>) -> Result<Self, ConfigError> {
        let provider: ProviderKind = job.provider.parse()?;
        let scanner = match job.scanner.as_deref() {
            Some(name) => name.parse()?,
            None => provider.default_scanner(),
        };

        let fs_root = match parameters.get(FS_ROOT_KEY) {
            None | Some(Value::Null) => PathBuf::from("/"),
            Some(Value::String(root)) if root.starts_with('/') => PathBuf::from(root),
            Some(Value::String(_)) => {
                return Err(invalid(FS_ROOT_KEY, "must be an absolute path"));
            }
            Some(_) => return Err(invalid(FS_ROOT_KEY, "expected a string")),
        };

        let settings = match parameters.get(PROVIDER_SETTINGS_KEY) {
            Some(Value::Object(settings)) => settings,
            Some(_) => return Err(invalid(PROVIDER_SETTINGS_KEY, "expected an object")),
            None => {
                return Err(ConfigError::MissingField {
                    field: PROVIDER_SETTINGS_KEY.to_string(),
                })
            }
        };

        Ok(Self {
            job_id: job.id.clone(),
            provider,
            scanner,
            fs_root,
            settings: ProviderSettings::parse(provider.backend(), settings)?,
        })
    }
}

fn field_name(key: &str) -> String {
    format!("{}.{}", PROVIDER_SETTINGS_KEY, key)
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidField {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

fn required_str(settings: &Map<String, Value>, key: &str) -> Result<String, ConfigError> {
    optional_str(settings, key)?.ok_or_else(|| ConfigError::MissingField {
        field: field_name(key),
    })
}

fn optional_str(settings: &Map<String, Value>, key: &str) -> Result<Option<String>, ConfigError> {
    match settings.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) if value.trim().is_empty() => {
            Err(invalid(&field_name(key), "must not be empty"))
        }
        Some(Value::String(value)) => Ok(Some(value.clone())),
        Some(_) => Err(invalid(&field_name(key), "expected a string")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn job(provider: &str, scanner: Option<&str>) -> BackupJob {
        BackupJob {
            id: "job-1".to_string(),
            name: "test".to_string(),
            provider: provider.to_string(),
            scanner: scanner.map(str::to_string),
            running: true,
            created_at: "2024-01-01T00:00:00Z".to_string(),
            updated_at: "2024-01-01T00:00:00Z".to_string(),
        }
    }

    fn params(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn test_provider_kind_roundtrip() {
        for kind in ProviderKind::ALL {
            assert_eq!(kind.as_str().parse::<ProviderKind>(), Ok(kind));
        }
        assert_eq!(
            "ftp".parse::<ProviderKind>(),
            Err(ConfigError::UnsupportedProvider("ftp".to_string()))
        );
    }

    #[test]
    fn test_load_local_job_with_defaults() {
        let config = JobConfig::load(
            &job("local+differential", None),
            &params(json!({ "providerSettings": { "output_path": "/backups" } })),
        )
        .unwrap();

        assert_eq!(config.scanner, ScannerKind::LocalDifferential);
        assert_eq!(config.fs_root, PathBuf::from("/"));
        assert_eq!(
            config.settings,
            ProviderSettings::Local(LocalSettings {
                output_path: PathBuf::from("/backups")
            })
        );
    }

    #[test]
    fn test_plain_provider_defaults_to_basic_scanner() {
        let config = JobConfig::load(
            &job("local", None),
            &params(json!({ "providerSettings": { "output_path": "/backups" }, "fs_root": "/srv" })),
        )
        .unwrap();
        assert_eq!(config.scanner, ScannerKind::Local);
        assert_eq!(config.fs_root, PathBuf::from("/srv"));
    }

    #[test]
    fn test_explicit_scanner_wins() {
        let config = JobConfig::load(
            &job("s3", Some("local+differential")),
            &params(json!({ "providerSettings": {
                "bucket_name": "b", "access_key": "a", "secret_key": "s"
            } })),
        )
        .unwrap();
        assert_eq!(config.scanner, ScannerKind::LocalDifferential);
        match config.settings {
            ProviderSettings::S3(s3) => {
                assert_eq!(s3.bucket_name, "b");
                assert!(s3.host.is_none());
            }
            other => panic!("unexpected settings: {:?}", other),
        }
    }

    #[test]
    fn test_missing_field_is_named() {
        let err = JobConfig::load(
            &job("remote+differential", None),
            &params(json!({ "providerSettings": {
                "remote_addr": "backup@host", "remote_path": "/srv/backups"
            } })),
        )
        .unwrap_err();
        assert_eq!(
            err,
            ConfigError::MissingField {
                field: "providerSettings.ssh_id_path".to_string()
            }
        );
    }

    #[test]
    fn test_invalid_values() {
        let err = JobConfig::load(
            &job("local", None),
            &params(json!({ "providerSettings": { "output_path": 42 } })),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidField { ref field, .. } if field == "providerSettings.output_path"));

        let err = JobConfig::load(
            &job("local", None),
            &params(json!({ "providerSettings": { "output_path": "/b" }, "fs_root": "relative" })),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidField { ref field, .. } if field == "fs_root"));

        let err = JobConfig::load(&job("local", None), &Map::new()).unwrap_err();
        assert_eq!(
            err,
            ConfigError::MissingField {
                field: "providerSettings".to_string()
            }
        );
    }

    #[test]
    fn test_unsupported_names() {
        let err = JobConfig::load(&job("tape", None), &Map::new()).unwrap_err();
        assert_eq!(err, ConfigError::UnsupportedProvider("tape".to_string()));

        let err = JobConfig::load(&job("local", Some("inotify")), &Map::new()).unwrap_err();
        assert_eq!(err, ConfigError::UnsupportedScanner("inotify".to_string()));
    }
}
