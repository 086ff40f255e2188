//! Source file metadata captured when a path is recorded as a backup item.

use crate::timestamp::{self, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Type of a recorded path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    File,
    Directory,
    /// The path could not be read when it was captured.
    Unknown,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::File => "file",
            FileKind::Directory => "directory",
            FileKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(FileKind::File),
            "directory" => Ok(FileKind::Directory),
            "unknown" => Ok(FileKind::Unknown),
            other => Err(format!("unknown file type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    /// Size in bytes, 0 for directories
    pub size: u64,

    /// Last modified time, whole seconds
    pub modified: Option<Timestamp>,

    pub kind: FileKind,
}

impl FileMetadata {
    /// Read metadata, following symlinks.
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let metadata = fs::metadata(path)?;
        let kind = if metadata.is_dir() {
            FileKind::Directory
        } else {
            FileKind::File
        };

        Ok(Self {
            size: if kind == FileKind::Directory { 0 } else { metadata.len() },
            modified: Some(timestamp::from_system_time(metadata.modified()?)),
            kind,
        })
    }

    /// Best-effort read: an unreadable or absent path yields size 0 and an
    /// unknown type instead of an error.
    pub fn of(path: &Path) -> Self {
        Self::from_path(path).unwrap_or(Self {
            size: 0,
            modified: None,
            kind: FileKind::Unknown,
        })
    }
}

/// Re-apply a recorded modification time to a restored regular file.
pub fn apply_modified(path: &Path, modified: &Timestamp) -> std::io::Result<()> {
    let file = fs::File::options().write(true).open(path)?;
    file.set_modified((*modified).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::{Duration, SystemTime};
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_extract_metadata() -> std::io::Result<()> {
        let mut temp_file = NamedTempFile::new()?;
        temp_file.write_all(b"test content")?;
        temp_file.flush()?;

        let metadata = FileMetadata::from_path(temp_file.path())?;

        assert_eq!(metadata.size, 12);
        assert_eq!(metadata.kind, FileKind::File);
        assert!(metadata.modified.is_some());

        Ok(())
    }

    #[test]
    fn test_directory_has_zero_size() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let metadata = FileMetadata::from_path(temp_dir.path())?;
        assert_eq!(metadata.kind, FileKind::Directory);
        assert_eq!(metadata.size, 0);
        Ok(())
    }

    #[test]
    fn test_metadata_of_missing_path() {
        let metadata = FileMetadata::of(Path::new("/definitely/not/here"));
        assert_eq!(metadata.kind, FileKind::Unknown);
        assert_eq!(metadata.size, 0);
        assert!(metadata.modified.is_none());
    }

    #[test]
    fn test_apply_modified_roundtrip() -> std::io::Result<()> {
        let temp_file = NamedTempFile::new()?;
        let wanted = timestamp::from_system_time(
            SystemTime::UNIX_EPOCH + Duration::from_secs(1_600_000_000),
        );

        apply_modified(temp_file.path(), &wanted)?;

        let metadata = FileMetadata::from_path(temp_file.path())?;
        assert_eq!(metadata.modified, Some(wanted));
        Ok(())
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!("directory".parse::<FileKind>(), Ok(FileKind::Directory));
        assert!("socket".parse::<FileKind>().is_err());
    }
}
