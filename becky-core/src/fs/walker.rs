//! Directory traversal for the scanners.
//!
//! Unlike a plain file listing, every directory is reported as well, root
//! included, so directory versions can be recorded. Errors on individual
//! entries go to a callback and the walk continues.

use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// A file or directory discovered during walking
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkEntry {
    /// Full path on the filesystem
    pub path: PathBuf,
}

impl WalkEntry {
    /// Symlinks to files are treated as files; symlinks to directories and
    /// broken links are skipped.
    fn from_entry(entry: &DirEntry) -> Option<Self> {
        if entry.file_type().is_symlink() {
            match std::fs::metadata(entry.path()) {
                Ok(resolved) if !resolved.is_dir() => {}
                _ => return None,
            }
        }

        Some(Self {
            path: entry.path().to_path_buf(),
        })
    }
}

/// Walk `root` recursively without following links.
///
/// `on_entry` sees the root first and parents before their children.
/// `on_error` receives entries that could not be read; the walk continues.
pub fn walk_tree<F, E>(root: &Path, mut on_entry: F, mut on_error: E)
where
    F: FnMut(WalkEntry),
    E: FnMut(walkdir::Error),
{
    for entry in WalkDir::new(root).follow_links(false) {
        match entry {
            Ok(entry) => {
                if let Some(walk_entry) = WalkEntry::from_entry(&entry) {
                    on_entry(walk_entry);
                }
            }
            Err(e) => on_error(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn walk(root: &Path) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        walk_tree(root, |entry| paths.push(entry.path), |_| {});
        paths
    }

    #[test]
    fn test_walk_empty_directory() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let entries = walk(temp_dir.path());
        assert_eq!(entries, vec![temp_dir.path().to_path_buf()]);
        Ok(())
    }

    #[test]
    fn test_walk_includes_directories_and_hidden_files() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;

        fs::create_dir(temp_dir.path().join("subdir"))?;
        fs::write(temp_dir.path().join(".hidden"), b"content1")?;
        fs::write(temp_dir.path().join("subdir/file2.txt"), b"content2")?;

        let entries = walk(temp_dir.path());
        assert_eq!(entries.len(), 4);
        assert_eq!(entries.iter().filter(|e| e.is_dir()).count(), 2);
        assert!(entries.iter().any(|e| e.ends_with(".hidden")));

        Ok(())
    }

    #[test]
    fn test_parents_before_children() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::create_dir_all(temp_dir.path().join("a/b"))?;
        fs::write(temp_dir.path().join("a/b/c.txt"), b"c")?;

        let entries = walk(temp_dir.path());
        let position = |suffix: &str| entries.iter().position(|e| e.ends_with(suffix));
        assert!(position("a") < position("a/b"));
        assert!(position("a/b") < position("a/b/c.txt"));
        Ok(())
    }

    #[test]
    #[cfg(unix)]
    fn test_symlinks() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let target = temp_dir.path().join("target.txt");
        fs::write(&target, b"data")?;
        std::os::unix::fs::symlink(&target, temp_dir.path().join("link.txt"))?;
        std::os::unix::fs::symlink(temp_dir.path().join("missing"), temp_dir.path().join("broken"))?;

        std::os::unix::fs::symlink(temp_dir.path(), temp_dir.path().join("loop"))?;

        let entries = walk(temp_dir.path());
        assert!(entries.iter().any(|e| e.ends_with("link.txt")));
        assert!(!entries.iter().any(|e| e.ends_with("broken")));
        assert!(!entries.iter().any(|e| e.ends_with("loop")));
        Ok(())
    }

    #[test]
    fn test_missing_root_reports_error() {
        let mut errors = 0;
        let mut seen = 0;
        walk_tree(Path::new("/no/such/root"), |_| seen += 1, |_| errors += 1);
        assert_eq!(seen, 0);
        assert_eq!(errors, 1);
    }
}
