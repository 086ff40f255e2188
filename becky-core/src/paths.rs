//! Helpers for the logical, slash-separated paths recorded for a job.
//!
//! A logical path such as `/data/a.txt` is always absolute and is resolved
//! against the job's `fs_root` before touching the filesystem, and against a
//! destination root when restoring.

use md5::{Digest, Md5};
use std::fs::File;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

/// Checksum recorded for directories, which are never hashed.
pub const DIRECTORY_CHECKSUM: &str = "0";

const CHECKSUM_CHUNK_SIZE: usize = 64 * 1024;

/// Normalize to a leading slash with no empty, `.` or trailing segments.
/// `..` pops a segment but never climbs above the root.
pub fn normalize(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    format!("/{}", segments.join("/"))
}

/// Split into `(directory, filename)`.
pub fn split(path: &str) -> (String, String) {
    let path = normalize(path);
    match path.rfind('/') {
        Some(0) => ("/".to_string(), path[1..].to_string()),
        Some(i) => (path[..i].to_string(), path[i + 1..].to_string()),
        None => ("/".to_string(), path),
    }
}

/// Every ancestor directory of `path`, nearest first. The root itself is
/// not included.
pub fn ancestors(path: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = normalize(path);
    while let Some(i) = current.rfind('/') {
        if i == 0 {
            break;
        }
        current.truncate(i);
        out.push(current.clone());
    }
    out
}

/// Number of segments below the root: `/` is 0, `/data` is 1.
pub fn depth(path: &str) -> usize {
    let path = normalize(path);
    if path == "/" {
        0
    } else {
        path.matches('/').count()
    }
}

/// Prefix that every strict descendant of `directory` starts with.
pub fn subtree_prefix(directory: &str) -> String {
    let directory = normalize(directory);
    if directory == "/" {
        directory
    } else {
        format!("{}/", directory)
    }
}

/// Resolve a logical path against a filesystem root.
pub fn join(root: &Path, logical: &str) -> PathBuf {
    let relative = normalize(logical);
    let relative = relative.trim_start_matches('/');
    if relative.is_empty() {
        root.to_path_buf()
    } else {
        root.join(relative)
    }
}

/// Map a filesystem path under `root` back to its logical path.
/// Returns `None` for paths outside `root` or with non UTF-8 components.
pub fn to_logical(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut segments = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => segments.push(part.to_str()?),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(format!("/{}", segments.join("/")))
}

/// md5 of a file's content as lowercase hex, read in fixed-size chunks.
pub fn file_checksum(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Md5::new();
    let mut buffer = vec![0u8; CHECKSUM_CHUNK_SIZE];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("data//a.txt/"), "/data/a.txt");
        assert_eq!(normalize("/data/./sub/../a.txt"), "/data/a.txt");
        assert_eq!(normalize("/../.."), "/");
        assert_eq!(normalize(""), "/");
    }

    #[test]
    fn test_split() {
        assert_eq!(split("/data/a.txt"), ("/data".to_string(), "a.txt".to_string()));
        assert_eq!(split("/data"), ("/".to_string(), "data".to_string()));
    }

    #[test]
    fn test_ancestors_nearest_first() {
        assert_eq!(ancestors("/data/a/b.txt"), vec!["/data/a", "/data"]);
        assert!(ancestors("/data").is_empty());
        assert!(ancestors("/").is_empty());
    }

    #[test]
    fn test_depth() {
        assert_eq!(depth("/"), 0);
        assert_eq!(depth("/data"), 1);
        assert_eq!(depth("/data/a/b.txt"), 3);
    }

    #[test]
    fn test_join_and_back() {
        let root = Path::new("/srv/root");
        assert_eq!(join(root, "/data/a.txt"), PathBuf::from("/srv/root/data/a.txt"));
        assert_eq!(join(root, "/"), PathBuf::from("/srv/root"));
        assert_eq!(
            to_logical(root, Path::new("/srv/root/data/a.txt")).as_deref(),
            Some("/data/a.txt")
        );
        assert_eq!(to_logical(root, root).as_deref(), Some("/"));
        assert!(to_logical(root, Path::new("/etc/passwd")).is_none());
    }

    #[test]
    fn test_file_checksum() -> io::Result<()> {
        let temp_dir = TempDir::new()?;
        let empty = temp_dir.path().join("empty");
        let hello = temp_dir.path().join("hello");
        fs::write(&empty, b"")?;
        fs::write(&hello, b"hello world")?;

        assert_eq!(file_checksum(&empty)?, "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(file_checksum(&hello)?, "5eb63bbbe01eeed093cb22bb8f5acdc3");
        Ok(())
    }

    #[test]
    fn test_file_checksum_spans_chunks() -> io::Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("big");
        let content = vec![7u8; CHECKSUM_CHUNK_SIZE * 2 + 13];
        fs::write(&path, &content)?;

        assert_eq!(file_checksum(&path)?, format!("{:x}", Md5::digest(&content)));
        Ok(())
    }
}
