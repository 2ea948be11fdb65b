use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::WatchError;

/// What the watcher needs to know about one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    pub modified: SystemTime,
    pub is_file: bool,
}

/// Read-only view of the filesystem the external writer targets.
pub trait FsView: Send + Sync {
    /// Paths matching a glob selector, in no particular order.
    fn matches(&self, pattern: &str) -> Result<Vec<PathBuf>, WatchError>;

    fn stat(&self, path: &Path) -> std::io::Result<FileStat>;
}

/// The local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFs;

impl FsView for LocalFs {
    fn matches(&self, pattern: &str) -> Result<Vec<PathBuf>, WatchError> {
        let paths = glob::glob(pattern).map_err(|source| WatchError::Pattern {
            pattern: pattern.to_string(),
            source,
        })?;
        // Unreadable entries are skipped; they are retried on the next poll.
        Ok(paths.filter_map(Result::ok).collect())
    }

    fn stat(&self, path: &Path) -> std::io::Result<FileStat> {
        let meta = std::fs::metadata(path)?;
        Ok(FileStat {
            size: meta.len(),
            modified: meta.modified()?,
            is_file: meta.is_file(),
        })
    }
}

impl<T: FsView + ?Sized> FsView for &T {
    fn matches(&self, pattern: &str) -> Result<Vec<PathBuf>, WatchError> {
        (**self).matches(pattern)
    }

    fn stat(&self, path: &Path) -> std::io::Result<FileStat> {
        (**self).stat(path)
    }
}
