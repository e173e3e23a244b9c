//! Filesystem collaborator.
//!
//! The cache touches the disk through [`DirectoryLister`] only, so that the
//! refresh path can fetch the modification time of every member of a directory
//! with one batched listing instead of one stat per file.

use std::io;
use std::time::{SystemTime, UNIX_EPOCH};

use camino::Utf8Path;
use tracing::trace;

/// A file modification time, in nanoseconds since the Unix epoch.
///
/// [`FileTime::ABSENT`] (zero) stands for "no such file"; a cached entry
/// fingerprinted as absent stays valid only while the file stays absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FileTime(u64);

impl FileTime {
    /// The fingerprint of a path that does not exist.
    pub const ABSENT: Self = Self(0);

    /// Creates a file time from raw nanoseconds.
    #[inline]
    #[must_use]
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Returns the raw nanoseconds.
    #[inline]
    #[must_use]
    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// Converts a [`SystemTime`], clamping pre-epoch times to one nanosecond
    /// so that they never collide with [`ABSENT`](Self::ABSENT).
    #[must_use]
    pub fn from_system_time(time: SystemTime) -> Self {
        let nanos = time
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX));
        Self(nanos.max(1))
    }

    /// Returns `true` for [`ABSENT`](Self::ABSENT).
    #[inline]
    #[must_use]
    pub const fn is_absent(self) -> bool {
        self.0 == 0
    }
}

/// What the cache needs to know about a path on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    /// Last modification time.
    pub modified: FileTime,
    /// Whether the path is a directory.
    pub is_dir: bool,
}

/// One member of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryInfo {
    /// The member's file name (no separators).
    pub name: String,
    /// Its metadata.
    pub stat: FileStat,
}

/// Batched access to directory metadata.
pub trait DirectoryLister: Send + Sync {
    /// Lists every immediate member of `dir` with its modification time.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the directory cannot be read.
    fn list(&self, dir: &Utf8Path) -> io::Result<Vec<DirEntryInfo>>;

    /// Returns the metadata of a single path, or `None` if it does not exist.
    fn stat(&self, path: &Utf8Path) -> Option<FileStat>;

    /// Returns the modification time of `path`, or [`FileTime::ABSENT`].
    fn modified(&self, path: &Utf8Path) -> FileTime {
        self.stat(path).map_or(FileTime::ABSENT, |s| s.modified)
    }

    /// Returns `true` if `path` exists and is a directory.
    fn is_dir(&self, path: &Utf8Path) -> bool {
        self.stat(path).is_some_and(|s| s.is_dir)
    }

    /// Returns `true` if `path` exists.
    fn exists(&self, path: &Utf8Path) -> bool {
        self.stat(path).is_some()
    }
}

/// [`DirectoryLister`] backed by `std::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdFs;

impl DirectoryLister for StdFs {
    fn list(&self, dir: &Utf8Path) -> io::Result<Vec<DirEntryInfo>> {
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(dir.as_std_path())? {
            let entry = entry?;
            let Ok(name) = entry.file_name().into_string() else {
                trace!(dir = %dir, "Skipping non-UTF-8 directory member");
                continue;
            };
            // The member may vanish between readdir and stat
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            entries.push(DirEntryInfo {
                name,
                stat: FileStat {
                    modified: metadata
                        .modified()
                        .map_or(FileTime::ABSENT, FileTime::from_system_time),
                    is_dir: metadata.is_dir(),
                },
            });
        }
        Ok(entries)
    }

    fn stat(&self, path: &Utf8Path) -> Option<FileStat> {
        let metadata = std::fs::metadata(path.as_std_path()).ok()?;
        Some(FileStat {
            modified: metadata
                .modified()
                .map_or(FileTime::ABSENT, FileTime::from_system_time),
            is_dir: metadata.is_dir(),
        })
    }
}
