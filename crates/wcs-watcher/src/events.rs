//! Watch events and their mapping onto cache refresh targets.
//!
//! # Event Flow
//!
//! ```text
//! File System Change
//!        │
//!        ▼
//! notify-debouncer-mini (debounce window)
//!        │
//!        ▼
//!   FileEvent created ──► FileEventBatch
//!                              │
//!                              ▼
//!                   refresh_targets(admin dir)
//!                              │
//!                              ▼
//!                StatusCache::enqueue_refresh
//! ```
//!
//! A change to an ordinary path refreshes the directory containing it. A
//! change to the administrative index or `HEAD` refreshes the owning working
//! copy recursively, since a commit, checkout or stage can move the status of
//! any file without touching it.

use std::collections::BTreeMap;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::filter::{is_admin_trigger, split_admin_path};

/// A single debounced change to a path.
///
/// The debouncer does not distinguish create, modify and delete, so neither
/// does the event.
///
/// # Examples
///
/// ```
/// use wcs_watcher::FileEvent;
/// use camino::Utf8PathBuf;
///
/// let event = FileEvent::new(Utf8PathBuf::from("/repo/src/lib.rs"));
/// assert_eq!(event.file_name(), Some("lib.rs"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    /// Absolute path of the changed file or directory.
    pub path: Utf8PathBuf,

    /// When the event was received. Monotonic, not wall-clock.
    pub timestamp: Instant,
}

impl FileEvent {
    /// Creates a new event for `path` stamped with the current instant.
    #[inline]
    #[must_use]
    pub fn new(path: Utf8PathBuf) -> Self {
        Self {
            path,
            timestamp: Instant::now(),
        }
    }

    /// Creates a new event with a specific timestamp.
    #[inline]
    #[must_use]
    pub const fn with_timestamp(path: Utf8PathBuf, timestamp: Instant) -> Self {
        Self { path, timestamp }
    }

    /// Returns the final path component.
    #[inline]
    #[must_use]
    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name()
    }

    /// Returns `true` if the path lies inside an administrative directory
    /// named `admin_dir_name`.
    #[must_use]
    pub fn is_admin(&self, admin_dir_name: &str) -> bool {
        split_admin_path(&self.path, admin_dir_name).is_some()
    }

    /// Maps this event to the cache directory that needs refreshing.
    ///
    /// Returns `None` for administrative noise and for the filesystem root.
    ///
    /// ```
    /// use wcs_watcher::{FileEvent, RefreshTarget};
    /// use camino::Utf8PathBuf;
    ///
    /// let edit = FileEvent::new(Utf8PathBuf::from("/repo/src/lib.rs"));
    /// assert_eq!(edit.refresh_target(".git"), Some(RefreshTarget::directory("/repo/src")));
    ///
    /// let stage = FileEvent::new(Utf8PathBuf::from("/repo/.git/index"));
    /// assert_eq!(stage.refresh_target(".git"), Some(RefreshTarget::recursive("/repo")));
    ///
    /// let gc = FileEvent::new(Utf8PathBuf::from("/repo/.git/objects/pack/x.pack"));
    /// assert_eq!(gc.refresh_target(".git"), None);
    /// ```
    #[must_use]
    pub fn refresh_target(&self, admin_dir_name: &str) -> Option<RefreshTarget> {
        match split_admin_path(&self.path, admin_dir_name) {
            Some((owner, inner)) if is_admin_trigger(inner) => Some(RefreshTarget::recursive(owner)),
            Some(_) => None,
            None => self.path.parent().map(RefreshTarget::directory),
        }
    }
}

/// A cache directory to refresh in response to watch events.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RefreshTarget {
    /// The directory to refresh.
    pub path: Utf8PathBuf,

    /// Whether cached descendants should be refreshed too.
    pub recursive: bool,
}

impl RefreshTarget {
    /// A non-recursive refresh of `path`.
    #[must_use]
    pub fn directory(path: impl AsRef<Utf8Path>) -> Self {
        Self {
            path: path.as_ref().to_owned(),
            recursive: false,
        }
    }

    /// A recursive refresh of `path` and everything cached below it.
    #[must_use]
    pub fn recursive(path: impl AsRef<Utf8Path>) -> Self {
        Self {
            path: path.as_ref().to_owned(),
            recursive: true,
        }
    }
}

/// Events received together.
///
/// Uses [`SmallVec`] with inline storage for up to 8 events, the common case
/// for a single save.
///
/// # Examples
///
/// ```
/// use wcs_watcher::{FileEvent, FileEventBatch, RefreshTarget};
/// use camino::Utf8PathBuf;
///
/// let batch: FileEventBatch = [
///     "/repo/src/a.rs",
///     "/repo/src/b.rs",
///     "/repo/docs/guide.md",
/// ]
/// .into_iter()
/// .map(|p| FileEvent::new(Utf8PathBuf::from(p)))
/// .collect();
///
/// assert_eq!(
///     batch.refresh_targets(".git"),
///     vec![RefreshTarget::directory("/repo/docs"), RefreshTarget::directory("/repo/src")],
/// );
/// ```
#[derive(Debug, Clone)]
pub struct FileEventBatch {
    /// The events in this batch.
    pub events: SmallVec<[FileEvent; 8]>,

    /// When the batch was created.
    pub received_at: Instant,
}

impl FileEventBatch {
    /// Creates a new empty batch.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: SmallVec::new(),
            received_at: Instant::now(),
        }
    }

    /// Creates a batch from events.
    #[inline]
    #[must_use]
    pub fn from_events(events: impl IntoIterator<Item = FileEvent>) -> Self {
        Self {
            events: events.into_iter().collect(),
            received_at: Instant::now(),
        }
    }

    /// Adds an event to the batch.
    #[inline]
    pub fn push(&mut self, event: FileEvent) {
        self.events.push(event);
    }

    /// Returns the number of events in this batch.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns `true` if the batch contains no events.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Returns an iterator over the events.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &FileEvent> {
        self.events.iter()
    }

    /// Returns the unique paths in this batch, sorted.
    #[must_use]
    pub fn unique_paths(&self) -> Vec<&Utf8PathBuf> {
        let mut paths: Vec<&Utf8PathBuf> = self.events.iter().map(|e| &e.path).collect();
        paths.sort();
        paths.dedup();
        paths
    }

    /// Collapses the batch into the minimal set of refresh targets, sorted
    /// by path.
    ///
    /// Duplicate directories are merged (recursive wins), and non-recursive
    /// targets already covered by a recursive one are dropped.
    #[must_use]
    pub fn refresh_targets(&self, admin_dir_name: &str) -> Vec<RefreshTarget> {
        let mut merged: BTreeMap<Utf8PathBuf, bool> = BTreeMap::new();
        for target in self.events.iter().filter_map(|e| e.refresh_target(admin_dir_name)) {
            *merged.entry(target.path).or_insert(false) |= target.recursive;
        }

        let roots: Vec<Utf8PathBuf> = merged
            .iter()
            .filter(|(_, recursive)| **recursive)
            .map(|(path, _)| path.clone())
            .collect();

        merged
            .into_iter()
            .filter(|(path, recursive)| *recursive || !roots.iter().any(|root| path.starts_with(root)))
            .map(|(path, recursive)| RefreshTarget { path, recursive })
            .collect()
    }
}

impl Default for FileEventBatch {
    fn default() -> Self {
        Self::new()
    }
}

impl IntoIterator for FileEventBatch {
    type Item = FileEvent;
    type IntoIter = smallvec::IntoIter<[FileEvent; 8]>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.into_iter()
    }
}

impl<'a> IntoIterator for &'a FileEventBatch {
    type Item = &'a FileEvent;
    type IntoIter = std::slice::Iter<'a, FileEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}

impl FromIterator<FileEvent> for FileEventBatch {
    fn from_iter<T: IntoIterator<Item = FileEvent>>(iter: T) -> Self {
        Self::from_events(iter)
    }
}

/// Summary of a batch, logged by the watch loop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventBatchStats {
    /// Total number of events in the batch.
    pub total_events: usize,

    /// Events inside an administrative directory.
    pub admin_events: usize,

    /// Number of unique paths affected.
    pub unique_paths: usize,

    /// Number of refresh targets the batch collapses to.
    pub refresh_targets: usize,
}

impl EventBatchStats {
    /// Computes statistics for a batch of events.
    #[must_use]
    pub fn from_batch(batch: &FileEventBatch, admin_dir_name: &str) -> Self {
        Self {
            total_events: batch.len(),
            admin_events: batch.iter().filter(|e| e.is_admin(admin_dir_name)).count(),
            unique_paths: batch.unique_paths().len(),
            refresh_targets: batch.refresh_targets(admin_dir_name).len(),
        }
    }
}
