//! The directory registry.
//!
//! [`StatusCache`] maps directory paths to their [`CachedDirectory`] nodes,
//! owns the crawl queue and carries the collaborators (status provider,
//! shell notifier, directory lister) every node needs.
//!
//! # Locking
//!
//! The path map sits behind a [`RwLock`]; each node guards its own content.
//! The map lock is only held to look up, insert or remove nodes and is never
//! held while a node's lock is taken, so the two tiers cannot invert.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use std::ops::ControlFlow;
//!
//! use camino::{Utf8Path, Utf8PathBuf};
//! use wcs_cache::{NullNotifier, ProviderError, RawStatus, StatusCache, StatusProvider};
//! use wcs_core::{CacheConfig, StatusKind};
//!
//! struct Untracked;
//!
//! impl StatusProvider for Untracked {
//!     fn working_copy_root(&self, _path: &Utf8Path) -> Option<Utf8PathBuf> {
//!         None
//!     }
//!
//!     fn enumerate(
//!         &self,
//!         _root: &Utf8Path,
//!         _subpath: &str,
//!         _sink: &mut dyn FnMut(&RawStatus) -> ControlFlow<()>,
//!     ) -> Result<(), ProviderError> {
//!         Ok(())
//!     }
//! }
//!
//! let cache = StatusCache::new(CacheConfig::default(), Arc::new(Untracked), Arc::new(NullNotifier));
//! let dir = cache.get_or_create(Utf8Path::new("/tmp/project"));
//! assert_eq!(cache.len(), 1);
//! assert!(Arc::ptr_eq(&dir, &cache.lookup_only(Utf8Path::new("/tmp/project/")).unwrap()));
//! ```

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::sync::Arc;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::{debug, info, trace};
use wcs_core::{CacheConfig, StatusKind, is_within, normalize_path};

use crate::codec::{CACHE_FILE_VERSION, RecordReader, RecordWriter};
use crate::directory::CachedDirectory;
use crate::entry::{StatusEntry, now_millis};
use crate::error::{CacheError, PersistError};
use crate::fs::{DirectoryLister, StdFs};
use crate::provider::{ShellNotifier, StatusProvider};
use crate::queue::{CrawlQueue, CrawlRequest};
use crate::stats::{CacheStats, StatsSnapshot};

/// Hierarchical status cache for one or more working copies.
///
/// Share it between threads with an [`Arc`]; every method takes `&self`.
pub struct StatusCache {
    config: CacheConfig,
    provider: Arc<dyn StatusProvider>,
    notifier: Arc<dyn ShellNotifier>,
    lister: Arc<dyn DirectoryLister>,
    directories: RwLock<FxHashMap<Utf8PathBuf, Arc<CachedDirectory>>>,
    queue: CrawlQueue,
    stats: CacheStats,
}

impl std::fmt::Debug for StatusCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusCache")
            .field("config", &self.config)
            .field("directories", &self.len())
            .field("queued", &self.queue_len())
            .finish_non_exhaustive()
    }
}

impl StatusCache {
    /// Creates an empty cache that reads the real filesystem.
    #[must_use]
    pub fn new(
        config: CacheConfig,
        provider: Arc<dyn StatusProvider>,
        notifier: Arc<dyn ShellNotifier>,
    ) -> Self {
        Self {
            config,
            provider,
            notifier,
            lister: Arc::new(StdFs),
            directories: RwLock::new(FxHashMap::default()),
            queue: CrawlQueue::default(),
            stats: CacheStats::new(),
        }
    }

    /// Replaces the filesystem collaborator.
    #[must_use]
    pub fn with_lister(mut self, lister: Arc<dyn DirectoryLister>) -> Self {
        self.lister = lister;
        self
    }

    /// Returns the cache policy.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Returns the status provider.
    #[inline]
    #[must_use]
    pub fn provider(&self) -> &dyn StatusProvider {
        self.provider.as_ref()
    }

    /// Returns the filesystem collaborator.
    #[inline]
    #[must_use]
    pub fn lister(&self) -> &dyn DirectoryLister {
        self.lister.as_ref()
    }

    /// Returns the node for `path`, creating it if necessary.
    ///
    /// A newly created node is queued for a crawl.
    pub fn get_or_create(&self, path: &Utf8Path) -> Arc<CachedDirectory> {
        self.obtain(path, true)
    }

    /// Returns the node for `path` if it is already cached.
    #[must_use]
    pub fn lookup_only(&self, path: &Utf8Path) -> Option<Arc<CachedDirectory>> {
        let path = normalize_path(path);
        self.directories.read().get(&path).map(Arc::clone)
    }

    fn obtain(&self, path: &Utf8Path, crawl_new: bool) -> Arc<CachedDirectory> {
        let path = normalize_path(path);
        if let Some(dir) = self.directories.read().get(&path) {
            return Arc::clone(dir);
        }

        let (dir, created) = {
            let mut directories = self.directories.write();
            match directories.get(&path) {
                Some(dir) => (Arc::clone(dir), false),
                None => {
                    let dir = Arc::new(CachedDirectory::new(path.clone()));
                    directories.insert(path.clone(), Arc::clone(&dir));
                    (dir, true)
                }
            }
        };

        if created {
            trace!(path = %path, "Created directory node");
            if crawl_new && !self.is_admin_path(&path) {
                self.enqueue_crawl(&path);
            }
        }
        dir
    }

    /// Queues a crawl of `path`.
    ///
    /// Returns `false` if an identical request was already waiting.
    pub fn enqueue_crawl(&self, path: &Utf8Path) -> bool {
        self.enqueue(CrawlRequest::Crawl(normalize_path(path)))
    }

    /// Queues a refresh of `path`.
    pub fn enqueue_refresh(&self, path: &Utf8Path, recursive: bool) -> bool {
        self.enqueue(CrawlRequest::Refresh {
            path: normalize_path(path),
            recursive,
        })
    }

    fn enqueue(&self, request: CrawlRequest) -> bool {
        let queued = self.queue.push(request);
        if queued {
            self.stats.record_enqueue();
        }
        queued
    }

    /// Reports a visible status change of `path` to the shell.
    pub fn notify_shell(&self, path: &Utf8Path) {
        self.stats.record_notification();
        self.notifier.notify(path);
    }

    /// Returns the cached status of `path` without blocking.
    ///
    /// Anything the cache cannot answer is queued for the crawler and comes
    /// back as a placeholder. For a directory, `recursive` folds the status
    /// of everything below it into the answer.
    pub fn status(&self, path: &Utf8Path, recursive: bool) -> StatusEntry {
        let path = normalize_path(path);
        if self.is_admin_path(&path) {
            return StatusEntry::default();
        }
        let owner = if self.lister.is_dir(&path) {
            path.clone()
        } else {
            match path.parent() {
                Some(parent) => parent.to_owned(),
                None => return StatusEntry::default(),
            }
        };
        self.get_or_create(&owner)
            .status_for_member(self, &path, recursive, false)
    }

    /// Re-scans the directory `path` on the calling thread.
    ///
    /// A directory that no longer exists is dropped from the cache together
    /// with everything below it, and its parent is queued if cached.
    pub fn crawl_directory(&self, path: &Utf8Path) -> StatusEntry {
        let path = normalize_path(path);
        if !self.lister.is_dir(&path) {
            let removed = self.remove_cache_for_path(&path);
            debug!(path = %path, removed, "Crawled directory no longer exists");
            if let Some(parent) = path.parent() {
                if self.lookup_only(parent).is_some() {
                    self.enqueue_crawl(parent);
                }
            }
            return StatusEntry::placeholder(StatusKind::Unversioned);
        }
        self.obtain(&path, false)
            .status_for_member(self, &path, true, true)
    }

    /// Refreshes the directory `path` against the filesystem.
    ///
    /// Returns the number of stale members found.
    pub fn refresh_directory(&self, path: &Utf8Path, recursive: bool) -> usize {
        let path = normalize_path(path);
        if !self.lister.is_dir(&path) {
            self.enqueue_crawl(&path);
            return 0;
        }
        self.obtain(&path, false).refresh(self, recursive)
    }

    /// Drops `path` and every cached directory below it.
    ///
    /// Returns the number of nodes removed.
    pub fn remove_cache_for_path(&self, path: &Utf8Path) -> usize {
        let path = normalize_path(path);
        let removed = {
            let mut directories = self.directories.write();
            let before = directories.len();
            directories.retain(|dir, _| !is_within(dir, &path));
            before - directories.len()
        };

        if let Some(parent) = path.parent().and_then(|parent| self.lookup_only(parent)) {
            parent.remove_child(&path);
        }
        if removed > 0 {
            self.stats.record_removed(removed);
            debug!(path = %path, removed, "Removed cached directories");
        }
        removed
    }

    /// Drops every node and every queued request.
    pub fn clear(&self) {
        self.directories.write().clear();
        self.queue.clear();
        info!("Status cache cleared");
    }

    /// Discards every queued request.
    pub fn clear_queue(&self) {
        self.queue.clear();
    }

    /// Returns the number of cached directories.
    #[must_use]
    pub fn len(&self) -> usize {
        self.directories.read().len()
    }

    /// Returns `true` if no directory is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.directories.read().is_empty()
    }

    /// Returns the cached directory paths, sorted.
    #[must_use]
    pub fn directories(&self) -> Vec<Utf8PathBuf> {
        let mut paths: Vec<_> = self.directories.read().keys().cloned().collect();
        paths.sort_unstable();
        paths
    }

    /// Returns the number of requests waiting for the crawler.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Returns a snapshot of the activity counters.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub(crate) fn counters(&self) -> &CacheStats {
        &self.stats
    }

    pub(crate) fn try_next_request(&self) -> Option<CrawlRequest> {
        self.queue.try_pop()
    }

    pub(crate) fn next_request(&self, timeout: Duration) -> Option<CrawlRequest> {
        self.queue.pop_timeout(timeout)
    }

    /// Deadline for an entry recorded now.
    pub(crate) fn deadline(&self) -> u64 {
        now_millis().saturating_add(self.config.entry_ttl_ms)
    }

    /// Returns `true` if `path` is the admin directory or lies inside one.
    pub(crate) fn is_admin_path(&self, path: &Utf8Path) -> bool {
        let admin = self.config.admin_dir_name.as_str();
        path.components().any(|component| component.as_str() == admin)
    }

    /// Returns `true` if `child` pushes its composite to `parent`.
    ///
    /// Only parents inside a working copy receive updates, and only from the
    /// same working copy unless nested working copies are followed.
    pub(crate) fn propagates_to(&self, child: &Utf8Path, parent: &Utf8Path) -> bool {
        let Some(parent_root) = self.provider.working_copy_root(parent) else {
            return false;
        };
        self.config.recurse_submodules
            || self.provider.working_copy_root(child).as_deref() == Some(parent_root.as_path())
    }

    /// Writes every cached directory.
    ///
    /// Layout: `[version:u32][count:u32]` followed by `[path][node record]`
    /// per directory, in path order.
    pub fn save<W: Write>(&self, writer: W) -> Result<(), PersistError> {
        let mut directories: Vec<_> = self.directories.read().values().map(Arc::clone).collect();
        directories.sort_unstable_by(|a, b| a.path().cmp(b.path()));

        let mut out = RecordWriter::new(writer);
        out.u32(CACHE_FILE_VERSION)?;
        out.count(directories.len())?;
        for dir in &directories {
            out.str(dir.path().as_str())?;
            dir.write_record(&mut out)?;
        }
        out.flush()?;
        debug!(directories = directories.len(), "Saved status cache");
        Ok(())
    }

    /// Replaces the cached directories with the ones read from `reader`.
    ///
    /// Everything is decoded before the current contents are replaced; on
    /// error the cache is left as it was. Returns the number of directories
    /// loaded.
    pub fn load<R: Read>(&self, reader: R) -> Result<usize, PersistError> {
        let mut input = RecordReader::new(reader);
        input.version(CACHE_FILE_VERSION)?;

        let count = input.u32()?;
        let mut loaded = FxHashMap::default();
        for _ in 0..count {
            let path = Utf8PathBuf::from(input.str()?);
            let dir = CachedDirectory::read_record(&mut input)?;
            if dir.path() != path {
                return Err(PersistError::DirectoryMismatch {
                    expected: path,
                    found: dir.path().to_owned(),
                });
            }
            loaded.insert(path, Arc::new(dir));
        }

        let count = loaded.len();
        *self.directories.write() = loaded;
        info!(directories = count, "Loaded status cache");
        Ok(count)
    }

    /// Saves the cache to `path`, replacing the file atomically.
    pub fn save_to_file(&self, path: &Utf8Path) -> Result<(), CacheError> {
        let tmp = path.with_extension("tmp");
        let file = File::create(&tmp).map_err(|err| CacheError::cache_file(&tmp, err))?;
        self.save(BufWriter::new(file))?;
        std::fs::rename(&tmp, path).map_err(|err| CacheError::cache_file(path, err))?;
        Ok(())
    }

    /// Loads the cache from `path`.
    pub fn load_from_file(&self, path: &Utf8Path) -> Result<usize, CacheError> {
        let file = File::open(path).map_err(|err| CacheError::cache_file(path, err))?;
        Ok(self.load(BufReader::new(file))?)
    }
}
