//! Per-directory cache node.
//!
//! A [`CachedDirectory`] holds the status entries of the files directly
//! inside one directory, the last known composite status of each child
//! directory, the directory's own status and the composite (recursive)
//! status derived from all of them.
//!
//! # Locking
//!
//! Each node has its own content mutex. It is held only while the maps are
//! read or mutated and is released before calling the status provider, the
//! registry, the shell notifier or another node. A separate atomic flag
//! ensures that at most one scan of the directory runs at a time; a caller
//! that loses the race gets the cached answer instead of waiting.
//!
//! # Propagation
//!
//! After every scan, and whenever a child reports a new composite, the node
//! recomputes its own composite and pushes it to its parent node. The push
//! happens even if nothing changed; the parent decides whether the update is
//! visible.

use std::io::{Read, Write};
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};

use camino::{Utf8Path, Utf8PathBuf};
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, trace, warn};
use wcs_core::{StatusKind, relative_name};

use crate::codec::{NODE_FORMAT_VERSION, RecordReader, RecordWriter};
use crate::entry::{StatusEntry, now_millis};
use crate::error::PersistError;
use crate::fs::FileTime;
use crate::provider::RawStatus;
use crate::registry::StatusCache;

/// Cached status for one directory and its immediate members.
///
/// Nodes are created and owned by the [`StatusCache`]; every method that
/// needs to reach other nodes, the provider or the notifier takes the cache
/// as an argument instead of holding a reference to it.
#[derive(Debug)]
pub struct CachedDirectory {
    path: Utf8PathBuf,
    state: Mutex<DirectoryState>,
    scanning: AtomicBool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct DirectoryState {
    /// File name → entry, files only.
    entries: FxHashMap<String, StatusEntry>,
    /// Child directory → its last reported composite.
    children: FxHashMap<Utf8PathBuf, StatusKind>,
    own_status: StatusEntry,
    current_status: StatusKind,
    most_important_file: StatusKind,
    /// Listed members the last scan got no record for. Not persisted.
    unreported: FxHashSet<String>,
}

impl DirectoryState {
    fn composite(&self) -> StatusKind {
        let own = self.own_status.effective_status();
        if own == StatusKind::Ignored {
            return StatusKind::Ignored;
        }
        StatusKind::most_important(
            [own, self.most_important_file]
                .into_iter()
                .chain(self.children.values().copied()),
        )
        .for_directory()
    }

    fn own_status_valid(&self, now: u64) -> bool {
        self.own_status.has_been_set() && !self.own_status.has_expired(now)
    }

    fn recursive_own_status(&self) -> StatusEntry {
        let mut entry = self.own_status;
        if entry.is_versioned() {
            entry.force_status(self.composite());
        }
        entry
    }
}

/// Releases the single-flight flag when dropped.
struct ScanGuard<'a>(&'a AtomicBool);

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl CachedDirectory {
    pub(crate) fn new(path: Utf8PathBuf) -> Self {
        Self {
            path,
            state: Mutex::new(DirectoryState::default()),
            scanning: AtomicBool::new(false),
        }
    }

    /// Returns the directory this node describes.
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Returns `true` while a scan of this directory is in flight.
    #[inline]
    #[must_use]
    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::Acquire)
    }

    /// Returns `true` if the own status has been set and has not expired.
    #[must_use]
    pub fn is_own_status_valid(&self) -> bool {
        self.state.lock().own_status_valid(now_millis())
    }

    /// Forces the own status to expire, so that the next query queues a
    /// crawl.
    pub fn invalidate(&self) {
        self.state.lock().own_status.invalidate();
    }

    /// Returns the stored composite status.
    #[must_use]
    pub fn current_status(&self) -> StatusKind {
        self.state.lock().current_status
    }

    /// Returns the most important status among the file entries.
    #[must_use]
    pub fn most_important_file_status(&self) -> StatusKind {
        self.state.lock().most_important_file
    }

    /// Returns the known child directories, sorted.
    #[must_use]
    pub fn child_directories(&self) -> Vec<Utf8PathBuf> {
        let mut children: Vec<_> = self.state.lock().children.keys().cloned().collect();
        children.sort_unstable();
        children
    }

    /// Returns the last composite reported by or for `child`.
    #[must_use]
    pub fn child_status(&self, child: &Utf8Path) -> Option<StatusKind> {
        self.state.lock().children.get(child).copied()
    }

    /// Returns the cached entry for the file `name` without checking it
    /// against the filesystem.
    #[must_use]
    pub fn file_entry(&self, name: &str) -> Option<StatusEntry> {
        self.state.lock().entries.get(name).copied()
    }

    /// Returns the number of cached file entries.
    #[must_use]
    pub fn file_count(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Answers a status query for this directory or one of its immediate
    /// members.
    ///
    /// With `fetch == false` the call never touches the status provider: it
    /// answers from the cache, queues a crawl when the cache cannot answer
    /// and returns an `unknown` placeholder for anything it cannot vouch for.
    ///
    /// With `fetch == true` the directory is re-scanned on the calling thread
    /// unless another scan is already running, in which case the cached
    /// answer is returned at once.
    pub fn status_for_member(
        &self,
        cache: &StatusCache,
        path: &Utf8Path,
        recursive: bool,
        fetch: bool,
    ) -> StatusEntry {
        let request_for_self = path == self.path;

        if cache.is_admin_path(&self.path)
            || (!request_for_self && path.file_name() == Some(cache.config().admin_dir_name.as_str()))
        {
            return StatusEntry::default();
        }

        let Some(root) = cache.provider().working_copy_root(&self.path) else {
            return self.unversioned_member(cache, path, recursive, request_for_self);
        };

        if fetch {
            let composite = self.scan(cache, &root);
            if request_for_self {
                return composite;
            }
            return self.member_after_scan(cache, path, recursive);
        }

        let scanning = self.is_scanning();
        let mut crawl_queued = false;
        if !self.is_own_status_valid() && !scanning {
            crawl_queued = cache.enqueue_crawl(&self.path);
        }

        if request_for_self {
            return self.own_status(recursive);
        }

        if cache.lister().is_dir(path) {
            if let Some(entry) = Self::delegate_to_child(cache, path, recursive) {
                return entry;
            }
            if !scanning {
                cache.enqueue_crawl(path);
            }
            return StatusEntry::placeholder(StatusKind::Unknown);
        }

        let Some(name) = relative_name(&self.path, path) else {
            trace!(dir = %self.path, path = %path, "Query for a path that is not a member");
            return StatusEntry::placeholder(StatusKind::Unknown);
        };

        let mtime = cache.lister().modified(path);
        let now = now_millis();
        let cached = self.state.lock().entries.get(name).copied();
        if let Some(entry) = cached {
            let fresh = !entry.has_expired(now) && entry.fingerprint_matches(mtime);
            // A missing file that reappeared cannot still be missing
            if fresh && (entry.effective_status() != StatusKind::Missing || mtime.is_absent()) {
                return entry;
            }
        }

        if !crawl_queued && !scanning {
            cache.enqueue_crawl(&self.path);
        }
        StatusEntry::placeholder(StatusKind::Unknown)
    }

    fn unversioned_member(
        &self,
        cache: &StatusCache,
        path: &Utf8Path,
        recursive: bool,
        request_for_self: bool,
    ) -> StatusEntry {
        {
            let mut state = self.state.lock();
            state
                .own_status
                .set_kind(StatusKind::Unversioned, FileTime::ABSENT, cache.deadline());
            state.entries.clear();
            state.most_important_file = StatusKind::None;
            state.current_status = state.composite();
        }

        if request_for_self {
            return self.own_status(false);
        }

        if !cache.lister().is_dir(path) {
            if !cache.lister().exists(path) {
                // Let the crawler find out that the file is gone.
                cache.enqueue_crawl(&self.path);
            }
            return StatusEntry::placeholder(StatusKind::Unversioned);
        }

        // A member directory may be the root of a nested working copy.
        if let Some(entry) = Self::delegate_to_child(cache, path, recursive) {
            return entry;
        }
        cache.enqueue_crawl(path);
        StatusEntry::placeholder(StatusKind::Unversioned)
    }

    fn delegate_to_child(cache: &StatusCache, path: &Utf8Path, recursive: bool) -> Option<StatusEntry> {
        let child = cache.lookup_only(path)?;
        if !child.is_own_status_valid() {
            return None;
        }
        if recursive {
            // Watcher events can be missed, so a recursive view keeps the
            // grandchildren moving through the crawler.
            for grandchild in child.child_directories() {
                cache.enqueue_crawl(&grandchild);
            }
        }
        Some(child.own_status(recursive))
    }

    fn member_after_scan(&self, cache: &StatusCache, path: &Utf8Path, recursive: bool) -> StatusEntry {
        if let Some(child) = cache.lookup_only(path) {
            return child.own_status(recursive);
        }
        relative_name(&self.path, path)
            .and_then(|name| self.file_entry(name))
            .unwrap_or_else(|| StatusEntry::placeholder(StatusKind::Unknown))
    }

    fn try_begin_scan(&self) -> Option<ScanGuard<'_>> {
        self.scanning
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ScanGuard(&self.scanning))
    }

    /// Runs one provider enumeration and returns the resulting own status
    /// with the composite folded in.
    fn scan(&self, cache: &StatusCache, root: &Utf8Path) -> StatusEntry {
        let Some(guard) = self.try_begin_scan() else {
            debug!(path = %self.path, "Scan already in progress, returning cached status");
            cache.counters().record_scan_skipped();
            return self.state.lock().recursive_own_status();
        };

        {
            let mut state = self.state.lock();
            state.entries.clear();
            state.children.clear();
            state.most_important_file = StatusKind::None;
            state.own_status = StatusEntry::default();
            state.unreported.clear();
        }

        let fingerprints: FxHashMap<String, FileTime> = match cache.lister().list(&self.path) {
            Ok(listing) => listing
                .into_iter()
                .map(|member| (member.name, member.stat.modified))
                .collect(),
            Err(err) => {
                debug!(path = %self.path, error = %err, "Directory listing failed");
                FxHashMap::default()
            }
        };

        let subpath = self.path.strip_prefix(root).map_or("", Utf8Path::as_str);
        debug!(path = %self.path, root = %root, "Scanning directory");

        let result = cache.provider().enumerate(root, subpath, &mut |raw: &RawStatus| {
            let fingerprint = relative_name(&self.path, &raw.path)
                .and_then(|name| fingerprints.get(name).copied())
                .unwrap_or(FileTime::ABSENT);
            self.record(cache, raw, fingerprint);
            ControlFlow::Continue(())
        });

        if let Err(err) = result {
            warn!(path = %self.path, error = %err, "Status provider failed");
            cache.counters().record_provider_failure();
            drop(guard);
            self.update_current_status(cache);
            return StatusEntry::placeholder(StatusKind::Unknown);
        }

        {
            let mut state = self.state.lock();
            if !state.own_status.has_been_set() {
                // Tracked directories are not reported on their own.
                state
                    .own_status
                    .set_kind(StatusKind::Normal, FileTime::ABSENT, cache.deadline());
            }
            let admin = cache.config().admin_dir_name.as_str();
            let unreported: FxHashSet<String> = fingerprints
                .into_keys()
                .filter(|name| {
                    name != admin
                        && !state.entries.contains_key(name)
                        && !state.children.contains_key(&self.path.join(name))
                })
                .collect();
            state.unreported = unreported;
        }
        self.refresh_most_important(cache.config().unversioned_as_modified);
        drop(guard);
        cache.counters().record_scan();

        self.update_current_status(cache);
        self.state.lock().recursive_own_status()
    }

    /// Stores one provider record.
    ///
    /// A file record upserts the file's entry and notifies the shell when a
    /// previously known status changes. A directory record creates the
    /// child's node if needed, stores the child's composite in this node and
    /// sets the child's own status. A record for this directory sets its own
    /// status. Anything else is ignored.
    pub fn record_entry(&self, cache: &StatusCache, raw: &RawStatus) {
        let fingerprint = if raw.is_dir {
            FileTime::ABSENT
        } else {
            cache.lister().modified(&raw.path)
        };
        self.record(cache, raw, fingerprint);
    }

    fn record(&self, cache: &StatusCache, raw: &RawStatus, fingerprint: FileTime) {
        if raw.path == self.path {
            self.state
                .lock()
                .own_status
                .set_status(raw, FileTime::ABSENT, cache.deadline());
            return;
        }

        let Some(name) = relative_name(&self.path, &raw.path) else {
            trace!(dir = %self.path, path = %raw.path, "Ignoring record outside directory");
            return;
        };

        if raw.is_dir {
            if name == cache.config().admin_dir_name {
                return;
            }
            let child = cache.get_or_create(&raw.path);
            let kind = raw.effective().combine(child.current_status());
            self.state.lock().children.insert(raw.path.clone(), kind);
            child.set_status_from_parent(raw, cache.deadline());
            trace!(dir = %self.path, child = %raw.path, status = %kind, "Recorded child directory");
            return;
        }

        let new_kind = raw.effective();
        let changed = {
            let mut state = self.state.lock();
            let deadline = cache.deadline();
            match state.entries.get_mut(name) {
                Some(entry) => {
                    let previous = entry.effective_status();
                    entry.set_status(raw, fingerprint, deadline);
                    previous != StatusKind::None && previous != new_kind
                }
                None => {
                    let mut entry = StatusEntry::default();
                    entry.set_status(raw, fingerprint, deadline);
                    state.entries.insert(name.to_owned(), entry);
                    false
                }
            }
        };
        trace!(dir = %self.path, file = name, status = %new_kind, "Recorded file");
        if changed {
            cache.notify_shell(&raw.path);
        }
    }

    fn set_status_from_parent(&self, raw: &RawStatus, deadline: u64) {
        let mut state = self.state.lock();
        // An ignored directory stays ignored when reported as untracked.
        if state.current_status == StatusKind::Ignored && raw.text_status == StatusKind::Unversioned {
            return;
        }
        state.own_status.set_status(raw, FileTime::ABSENT, deadline);
    }

    fn refresh_most_important(&self, unversioned_as_modified: bool) {
        let mut state = self.state.lock();
        let most_important = StatusKind::most_important(state.entries.values().map(|entry| {
            match entry.effective_status() {
                StatusKind::Unversioned if unversioned_as_modified => StatusKind::Modified,
                kind => kind,
            }
        }));
        state.most_important_file = most_important.for_directory();
    }

    /// Recomputes the composite status, notifies the shell if it visibly
    /// changed and pushes it to the parent node.
    pub fn update_current_status(&self, cache: &StatusCache) {
        let (current, notify) = {
            let mut state = self.state.lock();
            let composite = state.composite();
            let own = state.own_status.effective_status();
            let changed = composite != state.current_status;
            state.current_status = composite;
            (composite, changed && own.is_versioned() && own != StatusKind::Ignored)
        };

        if notify {
            debug!(path = %self.path, status = %current, "Composite status changed");
            cache.notify_shell(&self.path);
        }

        let Some(parent) = self.path.parent() else {
            return;
        };
        if cache.propagates_to(&self.path, parent) {
            cache
                .get_or_create(parent)
                .update_child_directory_status(cache, &self.path, current);
        }
    }

    /// Receives the composite of a child directory.
    ///
    /// The composite is recomputed when the child's value changed or when
    /// this node's own status is no longer valid.
    pub fn update_child_directory_status(&self, cache: &StatusCache, child: &Utf8Path, kind: StatusKind) {
        let changed = {
            let mut state = self.state.lock();
            let previous = state.children.get(child).copied().unwrap_or_default();
            if previous != kind || !state.own_status_valid(now_millis()) {
                state.children.insert(child.to_owned(), kind);
                true
            } else {
                false
            }
        };
        if changed {
            self.update_current_status(cache);
        }
    }

    /// Returns the own status; with `recursive`, a versioned own status
    /// carries the composite instead.
    #[must_use]
    pub fn own_status(&self, recursive: bool) -> StatusEntry {
        let state = self.state.lock();
        if recursive {
            state.recursive_own_status()
        } else {
            state.own_status
        }
    }

    pub(crate) fn remove_child(&self, child: &Utf8Path) {
        self.state.lock().children.remove(child);
    }

    /// Checks the cached file entries against one directory listing.
    ///
    /// An invalid own status is re-established with a synchronous scan
    /// first. Entries that expired or whose modification time changed are
    /// invalidated, members that appeared since the last scan count as
    /// stale, and the directory is queued for one crawl if any were found.
    /// Members the last scan listed but the provider did not report are
    /// left alone. With
    /// `recursive`, every known child directory is queued too.
    ///
    /// Returns the number of stale members.
    pub fn refresh(&self, cache: &StatusCache, recursive: bool) -> usize {
        if !self.is_own_status_valid() {
            self.status_for_member(cache, &self.path, recursive, true);
        }

        let listing = match cache.lister().list(&self.path) {
            Ok(listing) => listing,
            Err(err) => {
                debug!(path = %self.path, error = %err, "Refresh could not list directory");
                cache.enqueue_crawl(&self.path);
                return 0;
            }
        };

        let admin = cache.config().admin_dir_name.as_str();
        let now = now_millis();
        let (stale, children) = {
            let mut state = self.state.lock();
            let mut stale = 0;
            for member in &listing {
                if member.name == admin || state.unreported.contains(&member.name) {
                    continue;
                }
                if member.stat.is_dir {
                    if !state.children.contains_key(&self.path.join(&member.name)) {
                        stale += 1;
                    }
                } else if !state.entries.contains_key(&member.name) {
                    stale += 1;
                }
            }

            let times: FxHashMap<&str, FileTime> = listing
                .iter()
                .map(|member| (member.name.as_str(), member.stat.modified))
                .collect();
            for (name, entry) in &mut state.entries {
                let mtime = times.get(name.as_str()).copied().unwrap_or(FileTime::ABSENT);
                if entry.has_expired(now) || !entry.fingerprint_matches(mtime) {
                    entry.invalidate();
                    stale += 1;
                }
            }

            let children = if recursive {
                state.children.keys().cloned().collect()
            } else {
                Vec::new()
            };
            (stale, children)
        };

        if stale > 0 {
            cache.enqueue_crawl(&self.path);
        }
        for child in &children {
            cache.enqueue_crawl(child);
        }
        debug!(path = %self.path, stale, children = children.len(), "Refreshed directory");
        stale
    }

    /// Serializes the whole node.
    pub fn save<W: Write>(&self, writer: &mut W) -> Result<(), PersistError> {
        let mut out = RecordWriter::new(writer);
        self.write_record(&mut out)?;
        out.flush()
    }

    /// Reads a node written by [`save`](Self::save).
    pub fn load<R: Read>(reader: &mut R) -> Result<Self, PersistError> {
        Self::read_record(&mut RecordReader::new(reader))
    }

    /// Replaces the content of this node with a record written by
    /// [`save`](Self::save).
    ///
    /// The record is decoded completely before anything is replaced; on
    /// error the node is left as it was.
    pub fn load_into<R: Read>(&self, reader: &mut R) -> Result<(), PersistError> {
        let loaded = Self::load(reader)?;
        if loaded.path != self.path {
            return Err(PersistError::DirectoryMismatch {
                expected: self.path.clone(),
                found: loaded.path,
            });
        }
        *self.state.lock() = loaded.state.into_inner();
        Ok(())
    }

    pub(crate) fn write_record<W: Write>(&self, out: &mut RecordWriter<W>) -> Result<(), PersistError> {
        let state = self.state.lock().clone();

        out.u32(NODE_FORMAT_VERSION)?;

        let mut entries: Vec<_> = state.entries.iter().collect();
        entries.sort_unstable_by(|a, b| a.0.cmp(b.0));
        out.count(entries.len())?;
        for (name, entry) in entries {
            out.str(name)?;
            entry.save(out)?;
        }

        let mut children: Vec<_> = state.children.iter().collect();
        children.sort_unstable_by(|a, b| a.0.cmp(b.0));
        out.count(children.len())?;
        for (path, kind) in children {
            out.str(path.as_str())?;
            out.status(*kind)?;
        }

        out.str(self.path.as_str())?;
        state.own_status.save(out)?;
        out.status(state.current_status)?;
        out.status(state.most_important_file)
    }

    pub(crate) fn read_record<R: Read>(input: &mut RecordReader<R>) -> Result<Self, PersistError> {
        input.version(NODE_FORMAT_VERSION)?;

        let mut state = DirectoryState::default();
        let count = input.u32()?;
        for _ in 0..count {
            let name = input.str()?;
            let entry = StatusEntry::load(input)?;
            state.entries.insert(name, entry);
        }

        let count = input.u32()?;
        for _ in 0..count {
            let path = Utf8PathBuf::from(input.str()?);
            let kind = input.status()?;
            state.children.insert(path, kind);
        }

        let path = Utf8PathBuf::from(input.str()?);
        state.own_status = StatusEntry::load(input)?;
        state.current_status = input.status()?;
        state.most_important_file = input.status()?;

        Ok(Self {
            path,
            state: Mutex::new(state),
            scanning: AtomicBool::new(false),
        })
    }

    #[cfg(test)]
    fn snapshot(&self) -> DirectoryState {
        self.state.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;
    use crate::test_support::{Fixture, REPO};

    fn repo(rel: &str) -> Utf8PathBuf {
        Utf8Path::new(REPO).join(rel)
    }

    fn file(rel: &str, kind: StatusKind) -> RawStatus {
        RawStatus::file(repo(rel), kind)
    }

    fn dir(rel: &str, kind: StatusKind) -> RawStatus {
        RawStatus::directory(repo(rel), kind)
    }

    #[test]
    fn test_scan_files_normal_and_modified() {
        let fx = Fixture::new();
        fx.fs.add_file(&repo("a.txt"), 10);
        fx.fs.add_file(&repo("b.txt"), 20);
        fx.provider.set(
            REPO,
            vec![file("a.txt", StatusKind::Normal), file("b.txt", StatusKind::Modified)],
        );

        let node = fx.cache.get_or_create(Utf8Path::new(REPO));
        let entry = node.status_for_member(&fx.cache, Utf8Path::new(REPO), true, true);

        assert_eq!(node.most_important_file_status(), StatusKind::Modified);
        assert_eq!(node.current_status(), StatusKind::Modified);
        assert_eq!(entry.effective_status(), StatusKind::Modified);
        assert_eq!(node.own_status(false).effective_status(), StatusKind::Normal);
        assert_eq!(node.file_count(), 2);
        assert_eq!(fx.provider.calls(), 1);
    }

    #[test]
    fn test_conflicted_child_directory() {
        let fx = Fixture::new();
        fx.fs.add_dir(&repo("sub"));
        fx.provider.set(REPO, vec![dir("sub", StatusKind::Normal)]);

        let node = fx.cache.get_or_create(Utf8Path::new(REPO));
        node.status_for_member(&fx.cache, Utf8Path::new(REPO), true, true);
        assert_eq!(node.current_status(), StatusKind::Normal);

        node.update_child_directory_status(&fx.cache, &repo("sub"), StatusKind::Conflicted);
        assert_eq!(node.file_count(), 0);
        assert_eq!(node.current_status(), StatusKind::Conflicted);
    }

    #[test]
    fn test_child_scan_pushes_to_parent() {
        let fx = Fixture::new();
        fx.fs.add_file(&repo("sub/x.rs"), 5);
        fx.provider.set(REPO, vec![dir("sub", StatusKind::Normal)]);
        fx.provider.set(&repo("sub"), vec![file("sub/x.rs", StatusKind::Conflicted)]);

        let root = fx.cache.get_or_create(Utf8Path::new(REPO));
        root.status_for_member(&fx.cache, Utf8Path::new(REPO), true, true);
        let sub = fx.cache.lookup_only(&repo("sub")).unwrap();
        sub.status_for_member(&fx.cache, &repo("sub"), true, true);

        assert_eq!(sub.current_status(), StatusKind::Conflicted);
        assert_eq!(root.child_status(&repo("sub")), Some(StatusKind::Conflicted));
        assert_eq!(root.current_status(), StatusKind::Conflicted);
    }

    #[test]
    fn test_composite_formula_collapses_added_and_deleted() {
        let fx = Fixture::new();
        fx.fs.add_file(&repo("new.rs"), 1);
        fx.provider.set(REPO, vec![file("new.rs", StatusKind::Added)]);

        let node = fx.cache.get_or_create(Utf8Path::new(REPO));
        node.status_for_member(&fx.cache, Utf8Path::new(REPO), false, true);

        let state = node.snapshot();
        let expected = StatusKind::most_important(
            [state.own_status.effective_status(), state.most_important_file]
                .into_iter()
                .chain(state.children.values().copied()),
        )
        .for_directory();
        assert_eq!(state.current_status, expected);
        assert_eq!(state.current_status, StatusKind::Modified);
        assert_eq!(
            node.file_entry("new.rs").map(|e| e.effective_status()),
            Some(StatusKind::Added)
        );
    }

    #[test]
    fn test_ignored_directory_short_circuits() {
        let fx = Fixture::new();
        let target = repo("build");
        fx.fs.add_file(&repo("build/out.o"), 3);
        fx.provider.set(
            &target,
            vec![dir("build", StatusKind::Ignored), file("build/out.o", StatusKind::Conflicted)],
        );

        let node = fx.cache.get_or_create(&target);
        node.status_for_member(&fx.cache, &target, true, true);
        node.update_child_directory_status(&fx.cache, &repo("build/deep"), StatusKind::Modified);

        assert_eq!(node.current_status(), StatusKind::Ignored);
        assert_eq!(node.own_status(true).effective_status(), StatusKind::Ignored);
    }

    #[test]
    fn test_stale_entry_is_not_fresh_and_queues_one_crawl() {
        let fx = Fixture::new();
        let a = repo("a.txt");
        fx.fs.add_file(&a, 10);
        fx.provider.set(REPO, vec![file("a.txt", StatusKind::Modified)]);

        let node = fx.cache.get_or_create(Utf8Path::new(REPO));
        node.status_for_member(&fx.cache, Utf8Path::new(REPO), false, true);
        fx.cache.clear_queue();

        let fresh = node.status_for_member(&fx.cache, &a, false, false);
        assert_eq!(fresh.effective_status(), StatusKind::Modified);
        assert_eq!(fx.cache.queue_len(), 0);

        fx.fs.touch(&a, 11);
        let stale = node.status_for_member(&fx.cache, &a, false, false);
        assert_eq!(stale.effective_status(), StatusKind::Unknown);
        assert_eq!(fx.cache.queue_len(), 1);

        node.status_for_member(&fx.cache, &a, false, false);
        assert_eq!(fx.cache.queue_len(), 1);
    }

    #[test]
    fn test_expired_entry_is_not_fresh() {
        let fx = Fixture::new();
        let a = repo("a.txt");
        fx.fs.add_file(&a, 10);
        fx.provider.set(REPO, vec![file("a.txt", StatusKind::Normal)]);

        let node = fx.cache.get_or_create(Utf8Path::new(REPO));
        node.status_for_member(&fx.cache, Utf8Path::new(REPO), false, true);
        fx.cache.clear_queue();

        node.state.lock().entries.get_mut("a.txt").unwrap().invalidate();
        let entry = node.status_for_member(&fx.cache, &a, false, false);
        assert_eq!(entry.effective_status(), StatusKind::Unknown);
        assert_eq!(fx.cache.queue_len(), 1);
    }

    #[test]
    fn test_missing_file_that_reappeared_is_stale() {
        let fx = Fixture::new();
        let gone = repo("gone.txt");
        fx.provider.set(REPO, vec![file("gone.txt", StatusKind::Missing)]);

        let node = fx.cache.get_or_create(Utf8Path::new(REPO));
        node.status_for_member(&fx.cache, Utf8Path::new(REPO), false, true);
        assert_eq!(
            node.status_for_member(&fx.cache, &gone, false, false).effective_status(),
            StatusKind::Missing
        );

        fx.fs.add_file(&gone, 5);
        assert_eq!(
            node.status_for_member(&fx.cache, &gone, false, false).effective_status(),
            StatusKind::Unknown
        );
    }

    #[test]
    fn test_cache_only_query_on_unscanned_directory_queues_crawl() {
        let fx = Fixture::new();
        let node = fx.cache.get_or_create(Utf8Path::new(REPO));
        fx.cache.clear_queue();

        let entry = node.status_for_member(&fx.cache, Utf8Path::new(REPO), true, false);
        assert!(!entry.has_been_set());
        assert_eq!(fx.cache.queue_len(), 1);
        assert_eq!(fx.provider.calls(), 0);
    }

    #[test]
    fn test_directory_member_delegates_to_child() {
        let fx = Fixture::new();
        fx.fs.add_dir(&repo("sub/inner"));
        fx.provider.set(REPO, vec![dir("sub", StatusKind::Normal)]);
        fx.provider.set(&repo("sub"), vec![dir("sub/inner", StatusKind::Normal)]);

        let root = fx.cache.get_or_create(Utf8Path::new(REPO));
        root.status_for_member(&fx.cache, Utf8Path::new(REPO), true, true);
        let sub = fx.cache.lookup_only(&repo("sub")).unwrap();
        sub.status_for_member(&fx.cache, &repo("sub"), true, true);
        fx.cache.clear_queue();

        let entry = root.status_for_member(&fx.cache, &repo("sub"), true, false);
        assert_eq!(entry.effective_status(), StatusKind::Normal);
        // the grandchild is queued again for the recursive view
        assert_eq!(fx.cache.queue_len(), 1);
    }

    #[test]
    fn test_admin_directory_is_never_queried() {
        let fx = Fixture::new();
        fx.fs.add_dir(&repo(".git"));
        let node = fx.cache.get_or_create(Utf8Path::new(REPO));
        fx.cache.clear_queue();

        let entry = node.status_for_member(&fx.cache, &repo(".git"), false, false);
        assert_eq!(entry, StatusEntry::default());
        assert_eq!(fx.cache.queue_len(), 0);

        let admin = fx.cache.get_or_create(&repo(".git"));
        let entry = admin.status_for_member(&fx.cache, &repo(".git"), false, true);
        assert_eq!(entry, StatusEntry::default());
        assert_eq!(fx.provider.calls(), 0);
    }

    #[test]
    fn test_directory_outside_working_copy() {
        let fx = Fixture::new();
        let outside = Utf8PathBuf::from("/elsewhere");
        fx.fs.add_file(&outside.join("f.txt"), 1);

        let node = fx.cache.get_or_create(&outside);
        let own = node.status_for_member(&fx.cache, &outside, true, true);
        assert_eq!(own.effective_status(), StatusKind::Unversioned);

        let member = node.status_for_member(&fx.cache, &outside.join("f.txt"), false, false);
        assert_eq!(member.effective_status(), StatusKind::Unversioned);
        assert_eq!(fx.provider.calls(), 0);
    }

    #[test]
    fn test_file_status_change_notifies_shell() {
        let fx = Fixture::new();
        let a = repo("a.txt");
        fx.fs.add_file(&a, 10);
        fx.provider.set(REPO, vec![file("a.txt", StatusKind::Normal)]);
        let node = fx.cache.get_or_create(Utf8Path::new(REPO));
        node.status_for_member(&fx.cache, Utf8Path::new(REPO), false, true);
        fx.notifier.clear();

        node.record_entry(&fx.cache, &file("a.txt", StatusKind::Modified));
        assert!(fx.notifier.contains(&a));

        fx.notifier.clear();
        node.record_entry(&fx.cache, &file("a.txt", StatusKind::Modified));
        assert!(!fx.notifier.contains(&a));
    }

    #[test]
    fn test_composite_change_notifies_directory() {
        let fx = Fixture::new();
        fx.fs.add_file(&repo("a.txt"), 10);
        fx.provider.set(REPO, vec![file("a.txt", StatusKind::Normal)]);
        let node = fx.cache.get_or_create(Utf8Path::new(REPO));
        node.status_for_member(&fx.cache, Utf8Path::new(REPO), false, true);
        fx.notifier.clear();

        node.update_child_directory_status(&fx.cache, &repo("sub"), StatusKind::Modified);
        assert!(fx.notifier.contains(Utf8Path::new(REPO)));
    }

    #[test]
    fn test_ignored_child_stays_ignored_when_reported_unversioned() {
        let fx = Fixture::new();
        fx.fs.add_dir(&repo("target"));
        let child = fx.cache.get_or_create(&repo("target"));
        fx.provider.set(&repo("target"), vec![dir("target", StatusKind::Ignored)]);
        child.status_for_member(&fx.cache, &repo("target"), false, true);
        assert_eq!(child.current_status(), StatusKind::Ignored);

        let root = fx.cache.get_or_create(Utf8Path::new(REPO));
        root.record_entry(&fx.cache, &dir("target", StatusKind::Unversioned));
        assert_eq!(child.own_status(false).effective_status(), StatusKind::Ignored);
    }

    #[test]
    fn test_records_outside_directory_are_ignored() {
        let fx = Fixture::new();
        let node = fx.cache.get_or_create(Utf8Path::new(REPO));
        node.record_entry(&fx.cache, &file("deep/nested/file.rs", StatusKind::Modified));
        node.record_entry(&fx.cache, &RawStatus::file("/other/file.rs", StatusKind::Modified));
        assert_eq!(node.file_count(), 0);
        assert!(node.child_directories().is_empty());
    }

    #[test]
    fn test_unversioned_as_modified() {
        let mut config = wcs_core::CacheConfig::default();
        config.unversioned_as_modified = true;
        let fx = Fixture::with_config(config);
        fx.fs.add_file(&repo("new.txt"), 1);
        fx.provider.set(REPO, vec![file("new.txt", StatusKind::Unversioned)]);

        let node = fx.cache.get_or_create(Utf8Path::new(REPO));
        node.status_for_member(&fx.cache, Utf8Path::new(REPO), false, true);
        assert_eq!(node.most_important_file_status(), StatusKind::Modified);

        let fx = Fixture::new();
        fx.fs.add_file(&repo("new.txt"), 1);
        fx.provider.set(REPO, vec![file("new.txt", StatusKind::Unversioned)]);
        let node = fx.cache.get_or_create(Utf8Path::new(REPO));
        node.status_for_member(&fx.cache, Utf8Path::new(REPO), false, true);
        assert_eq!(node.most_important_file_status(), StatusKind::Unversioned);
        assert_eq!(node.current_status(), StatusKind::Normal);
    }

    #[test]
    fn test_provider_failure_degrades_to_unknown() {
        let fx = Fixture::new();
        fx.provider.fail(REPO);
        let node = fx.cache.get_or_create(Utf8Path::new(REPO));

        let entry = node.status_for_member(&fx.cache, Utf8Path::new(REPO), true, true);
        assert_eq!(entry.effective_status(), StatusKind::Unknown);
        assert!(!node.is_own_status_valid());
        assert!(!node.is_scanning());
        assert_eq!(fx.cache.stats().provider_failures, 1);
    }

    #[test]
    fn test_provider_failure_keeps_composite_consistent() {
        let fx = Fixture::new();
        fx.fs.add_file(&repo("sub/a.txt"), 1);
        fx.provider.set(REPO, vec![dir("sub", StatusKind::Normal)]);
        fx.provider.set(&repo("sub"), vec![file("sub/a.txt", StatusKind::Modified)]);

        let root = fx.cache.get_or_create(Utf8Path::new(REPO));
        root.status_for_member(&fx.cache, Utf8Path::new(REPO), true, true);
        let sub = fx.cache.lookup_only(&repo("sub")).unwrap();
        sub.status_for_member(&fx.cache, &repo("sub"), true, true);
        assert_eq!(sub.current_status(), StatusKind::Modified);
        assert_eq!(root.current_status(), StatusKind::Modified);

        fx.provider.fail(repo("sub"));
        sub.status_for_member(&fx.cache, &repo("sub"), true, true);

        let state = sub.snapshot();
        assert_eq!(state.current_status, state.composite());
        assert_eq!(sub.current_status(), StatusKind::None);
        assert_eq!(sub.file_count(), 0);
        assert_eq!(root.child_status(&repo("sub")), Some(StatusKind::None));
        assert_eq!(root.current_status(), StatusKind::Normal);
    }

    #[test]
    fn test_concurrent_fetch_runs_one_enumeration() {
        let fx = Fixture::new();
        fx.fs.add_file(&repo("a.txt"), 1);
        fx.provider.set(REPO, vec![file("a.txt", StatusKind::Modified)]);
        let (entered, release) = fx.provider.block_next();
        let node = fx.cache.get_or_create(Utf8Path::new(REPO));

        let cache = Arc::clone(&fx.cache);
        let worker = thread::spawn(move || {
            let node = cache.get_or_create(Utf8Path::new(REPO));
            node.status_for_member(&cache, Utf8Path::new(REPO), true, true)
        });

        entered.recv().unwrap();
        assert!(node.is_scanning());
        let loser = node.status_for_member(&fx.cache, Utf8Path::new(REPO), true, true);
        assert!(!loser.has_been_set());
        assert_eq!(fx.provider.calls(), 1);

        release.send(()).unwrap();
        let winner = worker.join().unwrap();
        assert_eq!(winner.effective_status(), StatusKind::Modified);
        assert_eq!(fx.provider.calls(), 1);
        assert_eq!(fx.cache.stats().scans_skipped, 1);
        assert!(!node.is_scanning());
    }

    #[test]
    fn test_refresh_detects_stale_and_new_members() {
        let fx = Fixture::new();
        fx.fs.add_file(&repo("a.txt"), 10);
        fx.fs.add_file(&repo("b.txt"), 10);
        fx.fs.add_dir(&repo("sub"));
        fx.provider.set(
            REPO,
            vec![
                file("a.txt", StatusKind::Normal),
                file("b.txt", StatusKind::Normal),
                dir("sub", StatusKind::Normal),
            ],
        );
        let node = fx.cache.get_or_create(Utf8Path::new(REPO));
        node.status_for_member(&fx.cache, Utf8Path::new(REPO), false, true);
        fx.cache.clear_queue();

        assert_eq!(node.refresh(&fx.cache, false), 0);
        assert_eq!(fx.cache.queue_len(), 0);

        fx.fs.touch(&repo("a.txt"), 11);
        fx.fs.add_file(&repo("c.txt"), 1);
        assert_eq!(node.refresh(&fx.cache, false), 2);
        assert!(node.file_entry("a.txt").unwrap().has_expired(now_millis()));
        assert!(!node.file_entry("b.txt").unwrap().has_expired(now_millis()));
        assert_eq!(fx.cache.queue_len(), 1);
    }

    #[test]
    fn test_refresh_ignores_members_the_provider_never_reports() {
        let fx = Fixture::new();
        fx.fs.add_file(&repo("a.txt"), 10);
        fx.fs.add_dir(&repo("empty"));
        fx.provider.set(REPO, vec![file("a.txt", StatusKind::Normal)]);
        let node = fx.cache.get_or_create(Utf8Path::new(REPO));
        node.status_for_member(&fx.cache, Utf8Path::new(REPO), false, true);
        fx.cache.clear_queue();

        for _ in 0..3 {
            assert_eq!(node.refresh(&fx.cache, false), 0);
            assert_eq!(fx.cache.queue_len(), 0);
            crate::crawler::drain(&fx.cache);
        }
        assert_eq!(fx.provider.calls(), 1);

        fx.fs.add_file(&repo("new.txt"), 1);
        assert_eq!(node.refresh(&fx.cache, false), 1);
        assert_eq!(fx.cache.queue_len(), 1);
    }

    #[test]
    fn test_recursive_refresh_queues_children() {
        let fx = Fixture::new();
        fx.fs.add_dir(&repo("one"));
        fx.fs.add_dir(&repo("two"));
        fx.provider.set(REPO, vec![dir("one", StatusKind::Normal), dir("two", StatusKind::Normal)]);
        let node = fx.cache.get_or_create(Utf8Path::new(REPO));
        node.status_for_member(&fx.cache, Utf8Path::new(REPO), false, true);
        fx.cache.clear_queue();

        assert_eq!(node.refresh(&fx.cache, true), 0);
        assert_eq!(fx.cache.queue_len(), 2);
    }

    #[test]
    fn test_refresh_scans_when_own_status_invalid() {
        let fx = Fixture::new();
        let node = fx.cache.get_or_create(Utf8Path::new(REPO));
        node.refresh(&fx.cache, false);
        assert_eq!(fx.provider.calls(), 1);
        assert!(node.is_own_status_valid());
    }

    #[test]
    fn test_save_load_round_trip() {
        let fx = Fixture::new();
        fx.fs.add_file(&repo("a.txt"), 10);
        fx.fs.add_file(&repo("b.txt"), 20);
        fx.fs.add_dir(&repo("sub"));
        fx.provider.set(
            REPO,
            vec![
                file("a.txt", StatusKind::Normal),
                file("b.txt", StatusKind::Conflicted),
                dir("sub", StatusKind::Modified),
            ],
        );
        let node = fx.cache.get_or_create(Utf8Path::new(REPO));
        node.status_for_member(&fx.cache, Utf8Path::new(REPO), false, true);

        let mut buf = Vec::new();
        node.save(&mut buf).unwrap();
        let loaded = CachedDirectory::load(&mut buf.as_slice()).unwrap();

        assert_eq!(loaded.path(), node.path());
        assert_eq!(loaded.snapshot(), node.snapshot());
        assert!(!loaded.is_scanning());
    }

    #[test]
    fn test_load_rejects_version_mismatch_without_mutation() {
        let fx = Fixture::new();
        fx.fs.add_file(&repo("a.txt"), 10);
        fx.provider.set(REPO, vec![file("a.txt", StatusKind::Modified)]);
        let node = fx.cache.get_or_create(Utf8Path::new(REPO));
        node.status_for_member(&fx.cache, Utf8Path::new(REPO), false, true);
        let before = node.snapshot();

        let mut buf = Vec::new();
        node.save(&mut buf).unwrap();
        buf[0] = 0xFF;
        let err = node.load_into(&mut buf.as_slice()).unwrap_err();
        assert!(matches!(err, PersistError::VersionMismatch { .. }));
        assert_eq!(node.snapshot(), before);
    }

    #[test]
    fn test_load_rejects_overlong_key() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&NODE_FORMAT_VERSION.to_le_bytes());
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(&5000u32.to_le_bytes());
        let err = CachedDirectory::load(&mut buf.as_slice()).unwrap_err();
        assert!(matches!(err, PersistError::LengthExceeded { len: 5000, .. }));
    }

    #[test]
    fn test_load_into_rejects_other_directory() {
        let other = CachedDirectory::new(Utf8PathBuf::from("/other"));
        let mut buf = Vec::new();
        other.save(&mut buf).unwrap();

        let node = CachedDirectory::new(Utf8PathBuf::from(REPO));
        let err = node.load_into(&mut buf.as_slice()).unwrap_err();
        assert!(matches!(err, PersistError::DirectoryMismatch { .. }));
    }
}
