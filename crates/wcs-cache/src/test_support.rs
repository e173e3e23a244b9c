//! In-memory collaborators for unit tests.

use std::io;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use camino::{Utf8Path, Utf8PathBuf};
use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use wcs_core::{CacheConfig, is_within};

use crate::error::ProviderError;
use crate::fs::{DirEntryInfo, DirectoryLister, FileStat, FileTime};
use crate::provider::{RawStatus, ShellNotifier, StatusProvider};
use crate::registry::StatusCache;

pub(crate) const REPO: &str = "/repo";

/// Scripted status provider.
#[derive(Default)]
pub(crate) struct FakeProvider {
    roots: Mutex<Vec<Utf8PathBuf>>,
    records: Mutex<FxHashMap<Utf8PathBuf, Vec<RawStatus>>>,
    failing: Mutex<FxHashSet<Utf8PathBuf>>,
    gate: Mutex<Option<(Sender<()>, Receiver<()>)>>,
    calls: AtomicUsize,
}

impl FakeProvider {
    pub(crate) fn add_root(&self, root: &str) {
        self.roots.lock().push(Utf8PathBuf::from(root));
    }

    pub(crate) fn set(&self, dir: impl AsRef<Utf8Path>, records: Vec<RawStatus>) {
        self.records.lock().insert(dir.as_ref().to_owned(), records);
    }

    pub(crate) fn fail(&self, dir: impl AsRef<Utf8Path>) {
        self.failing.lock().insert(dir.as_ref().to_owned());
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Makes the next enumeration signal on the first channel and then wait
    /// for a message on the second.
    pub(crate) fn block_next(&self) -> (Receiver<()>, Sender<()>) {
        let (entered_tx, entered_rx) = unbounded();
        let (release_tx, release_rx) = unbounded();
        *self.gate.lock() = Some((entered_tx, release_rx));
        (entered_rx, release_tx)
    }
}

impl StatusProvider for FakeProvider {
    fn working_copy_root(&self, path: &Utf8Path) -> Option<Utf8PathBuf> {
        self.roots
            .lock()
            .iter()
            .filter(|root| is_within(path, root))
            .max_by_key(|root| root.as_str().len())
            .cloned()
    }

    fn enumerate(
        &self,
        root: &Utf8Path,
        subpath: &str,
        sink: &mut dyn FnMut(&RawStatus) -> ControlFlow<()>,
    ) -> Result<(), ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let gate = self.gate.lock().take();
        if let Some((entered, release)) = gate {
            let _ = entered.send(());
            let _ = release.recv();
        }

        let dir = if subpath.is_empty() {
            root.to_owned()
        } else {
            root.join(subpath)
        };
        if self.failing.lock().contains(&dir) {
            return Err(ProviderError::failed(dir, "scripted failure"));
        }

        let records = self.records.lock().get(&dir).cloned().unwrap_or_default();
        for record in &records {
            if sink(record).is_break() {
                break;
            }
        }
        Ok(())
    }
}

/// In-memory filesystem. Modification times are raw nanoseconds.
#[derive(Default)]
pub(crate) struct FakeFs {
    nodes: Mutex<FxHashMap<Utf8PathBuf, FileStat>>,
}

impl FakeFs {
    fn insert_ancestors(nodes: &mut FxHashMap<Utf8PathBuf, FileStat>, path: &Utf8Path) {
        for ancestor in path.ancestors().skip(1) {
            nodes.entry(ancestor.to_owned()).or_insert(FileStat {
                modified: FileTime::from_nanos(1),
                is_dir: true,
            });
        }
    }

    pub(crate) fn add_dir(&self, path: &Utf8Path) {
        let mut nodes = self.nodes.lock();
        Self::insert_ancestors(&mut nodes, path);
        nodes.insert(
            path.to_owned(),
            FileStat {
                modified: FileTime::from_nanos(1),
                is_dir: true,
            },
        );
    }

    pub(crate) fn add_file(&self, path: &Utf8Path, nanos: u64) {
        let mut nodes = self.nodes.lock();
        Self::insert_ancestors(&mut nodes, path);
        nodes.insert(
            path.to_owned(),
            FileStat {
                modified: FileTime::from_nanos(nanos),
                is_dir: false,
            },
        );
    }

    pub(crate) fn touch(&self, path: &Utf8Path, nanos: u64) {
        if let Some(stat) = self.nodes.lock().get_mut(path) {
            stat.modified = FileTime::from_nanos(nanos);
        }
    }

    pub(crate) fn remove(&self, path: &Utf8Path) {
        self.nodes.lock().retain(|node, _| !is_within(node, path));
    }
}

impl DirectoryLister for FakeFs {
    fn list(&self, dir: &Utf8Path) -> io::Result<Vec<DirEntryInfo>> {
        let nodes = self.nodes.lock();
        if !nodes.get(dir).is_some_and(|stat| stat.is_dir) {
            return Err(io::Error::new(io::ErrorKind::NotFound, dir.as_str()));
        }
        Ok(nodes
            .iter()
            .filter(|(path, _)| path.parent() == Some(dir))
            .filter_map(|(path, stat)| {
                Some(DirEntryInfo {
                    name: path.file_name()?.to_owned(),
                    stat: *stat,
                })
            })
            .collect())
    }

    fn stat(&self, path: &Utf8Path) -> Option<FileStat> {
        self.nodes.lock().get(path).copied()
    }
}

/// Notifier that remembers every path it was given.
#[derive(Default)]
pub(crate) struct RecordingNotifier {
    paths: Mutex<Vec<Utf8PathBuf>>,
}

impl RecordingNotifier {
    pub(crate) fn contains(&self, path: &Utf8Path) -> bool {
        self.paths.lock().iter().any(|p| p == path)
    }

    pub(crate) fn clear(&self) {
        self.paths.lock().clear();
    }
}

impl ShellNotifier for RecordingNotifier {
    fn notify(&self, path: &Utf8Path) {
        self.paths.lock().push(path.to_owned());
    }
}

/// A cache over one working copy at [`REPO`] with fake collaborators.
pub(crate) struct Fixture {
    pub(crate) provider: Arc<FakeProvider>,
    pub(crate) fs: Arc<FakeFs>,
    pub(crate) notifier: Arc<RecordingNotifier>,
    pub(crate) cache: Arc<StatusCache>,
}

impl Fixture {
    pub(crate) fn new() -> Self {
        Self::with_config(CacheConfig::default())
    }

    pub(crate) fn with_config(config: CacheConfig) -> Self {
        let provider = Arc::new(FakeProvider::default());
        provider.add_root(REPO);
        let fs = Arc::new(FakeFs::default());
        fs.add_dir(Utf8Path::new(REPO));
        let notifier = Arc::new(RecordingNotifier::default());

        let dyn_provider: Arc<dyn StatusProvider> = Arc::clone(&provider) as Arc<dyn StatusProvider>;
        let dyn_notifier: Arc<dyn ShellNotifier> = Arc::clone(&notifier) as Arc<dyn ShellNotifier>;
        let dyn_fs: Arc<dyn DirectoryLister> = Arc::clone(&fs) as Arc<dyn DirectoryLister>;
        let cache = Arc::new(StatusCache::new(config, dyn_provider, dyn_notifier).with_lister(dyn_fs));

        Self {
            provider,
            fs,
            notifier,
            cache,
        }
    }
}
