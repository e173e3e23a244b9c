//! Pending-crawl queue.
//!
//! A FIFO of [`CrawlRequest`]s backed by an unbounded crossbeam channel. A
//! request that is already waiting in the queue is not queued a second time.

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use parking_lot::Mutex;
use rustc_hash::FxHashSet;

/// Work item for the crawler.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CrawlRequest {
    /// Re-scan the directory through the status provider.
    Crawl(Utf8PathBuf),

    /// Check the directory's cached entries against the filesystem and
    /// re-scan only if something is stale.
    Refresh {
        /// The directory to refresh.
        path: Utf8PathBuf,
        /// Also queue every known child directory.
        recursive: bool,
    },
}

impl CrawlRequest {
    /// Returns the directory this request is about.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        match self {
            Self::Crawl(path) | Self::Refresh { path, .. } => path,
        }
    }
}

#[derive(Debug)]
pub(crate) struct CrawlQueue {
    tx: Sender<CrawlRequest>,
    rx: Receiver<CrawlRequest>,
    pending: Mutex<FxHashSet<CrawlRequest>>,
}

impl Default for CrawlQueue {
    fn default() -> Self {
        let (tx, rx) = unbounded();
        Self {
            tx,
            rx,
            pending: Mutex::new(FxHashSet::default()),
        }
    }
}

impl CrawlQueue {
    /// Queues `request` unless an identical one is already waiting.
    ///
    /// Returns `true` if the request was queued.
    pub(crate) fn push(&self, request: CrawlRequest) -> bool {
        if !self.pending.lock().insert(request.clone()) {
            return false;
        }
        // Both ends live in `self`, so the channel cannot be disconnected.
        self.tx.send(request).is_ok()
    }

    pub(crate) fn try_pop(&self) -> Option<CrawlRequest> {
        let request = self.rx.try_recv().ok()?;
        self.pending.lock().remove(&request);
        Some(request)
    }

    pub(crate) fn pop_timeout(&self, timeout: Duration) -> Option<CrawlRequest> {
        match self.rx.recv_timeout(timeout) {
            Ok(request) => {
                // Removed before the request is serviced, so a duplicate
                // pushed from here on is queued again.
                self.pending.lock().remove(&request);
                Some(request)
            }
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.rx.len()
    }

    pub(crate) fn clear(&self) {
        let mut pending = self.pending.lock();
        while self.rx.try_recv().is_ok() {}
        pending.clear();
    }
}
