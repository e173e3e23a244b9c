//! Background crawler.
//!
//! Worker threads take [`CrawlRequest`]s off the cache's queue and service
//! them: a crawl re-scans the directory through the status provider, a
//! refresh checks it against the filesystem first. Workers poll the queue
//! with a short timeout so that [`Crawler::shutdown`] is observed promptly.
//!
//! [`drain`] does the same work synchronously on the calling thread until
//! the queue is empty, which is what one-shot commands want.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, trace};

use crate::error::CacheError;
use crate::queue::CrawlRequest;
use crate::registry::StatusCache;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A pool of crawler threads bound to one [`StatusCache`].
///
/// Dropping the crawler stops and joins its threads.
#[derive(Debug)]
pub struct Crawler {
    shutdown: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl Crawler {
    /// Starts `workers` crawler threads (at least one).
    pub fn spawn(cache: Arc<StatusCache>, workers: usize) -> Result<Self, CacheError> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut crawler = Self {
            shutdown: Arc::clone(&shutdown),
            workers: Vec::with_capacity(workers.max(1)),
        };

        for index in 0..workers.max(1) {
            let cache = Arc::clone(&cache);
            let shutdown = Arc::clone(&shutdown);
            let handle = thread::Builder::new()
                .name(format!("wcs-crawler-{index}"))
                .spawn(move || worker_loop(&cache, &shutdown))
                .map_err(CacheError::Spawn)?;
            crawler.workers.push(handle);
        }

        info!(workers = crawler.workers.len(), "Crawler started");
        Ok(crawler)
    }

    /// Returns the number of worker threads.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Stops the workers and waits for them to finish their current request.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        self.shutdown.store(true, Ordering::Release);
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                debug!("Crawler thread panicked");
            }
        }
        info!("Crawler stopped");
    }
}

impl Drop for Crawler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(cache: &StatusCache, shutdown: &AtomicBool) {
    while !shutdown.load(Ordering::Acquire) {
        if let Some(request) = cache.next_request(POLL_INTERVAL) {
            process_request(cache, &request);
        }
    }
}

/// Services one request on the calling thread.
pub fn process_request(cache: &StatusCache, request: &CrawlRequest) {
    match request {
        CrawlRequest::Crawl(path) => {
            let status = cache.crawl_directory(path);
            trace!(path = %path, status = %status.effective_status(), "Crawled");
        }
        CrawlRequest::Refresh { path, recursive } => {
            let stale = cache.refresh_directory(path, *recursive);
            trace!(path = %path, stale, "Refreshed");
        }
    }
}

/// Services queued requests on the calling thread until the queue is empty.
///
/// Requests queued while draining are serviced too. Returns the number of
/// requests processed.
pub fn drain(cache: &StatusCache) -> usize {
    let mut processed = 0;
    while let Some(request) = cache.try_next_request() {
        process_request(cache, &request);
        processed += 1;
    }
    debug!(processed, "Drained crawl queue");
    processed
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use camino::{Utf8Path, Utf8PathBuf};
    use wcs_core::StatusKind;

    use super::*;
    use crate::provider::RawStatus;
    use crate::test_support::{Fixture, REPO};

    fn repo(rel: &str) -> Utf8PathBuf {
        Utf8Path::new(REPO).join(rel)
    }

    fn populate(fx: &Fixture) {
        fx.fs.add_file(&repo("README.md"), 1);
        fx.fs.add_file(&repo("src/lib.rs"), 2);
        fx.fs.add_file(&repo("src/net/conn.rs"), 3);
        fx.provider.set(
            REPO,
            vec![
                RawStatus::file(repo("README.md"), StatusKind::Normal),
                RawStatus::directory(repo("src"), StatusKind::Normal),
            ],
        );
        fx.provider.set(
            &repo("src"),
            vec![
                RawStatus::file(repo("src/lib.rs"), StatusKind::Normal),
                RawStatus::directory(repo("src/net"), StatusKind::Normal),
            ],
        );
        fx.provider.set(
            &repo("src/net"),
            vec![RawStatus::file(repo("src/net/conn.rs"), StatusKind::Conflicted)],
        );
    }

    #[test]
    fn test_drain_crawls_the_whole_tree() {
        let fx = Fixture::new();
        populate(&fx);

        fx.cache.enqueue_crawl(Utf8Path::new(REPO));
        assert!(drain(&fx.cache) >= 3);
        assert_eq!(fx.cache.queue_len(), 0);

        let root = fx.cache.lookup_only(Utf8Path::new(REPO)).unwrap();
        assert_eq!(root.current_status(), StatusKind::Conflicted);
        assert_eq!(
            fx.cache.status(Utf8Path::new(REPO), true).effective_status(),
            StatusKind::Conflicted
        );
        assert_eq!(
            fx.cache.status(&repo("src/net/conn.rs"), false).effective_status(),
            StatusKind::Conflicted
        );
    }

    #[test]
    fn test_drain_empty_queue() {
        let fx = Fixture::new();
        assert_eq!(drain(&fx.cache), 0);
    }

    #[test]
    fn test_refresh_request_after_change() {
        let fx = Fixture::new();
        populate(&fx);
        fx.cache.enqueue_crawl(Utf8Path::new(REPO));
        drain(&fx.cache);
        let scans = fx.provider.calls();

        fx.fs.touch(&repo("README.md"), 9);
        fx.provider.set(
            REPO,
            vec![
                RawStatus::file(repo("README.md"), StatusKind::Modified),
                RawStatus::directory(repo("src"), StatusKind::Normal),
            ],
        );
        fx.cache.enqueue_refresh(Utf8Path::new(REPO), false);
        drain(&fx.cache);

        assert_eq!(fx.provider.calls(), scans + 1);
        assert_eq!(
            fx.cache.status(&repo("README.md"), false).effective_status(),
            StatusKind::Modified
        );
    }

    #[test]
    fn test_threads_service_the_queue() {
        let fx = Fixture::new();
        populate(&fx);
        let crawler = Crawler::spawn(Arc::clone(&fx.cache), 2).unwrap();
        assert_eq!(crawler.worker_count(), 2);

        fx.cache.enqueue_crawl(Utf8Path::new(REPO));
        let deadline = Instant::now() + Duration::from_secs(5);
        while fx.cache.status(Utf8Path::new(REPO), true).effective_status() != StatusKind::Conflicted {
            assert!(Instant::now() < deadline, "crawler did not converge");
            thread::sleep(Duration::from_millis(10));
        }
        crawler.shutdown();
    }

    #[test]
    fn test_zero_workers_spawns_one() {
        let fx = Fixture::new();
        let crawler = Crawler::spawn(Arc::clone(&fx.cache), 0).unwrap();
        assert_eq!(crawler.worker_count(), 1);
        drop(crawler);
    }
}
