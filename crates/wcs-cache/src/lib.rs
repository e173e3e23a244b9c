//! Hierarchical, incrementally updated version-control status cache.
//!
//! This crate answers "what is the version-control status of this path,
//! including everything below it?" from memory whenever it can, and falls
//! back to a queued background re-scan when it cannot. Callers on a
//! latency-sensitive thread never wait for disk or version-control I/O.
//!
//! # Overview
//!
//! - [`StatusCache`]: the registry of directory nodes, the crawl queue and
//!   the collaborators
//! - [`CachedDirectory`]: one node per directory with its file entries,
//!   child summaries, own status and composite status
//! - [`StatusEntry`]: a cached status with a modification-time fingerprint
//!   and an expiry deadline
//! - [`Crawler`] / [`drain`]: service the crawl queue on worker threads or
//!   synchronously
//! - [`CacheStats`]: atomic activity counters
//!
//! The cache does not derive statuses itself. It talks to the outside world
//! through three traits: [`StatusProvider`] enumerates a directory,
//! [`ShellNotifier`] receives repaint requests and [`DirectoryLister`] reads
//! modification times.
//!
//! # Example
//!
//! ```no_run
//! use std::ops::ControlFlow;
//! use std::sync::Arc;
//!
//! use camino::{Utf8Path, Utf8PathBuf};
//! use wcs_cache::{CacheError, Crawler, NullNotifier, ProviderError, RawStatus, StatusCache, StatusProvider};
//! use wcs_core::{CacheConfig, StatusKind};
//!
//! /// Reports every immediate member of the working copy as unchanged.
//! struct AllClean;
//!
//! impl StatusProvider for AllClean {
//!     fn working_copy_root(&self, _path: &Utf8Path) -> Option<Utf8PathBuf> {
//!         Some(Utf8PathBuf::from("/work/repo"))
//!     }
//!
//!     fn enumerate(
//!         &self,
//!         root: &Utf8Path,
//!         subpath: &str,
//!         sink: &mut dyn FnMut(&RawStatus) -> ControlFlow<()>,
//!     ) -> Result<(), ProviderError> {
//!         let dir = root.join(subpath);
//!         let entries = dir.read_dir_utf8().map_err(|err| ProviderError::io(&dir, err))?;
//!         for entry in entries.flatten() {
//!             let record = if entry.path().is_dir() {
//!                 RawStatus::directory(entry.path(), StatusKind::Normal)
//!             } else {
//!                 RawStatus::file(entry.path(), StatusKind::Normal)
//!             };
//!             if sink(&record).is_break() {
//!                 break;
//!             }
//!         }
//!         Ok(())
//!     }
//! }
//!
//! # fn main() -> Result<(), CacheError> {
//! let cache = Arc::new(StatusCache::new(CacheConfig::default(), Arc::new(AllClean), Arc::new(NullNotifier)));
//! let crawler = Crawler::spawn(Arc::clone(&cache), 2)?;
//!
//! // Never blocks; the first answer is usually a placeholder.
//! let entry = cache.status(Utf8Path::new("/work/repo/src/main.rs"), false);
//! println!("{}", entry.effective_status());
//!
//! crawler.shutdown();
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! ```text
//! caller ── status() ──> StatusCache ──> CachedDirectory (fetch = false)
//!                             │                 │ miss
//!                             │ <── enqueue ────┘
//!                             ▼
//!                        CrawlQueue ──> Crawler ──> CachedDirectory (fetch = true)
//!                                                         │
//!                                          StatusProvider ┘ records
//!                                                         │
//!                          parent CachedDirectory <── push composite
//! ```
//!
//! # Persistence
//!
//! [`StatusCache::save`] and [`StatusCache::load`] write and read the whole
//! tree in a little-endian binary format. A failed load leaves the cache as
//! it was; callers treat it as a cold start.

#![deny(clippy::all)]
#![warn(missing_docs)]

mod codec;
mod crawler;
mod directory;
mod entry;
mod error;
mod fs;
mod provider;
mod queue;
mod registry;
mod stats;

#[cfg(test)]
mod test_support;

pub use codec::{CACHE_FILE_VERSION, MAX_PATH_LEN, NODE_FORMAT_VERSION};
pub use crawler::{Crawler, drain, process_request};
pub use directory::CachedDirectory;
pub use entry::{StatusEntry, now_millis};
pub use error::{CacheError, PersistError, ProviderError};
pub use fs::{DirEntryInfo, DirectoryLister, FileStat, FileTime, StdFs};
pub use provider::{NullNotifier, RawStatus, ShellNotifier, StatusProvider};
pub use queue::CrawlRequest;
pub use registry::StatusCache;
pub use stats::{CacheStats, StatsSnapshot};
