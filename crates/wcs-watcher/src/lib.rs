//! Working-copy watcher feeding the status cache.
//!
//! This crate detects file changes through the `notify` crate, debounces
//! them with `notify-debouncer-mini` and streams them into a tokio context.
//! There each batch collapses into [`RefreshTarget`]s, which the caller hands
//! to the status cache as refresh requests.
//!
//! # Overview
//!
//! - [`FileWatcher`]: the notify thread and its async receiving end
//! - [`AdminDirFilter`]: drops version-control bookkeeping writes except the
//!   index and `HEAD`
//! - [`FileEventBatch::refresh_targets`]: maps changed paths to the
//!   directories to refresh
//!
//! # Crate Dependencies
//!
//! ```text
//! wcs-cli ──► wcs-cache ───► wcs-core
//!         └─► wcs-watcher ─►
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use wcs_watcher::{AdminDirFilter, FileWatcher};
//! use wcs_core::WatchConfig;
//! use camino::Utf8Path;
//! use tokio::time::{Duration, interval};
//!
//! # async fn example() -> Result<(), wcs_watcher::WatchError> {
//! let mut watcher =
//!     FileWatcher::new(Utf8Path::new("/work/repo"), &WatchConfig::default(), AdminDirFilter::default())
//!         .await?;
//! let mut tick = interval(Duration::from_secs(1));
//!
//! loop {
//!     tokio::select! {
//!         Some(batch) = watcher.recv_batch() => {
//!             for target in batch.refresh_targets(".git") {
//!                 // cache.enqueue_refresh(&target.path, target.recursive);
//!                 let _ = target;
//!             }
//!         }
//!         _ = tick.tick() => {}
//!     }
//! }
//! # }
//! ```
//!
//! # Error Handling
//!
//! Setting up a watch returns a [`WatchError`]. Per-event problems such as
//! non-UTF-8 paths are logged and skipped.

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod error;
pub mod events;
pub mod filter;
pub mod watcher;

pub use error::WatchError;

pub use events::{EventBatchStats, FileEvent, FileEventBatch, RefreshTarget};

pub use filter::{ADMIN_TRIGGERS, AcceptAllFilter, AdminDirFilter, FileFilter};

pub use watcher::FileWatcher;
