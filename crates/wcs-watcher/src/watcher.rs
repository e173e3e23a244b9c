//! Debounced working-copy watcher bridged to tokio.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Blocking Thread (spawn_blocking)             │
//! │  ┌───────────────────┐    ┌────────────────┐    ┌────────────┐  │
//! │  │ RecommendedWatcher│ -> │ Debouncer      │ -> │ Callback   │  │
//! │  │ (notify)          │    │ (debounce_ms)  │    │ (filtering)│  │
//! │  └───────────────────┘    └────────────────┘    └─────┬──────┘  │
//! └───────────────────────────────────────────────────────│─────────┘
//!                                                         │
//!                                           blocking_send │
//!                                                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Async Runtime (tokio)                        │
//! │  ┌──────────────────┐    ┌────────────────┐                     │
//! │  │ FileWatcher      │    │ mpsc::Receiver │ -> refresh targets  │
//! │  │ (shutdown ctrl)  │    │ (events)       │    -> StatusCache   │
//! │  └──────────────────┘    └────────────────┘                     │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use wcs_watcher::{AdminDirFilter, FileWatcher};
//! use wcs_core::WatchConfig;
//! use camino::Utf8Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = WatchConfig::default();
//!     let mut watcher =
//!         FileWatcher::new(Utf8Path::new("/work/repo"), &config, AdminDirFilter::default()).await?;
//!
//!     while let Some(batch) = watcher.recv_batch().await {
//!         for target in batch.refresh_targets(".git") {
//!             println!("refresh {} (recursive: {})", target.path, target.recursive);
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use notify::RecursiveMode;
use notify_debouncer_mini::{DebounceEventResult, Debouncer, new_debouncer};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use wcs_core::WatchConfig;

use crate::error::WatchError;
use crate::events::{FileEvent, FileEventBatch};
use crate::filter::FileFilter;

/// Default channel capacity for file events.
const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// A working-copy watcher that streams filtered events to async code.
///
/// # Lifecycle
///
/// 1. **Creation**: [`FileWatcher::new`] validates the path and spawns a
///    blocking task running the notify debouncer.
/// 2. **Event Reception**: [`recv`](Self::recv) for single events,
///    [`recv_batch`](Self::recv_batch) for everything that is ready.
/// 3. **Shutdown**: [`shutdown`](Self::shutdown) awaits the task; dropping
///    the watcher only signals it.
pub struct FileWatcher {
    /// Set to `None` once shutdown is initiated.
    shutdown_tx: Option<oneshot::Sender<()>>,

    task_handle: Option<JoinHandle<Result<(), WatchError>>>,

    event_rx: mpsc::Receiver<FileEvent>,

    watch_path: Utf8PathBuf,
}

impl std::fmt::Debug for FileWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileWatcher")
            .field("watch_path", &self.watch_path)
            .field("is_running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl FileWatcher {
    /// Starts watching the working copy at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::PathNotFound`] if the path doesn't exist and
    /// [`WatchError::NotADirectory`] if it is not a directory. Failures to
    /// start notify surface from [`shutdown`](Self::shutdown).
    pub async fn new<F: FileFilter>(
        path: &Utf8Path,
        config: &WatchConfig,
        filter: F,
    ) -> Result<Self, WatchError> {
        Self::with_capacity(path, config, filter, DEFAULT_CHANNEL_CAPACITY).await
    }

    /// Starts a watcher with a custom channel capacity.
    ///
    /// A larger channel absorbs bursts such as a branch switch without
    /// blocking the notify thread.
    #[allow(clippy::unused_async)] // Async for API consistency with shutdown()
    pub async fn with_capacity<F: FileFilter>(
        path: &Utf8Path,
        config: &WatchConfig,
        filter: F,
        channel_capacity: usize,
    ) -> Result<Self, WatchError> {
        if !path.exists() {
            return Err(WatchError::path_not_found(path));
        }
        if !path.is_dir() {
            return Err(WatchError::not_a_directory(path));
        }

        let watch_path = path.canonicalize_utf8()?;

        let (event_tx, event_rx) = mpsc::channel(channel_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let task_path = watch_path.clone();
        let debounce = Duration::from_millis(config.debounce_ms);
        let mode = if config.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };

        let task_handle = tokio::task::spawn_blocking(move || {
            run_watcher_loop(&task_path, debounce, mode, event_tx, shutdown_rx, filter)
        });

        Ok(Self {
            shutdown_tx: Some(shutdown_tx),
            task_handle: Some(task_handle),
            event_rx,
            watch_path,
        })
    }

    /// Receives the next event. Returns `None` once the watcher has stopped.
    pub async fn recv(&mut self) -> Option<FileEvent> {
        self.event_rx.recv().await
    }

    /// Waits for one event, then collects every event already queued behind
    /// it into a batch.
    ///
    /// Returns `None` once the watcher has stopped.
    pub async fn recv_batch(&mut self) -> Option<FileEventBatch> {
        let first = self.event_rx.recv().await?;
        let mut batch = FileEventBatch::new();
        batch.push(first);
        while let Ok(event) = self.event_rx.try_recv() {
            batch.push(event);
        }
        Some(batch)
    }

    /// Tries to receive an event without waiting.
    pub fn try_recv(&mut self) -> Result<FileEvent, mpsc::error::TryRecvError> {
        self.event_rx.try_recv()
    }

    /// Returns the event receiver, for use with `tokio::select!`.
    pub fn events(&mut self) -> &mut mpsc::Receiver<FileEvent> {
        &mut self.event_rx
    }

    /// Returns the canonical path being watched.
    #[must_use]
    pub fn watch_path(&self) -> &Utf8Path {
        &self.watch_path
    }

    /// Returns `true` while the watcher task is alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shutdown_tx.is_some() && self.task_handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stops the watcher and waits for its task.
    ///
    /// # Errors
    ///
    /// Returns the error the watcher task stopped with, or
    /// [`WatchError::ChannelClosed`] if it panicked.
    pub async fn shutdown(mut self) -> Result<(), WatchError> {
        if let Some(tx) = self.shutdown_tx.take() {
            // The task may already have exited with an error.
            let _ = tx.send(());
        }

        if let Some(handle) = self.task_handle.take() {
            match handle.await {
                Ok(result) => result?,
                Err(_join_error) => return Err(WatchError::ChannelClosed),
            }
        }

        Ok(())
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        // Drop is sync, so the task is signalled but not awaited.
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Runs the notify debouncer until the shutdown signal arrives, forwarding
/// filtered events to the async channel.
fn run_watcher_loop<F: FileFilter>(
    path: &Utf8Path,
    debounce: Duration,
    mode: RecursiveMode,
    event_tx: mpsc::Sender<FileEvent>,
    shutdown_rx: oneshot::Receiver<()>,
    filter: F,
) -> Result<(), WatchError> {
    let mut debouncer: Debouncer<notify::RecommendedWatcher> =
        new_debouncer(debounce, move |res: DebounceEventResult| match res {
            Ok(events) => {
                for event in events {
                    let utf8_path = match Utf8PathBuf::try_from(event.path) {
                        Ok(p) => p,
                        Err(e) => {
                            let err = WatchError::non_utf8_path(e.into_path_buf());
                            tracing::warn!(error = %err, "Skipping watch event");
                            continue;
                        }
                    };

                    if !filter.should_process(&utf8_path) {
                        tracing::trace!(path = %utf8_path, "Filtered out watch event");
                        continue;
                    }

                    if event_tx.blocking_send(FileEvent::new(utf8_path)).is_err() {
                        tracing::debug!("Event channel closed, dropping remaining events");
                        break;
                    }
                }
            }
            Err(error) => tracing::warn!(error = %error, "Debouncer error"),
        })?;

    debouncer.watcher().watch(path.as_std_path(), mode)?;

    tracing::info!(path = %path, recursive = matches!(mode, RecursiveMode::Recursive), "Watcher started");

    let _ = shutdown_rx.blocking_recv();

    tracing::info!(path = %path, "Watcher stopped");

    Ok(())
}
