//! Cache statistics with atomic counters.
//!
//! This module provides [`CacheStats`] for counting cache activity and
//! [`StatsSnapshot`] for point-in-time views.
//!
//! # Thread Safety
//!
//! All counters use [`AtomicU64`] with [`Relaxed`](std::sync::atomic::Ordering::Relaxed)
//! ordering. The numbers are informational and never drive cache decisions.
//!
//! # Examples
//!
//! ```
//! use wcs_cache::CacheStats;
//!
//! let stats = CacheStats::new();
//! stats.record_scan();
//! stats.record_scan_skipped();
//!
//! let snapshot = stats.snapshot();
//! assert_eq!(snapshot.scans, 1);
//! assert_eq!(snapshot.scans_skipped, 1);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Atomic counters for cache activity.
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Completed provider enumerations.
    scans: AtomicU64,
    /// Scans not started because another one was in flight.
    scans_skipped: AtomicU64,
    /// Requests accepted by the crawl queue.
    crawls_enqueued: AtomicU64,
    /// Paths reported to the shell notifier.
    shell_notifications: AtomicU64,
    /// Enumerations that returned an error.
    provider_failures: AtomicU64,
    /// Directory nodes dropped because their path vanished.
    removed_directories: AtomicU64,
}

impl CacheStats {
    /// Creates a new [`CacheStats`] with all counters at zero.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments the completed scan counter.
    #[inline]
    pub fn record_scan(&self) {
        self.scans.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments the skipped scan counter.
    #[inline]
    pub fn record_scan_skipped(&self) {
        self.scans_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments the queued request counter.
    #[inline]
    pub fn record_enqueue(&self) {
        self.crawls_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments the shell notification counter.
    #[inline]
    pub fn record_notification(&self) {
        self.shell_notifications.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments the provider failure counter.
    #[inline]
    pub fn record_provider_failure(&self) {
        self.provider_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Adds `count` to the removed directory counter.
    #[inline]
    pub fn record_removed(&self, count: usize) {
        self.removed_directories
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Returns a point-in-time snapshot of all counters.
    ///
    /// Each value is read individually, so the snapshot may mix values from
    /// slightly different moments.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            scans: self.scans.load(Ordering::Relaxed),
            scans_skipped: self.scans_skipped.load(Ordering::Relaxed),
            crawls_enqueued: self.crawls_enqueued.load(Ordering::Relaxed),
            shell_notifications: self.shell_notifications.load(Ordering::Relaxed),
            provider_failures: self.provider_failures.load(Ordering::Relaxed),
            removed_directories: self.removed_directories.load(Ordering::Relaxed),
        }
    }

    /// Resets all counters to zero.
    pub fn reset(&self) {
        self.scans.store(0, Ordering::Relaxed);
        self.scans_skipped.store(0, Ordering::Relaxed);
        self.crawls_enqueued.store(0, Ordering::Relaxed);
        self.shell_notifications.store(0, Ordering::Relaxed);
        self.provider_failures.store(0, Ordering::Relaxed);
        self.removed_directories.store(0, Ordering::Relaxed);
    }
}

/// A point-in-time copy of [`CacheStats`].
///
/// # Examples
///
/// ```
/// use wcs_cache::StatsSnapshot;
///
/// let snapshot = StatsSnapshot { scans: 3, scans_skipped: 1, ..Default::default() };
/// assert_eq!(snapshot.scan_attempts(), 4);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Completed provider enumerations.
    pub scans: u64,
    /// Scans not started because another one was in flight.
    pub scans_skipped: u64,
    /// Requests accepted by the crawl queue.
    pub crawls_enqueued: u64,
    /// Paths reported to the shell notifier.
    pub shell_notifications: u64,
    /// Enumerations that returned an error.
    pub provider_failures: u64,
    /// Directory nodes dropped because their path vanished.
    pub removed_directories: u64,
}

impl StatsSnapshot {
    /// Returns the number of scans that were requested, run or not.
    #[inline]
    #[must_use]
    pub const fn scan_attempts(&self) -> u64 {
        self.scans + self.scans_skipped
    }

    /// Returns the share of scan attempts that found a scan already running,
    /// as a percentage.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn contention_percent(&self) -> f64 {
        let attempts = self.scan_attempts();
        if attempts == 0 {
            0.0
        } else {
            (self.scans_skipped as f64 / attempts as f64) * 100.0
        }
    }
}

impl std::fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Scans: {} ({} skipped), queued: {}, notifications: {}, provider failures: {}, removed: {}",
            self.scans,
            self.scans_skipped,
            self.crawls_enqueued,
            self.shell_notifications,
            self.provider_failures,
            self.removed_directories
        )
    }
}
