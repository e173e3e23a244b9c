//! Collaborator traits: the VCS status provider and the shell notification
//! sink.
//!
//! The cache never derives a file's status itself. It asks a
//! [`StatusProvider`] to enumerate a directory and receives one
//! [`RawStatus`] per member through a closure. Visible status changes are
//! reported to a [`ShellNotifier`] so that file overlays can be repainted.

use std::ops::ControlFlow;

use camino::{Utf8Path, Utf8PathBuf};
use wcs_core::StatusKind;

use crate::error::ProviderError;

/// One status record produced by a [`StatusProvider`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawStatus {
    /// Absolute path of the member.
    pub path: Utf8PathBuf,
    /// Status of the content.
    pub text_status: StatusKind,
    /// Status of the metadata (properties, mode bits).
    pub prop_status: StatusKind,
    /// Whether the member is a directory.
    pub is_dir: bool,
    /// The index entry is marked assume-unchanged.
    pub assume_valid: bool,
    /// The index entry is marked skip-worktree.
    pub skip_worktree: bool,
}

impl RawStatus {
    /// Creates a record for a file with the same text and property status.
    #[must_use]
    pub fn file(path: impl Into<Utf8PathBuf>, status: StatusKind) -> Self {
        Self {
            path: path.into(),
            text_status: status,
            prop_status: status,
            is_dir: false,
            assume_valid: false,
            skip_worktree: false,
        }
    }

    /// Creates a record for a directory with the same text and property status.
    #[must_use]
    pub fn directory(path: impl Into<Utf8PathBuf>, status: StatusKind) -> Self {
        Self {
            is_dir: true,
            ..Self::file(path, status)
        }
    }

    /// Returns the more important of the text and property status.
    #[inline]
    #[must_use]
    pub const fn effective(&self) -> StatusKind {
        self.text_status.combine(self.prop_status)
    }
}

/// Enumerates version-control status for one directory at a time.
pub trait StatusProvider: Send + Sync {
    /// Returns the root of the working copy containing `path`, or `None` if
    /// `path` is not inside one.
    fn working_copy_root(&self, path: &Utf8Path) -> Option<Utf8PathBuf>;

    /// Reports the status of every immediate member of `root/subpath`.
    ///
    /// `subpath` is relative to `root` and empty for the root itself. The
    /// provider may also report the directory itself. Returning
    /// [`ControlFlow::Break`] from `sink` asks the provider to stop early.
    ///
    /// # Errors
    ///
    /// Returns a [`ProviderError`] if the status could not be determined.
    fn enumerate(
        &self,
        root: &Utf8Path,
        subpath: &str,
        sink: &mut dyn FnMut(&RawStatus) -> ControlFlow<()>,
    ) -> Result<(), ProviderError>;
}

/// Receives "the overlay of this path must be repainted" notifications.
///
/// Implementations must not block and must not call back into the cache.
pub trait ShellNotifier: Send + Sync {
    /// Reports that the displayed status of `path` may have changed.
    fn notify(&self, path: &Utf8Path);
}

/// A [`ShellNotifier`] that drops every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullNotifier;

impl ShellNotifier for NullNotifier {
    fn notify(&self, _path: &Utf8Path) {}
}

impl<F> ShellNotifier for F
where
    F: Fn(&Utf8Path) + Send + Sync,
{
    fn notify(&self, path: &Utf8Path) {
        self(path);
    }
}
