//! Error types for the wcs-watcher crate.

use camino::Utf8PathBuf;

/// Errors that can occur while watching a working copy.
///
/// Every variant except [`WatchError::NonUtf8Path`] stops the watcher. A
/// non-UTF-8 event path is logged and the event skipped.
///
/// # Examples
///
/// ```
/// use wcs_watcher::WatchError;
///
/// let err = WatchError::path_not_found("/work/gone");
/// assert_eq!(err.path().map(|p| p.as_str()), Some("/work/gone"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// Failed to initialize or operate the notify watcher.
    #[error("notify watcher error: {0}")]
    Notify(#[from] notify::Error),

    /// The working copy path does not exist.
    #[error("path does not exist: {0}")]
    PathNotFound(Utf8PathBuf),

    /// The working copy path exists but is not a directory.
    #[error("not a directory: {0}")]
    NotADirectory(Utf8PathBuf),

    /// The watcher task went away before shutdown completed.
    #[error("event channel closed unexpectedly")]
    ChannelClosed,

    /// An event carried a path that is not valid UTF-8.
    ///
    /// Cache keys are UTF-8, so such events are logged and skipped.
    #[error("path is not valid UTF-8: {}", _0.display())]
    NonUtf8Path(std::path::PathBuf),

    /// An I/O error occurred while resolving the watch path.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WatchError {
    /// Creates a new [`WatchError::PathNotFound`] error.
    #[inline]
    pub fn path_not_found(path: impl Into<Utf8PathBuf>) -> Self {
        Self::PathNotFound(path.into())
    }

    /// Creates a new [`WatchError::NotADirectory`] error.
    #[inline]
    pub fn not_a_directory(path: impl Into<Utf8PathBuf>) -> Self {
        Self::NotADirectory(path.into())
    }

    /// Creates a new [`WatchError::NonUtf8Path`] error.
    #[inline]
    pub fn non_utf8_path(path: impl Into<std::path::PathBuf>) -> Self {
        Self::NonUtf8Path(path.into())
    }

    /// Returns the working copy path associated with this error, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Utf8PathBuf> {
        match self {
            Self::PathNotFound(path) | Self::NotADirectory(path) => Some(path),
            Self::Notify(_) | Self::ChannelClosed | Self::NonUtf8Path(_) | Self::Io(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::path::PathBuf;

    #[test]
    fn test_watch_error_path_not_found() {
        let err = WatchError::path_not_found("/work/missing");
        assert_eq!(err.path().map(|p| p.as_str()), Some("/work/missing"));
        assert_eq!(err.to_string(), "path does not exist: /work/missing");
    }

    #[test]
    fn test_watch_error_not_a_directory() {
        let err = WatchError::not_a_directory("/work/repo/README.md");
        assert_eq!(err.path().map(|p| p.as_str()), Some("/work/repo/README.md"));
        assert!(err.to_string().starts_with("not a directory"));
    }

    #[test]
    fn test_watch_error_channel_closed() {
        let err = WatchError::ChannelClosed;
        assert!(err.path().is_none());
    }

    #[test]
    fn test_watch_error_non_utf8() {
        let err = WatchError::non_utf8_path(PathBuf::from("bad"));
        assert!(err.path().is_none());
        assert!(err.to_string().contains("not valid UTF-8"));
    }

    #[test]
    fn test_watch_error_io() {
        let err = WatchError::from(io::Error::new(io::ErrorKind::PermissionDenied, "denied"));
        assert!(err.path().is_none());
        assert!(err.to_string().contains("I/O error"));
    }
}
