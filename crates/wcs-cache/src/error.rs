//! Error types for the wcs-cache crate.
//!
//! - [`ProviderError`] - the VCS status provider failed to enumerate a directory
//! - [`PersistError`] - a persisted cache record could not be written or read
//! - [`CacheError`] - failures surfaced by the registry and crawler
//!
//! # Error Recovery Strategy
//!
//! None of these are fatal to the process:
//!
//! - **Provider errors** are caught inside a scan; the directory degrades to
//!   `unknown` and is re-crawled on a later query.
//! - **Persistence errors** mean "cold cache": the caller starts empty and the
//!   cache rebuilds itself live.
//! - **Crawler spawn errors** leave the cache usable in synchronous mode via
//!   [`drain`](crate::drain).

use camino::Utf8PathBuf;

/// Errors reported by a [`StatusProvider`](crate::StatusProvider).
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The external tool could not be started or failed mid-stream.
    #[error("status provider I/O failed for {path}: {source}")]
    Io {
        /// The directory being enumerated.
        path: Utf8PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The external tool ran but reported failure.
    #[error("status provider failed for {path}: {message}")]
    Failed {
        /// The directory being enumerated.
        path: Utf8PathBuf,
        /// Diagnostic output from the tool.
        message: String,
    },

    /// The tool produced output that could not be understood.
    #[error("malformed status output for {path}: {message}")]
    Malformed {
        /// The directory being enumerated.
        path: Utf8PathBuf,
        /// What was wrong with the output.
        message: String,
    },
}

impl ProviderError {
    /// Creates a new [`ProviderError::Io`] error.
    #[inline]
    pub fn io(path: impl Into<Utf8PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a new [`ProviderError::Failed`] error.
    #[inline]
    pub fn failed(path: impl Into<Utf8PathBuf>, message: impl Into<String>) -> Self {
        Self::Failed {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new [`ProviderError::Malformed`] error.
    #[inline]
    pub fn malformed(path: impl Into<Utf8PathBuf>, message: impl Into<String>) -> Self {
        Self::Malformed {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Returns the directory the failure relates to.
    #[must_use]
    pub fn path(&self) -> &Utf8PathBuf {
        match self {
            Self::Io { path, .. } | Self::Failed { path, .. } | Self::Malformed { path, .. } => {
                path
            }
        }
    }
}

/// Errors that can occur while saving or loading the on-disk cache.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    /// Reading or writing the underlying stream failed (including truncation).
    #[error("cache file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The record was written by an incompatible format version.
    #[error("cache format version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// The version this build understands.
        expected: u32,
        /// The version found in the record.
        found: u32,
    },

    /// An encoded length exceeds the path-length ceiling.
    #[error("encoded length {len} exceeds the limit of {max} bytes")]
    LengthExceeded {
        /// The length found in the record.
        len: u32,
        /// The ceiling.
        max: u32,
    },

    /// A string field is not valid UTF-8.
    #[error("cache record contains invalid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// A status code does not name any known status kind.
    #[error("unknown status code {0}")]
    UnknownStatus(u32),

    /// A count field is too large to be written.
    #[error("too many items to encode: {0}")]
    TooMany(usize),

    /// The record describes a different directory than the one loading it.
    #[error("cache record is for {found}, expected {expected}")]
    DirectoryMismatch {
        /// The directory the record was loaded into.
        expected: Utf8PathBuf,
        /// The directory named in the record.
        found: Utf8PathBuf,
    },
}

impl PersistError {
    /// Returns `true` if the data itself is corrupt (as opposed to the
    /// stream failing).
    #[inline]
    #[must_use]
    pub const fn is_corruption(&self) -> bool {
        !matches!(self, Self::Io(_) | Self::TooMany(_))
    }
}

/// Errors surfaced by the registry and the crawler.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Saving or loading the cache failed.
    #[error(transparent)]
    Persist(#[from] PersistError),

    /// A crawler worker thread could not be spawned.
    #[error("failed to spawn crawler thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// The cache file could not be opened or created.
    #[error("failed to access cache file {path}: {source}")]
    CacheFile {
        /// The cache file path.
        path: Utf8PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl CacheError {
    /// Creates a new [`CacheError::CacheFile`] error.
    #[inline]
    pub fn cache_file(path: impl Into<Utf8PathBuf>, source: std::io::Error) -> Self {
        Self::CacheFile {
            path: path.into(),
            source,
        }
    }

    /// Returns `true` if the cache file does not exist yet.
    #[must_use]
    pub fn is_missing_file(&self) -> bool {
        matches!(self, Self::CacheFile { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_provider_error_path() {
        let err = ProviderError::failed("/repo/src", "fatal: not a git repository");
        assert_eq!(err.path().as_str(), "/repo/src");
        assert!(err.to_string().contains("not a git repository"));

        let err = ProviderError::io("/repo", io::Error::new(io::ErrorKind::NotFound, "git"));
        assert_eq!(err.path().as_str(), "/repo");
    }

    #[test]
    fn test_persist_error_corruption() {
        assert!(PersistError::VersionMismatch { expected: 1, found: 2 }.is_corruption());
        assert!(PersistError::LengthExceeded { len: 5000, max: 4096 }.is_corruption());
        assert!(PersistError::UnknownStatus(99).is_corruption());
        let io_err = PersistError::Io(io::Error::new(io::ErrorKind::UnexpectedEof, "eof"));
        assert!(!io_err.is_corruption());
    }

    #[test]
    fn test_persist_error_display() {
        let err = PersistError::VersionMismatch { expected: 3, found: 7 };
        assert_eq!(
            err.to_string(),
            "cache format version mismatch: expected 3, found 7"
        );
    }

    #[test]
    fn test_cache_error_missing_file() {
        let err = CacheError::cache_file("/cache.bin", io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert!(err.is_missing_file());
        let err = CacheError::cache_file("/cache.bin", io::Error::new(io::ErrorKind::PermissionDenied, "denied"));
        assert!(!err.is_missing_file());
        assert!(!CacheError::from(PersistError::UnknownStatus(12)).is_missing_file());
    }
}
