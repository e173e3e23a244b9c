//! Filtering of watch events.
//!
//! Version-control tools write to their administrative directory constantly
//! (lock files, object stores, logs). Almost none of those writes change the
//! status of a working file, so they are dropped in the watcher thread before
//! they reach the channel. The exceptions are the files whose change means
//! "statuses may have moved everywhere": the index and `HEAD`.
//!
//! # Examples
//!
//! ```
//! use wcs_watcher::{AdminDirFilter, FileFilter};
//! use camino::Utf8Path;
//!
//! let filter = AdminDirFilter::new(".git");
//!
//! assert!(filter.should_process(Utf8Path::new("/repo/src/main.rs")));
//! assert!(filter.should_process(Utf8Path::new("/repo/.git/index")));
//! assert!(!filter.should_process(Utf8Path::new("/repo/.git/objects/ab/cdef")));
//! assert!(!filter.should_process(Utf8Path::new("/repo/.git/index.lock")));
//! ```

use camino::Utf8Path;

/// Files inside the administrative directory whose change invalidates the
/// whole working copy.
pub const ADMIN_TRIGGERS: [&str; 2] = ["index", "HEAD"];

/// Splits `path` at the innermost administrative directory named `admin`.
///
/// Returns the working copy directory that owns the administrative directory
/// and the remainder of `path` below it (empty for the administrative
/// directory itself). Returns `None` if `path` is not inside one.
///
/// ```
/// use wcs_watcher::filter::split_admin_path;
/// use camino::Utf8Path;
///
/// let (owner, inner) = split_admin_path(Utf8Path::new("/repo/.git/refs/heads/main"), ".git").unwrap();
/// assert_eq!(owner, "/repo");
/// assert_eq!(inner, "refs/heads/main");
/// assert!(split_admin_path(Utf8Path::new("/repo/src/lib.rs"), ".git").is_none());
/// ```
#[must_use]
pub fn split_admin_path<'a>(path: &'a Utf8Path, admin: &str) -> Option<(&'a Utf8Path, &'a Utf8Path)> {
    let admin_dir = path.ancestors().find(|ancestor| ancestor.file_name() == Some(admin))?;
    let owner = admin_dir.parent()?;
    let inner = path.strip_prefix(admin_dir).ok()?;
    Some((owner, inner))
}

/// Returns `true` if `inner` (a path relative to an administrative
/// directory) names one of the [`ADMIN_TRIGGERS`].
#[inline]
#[must_use]
pub fn is_admin_trigger(inner: &Utf8Path) -> bool {
    ADMIN_TRIGGERS.iter().any(|trigger| inner.as_str() == *trigger)
}

/// A predicate deciding which watch events reach the channel.
///
/// Filters run on the blocking watcher thread, hence the `Send + Sync +
/// 'static` bound.
pub trait FileFilter: Send + Sync + 'static {
    /// Returns `true` if the event for `path` should be delivered.
    fn should_process(&self, path: &Utf8Path) -> bool;
}

/// A filter that accepts every path.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAllFilter;

impl FileFilter for AcceptAllFilter {
    #[inline]
    fn should_process(&self, _path: &Utf8Path) -> bool {
        true
    }
}

/// Drops administrative-directory noise.
///
/// Paths outside any administrative directory pass. Inside one, only the
/// [`ADMIN_TRIGGERS`] pass.
#[derive(Debug, Clone)]
pub struct AdminDirFilter {
    admin_dir_name: String,
}

impl AdminDirFilter {
    /// Creates a filter for administrative directories named `admin_dir_name`.
    #[must_use]
    pub fn new(admin_dir_name: impl Into<String>) -> Self {
        Self {
            admin_dir_name: admin_dir_name.into(),
        }
    }

    /// Returns the administrative directory name this filter recognizes.
    #[must_use]
    pub fn admin_dir_name(&self) -> &str {
        &self.admin_dir_name
    }
}

impl Default for AdminDirFilter {
    fn default() -> Self {
        Self::new(".git")
    }
}

impl FileFilter for AdminDirFilter {
    fn should_process(&self, path: &Utf8Path) -> bool {
        match split_admin_path(path, &self.admin_dir_name) {
            Some((_, inner)) => is_admin_trigger(inner),
            None => true,
        }
    }
}

impl<F: FileFilter + ?Sized> FileFilter for Box<F> {
    fn should_process(&self, path: &Utf8Path) -> bool {
        (**self).should_process(path)
    }
}

impl<F: FileFilter + ?Sized> FileFilter for std::sync::Arc<F> {
    fn should_process(&self, path: &Utf8Path) -> bool {
        (**self).should_process(path)
    }
}
