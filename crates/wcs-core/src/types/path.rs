//! Path helpers for cache keys.
//!
//! Every directory in the cache is keyed by an absolute, lexically normalized
//! path without a trailing separator. These helpers produce and compare such
//! keys without touching the filesystem.

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};

/// Lexically normalizes a path.
///
/// Removes `.` components, resolves `..` against preceding normal
/// components and drops any trailing separator. Symlinks are not resolved.
///
/// # Examples
///
/// ```
/// use wcs_core::normalize_path;
/// use camino::Utf8Path;
///
/// assert_eq!(normalize_path(Utf8Path::new("/repo/./src/../lib/")), "/repo/lib");
/// assert_eq!(normalize_path(Utf8Path::new("/")), "/");
/// ```
#[must_use]
pub fn normalize_path(path: &Utf8Path) -> Utf8PathBuf {
    let mut out = Utf8PathBuf::new();
    for component in path.components() {
        match component {
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                let can_pop = matches!(
                    out.components().next_back(),
                    Some(Utf8Component::Normal(_))
                );
                if can_pop {
                    out.pop();
                } else if !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_str()),
        }
    }
    out
}

/// Returns `true` if `path` is `dir` or lies anywhere below it.
#[inline]
#[must_use]
pub fn is_within(path: &Utf8Path, dir: &Utf8Path) -> bool {
    path.starts_with(dir)
}

/// Returns the file name of `path` if it is an immediate child of `dir`.
///
/// # Examples
///
/// ```
/// use wcs_core::relative_name;
/// use camino::Utf8Path;
///
/// let dir = Utf8Path::new("/repo/src");
/// assert_eq!(relative_name(dir, Utf8Path::new("/repo/src/main.rs")), Some("main.rs"));
/// assert_eq!(relative_name(dir, Utf8Path::new("/repo/src/a/b.rs")), None);
/// ```
#[must_use]
pub fn relative_name<'a>(dir: &Utf8Path, path: &'a Utf8Path) -> Option<&'a str> {
    if path.parent()? == dir {
        path.file_name()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_removes_trailing_separator() {
        assert_eq!(normalize_path(Utf8Path::new("/repo/src/")), "/repo/src");
    }

    #[test]
    fn test_normalize_resolves_dots() {
        assert_eq!(normalize_path(Utf8Path::new("/repo/./a/b/../c")), "/repo/a/c");
        assert_eq!(normalize_path(Utf8Path::new("/../repo")), "/repo");
        assert_eq!(normalize_path(Utf8Path::new("a/../../b")), "../b");
    }

    #[test]
    fn test_normalize_keeps_root() {
        assert_eq!(normalize_path(Utf8Path::new("/")), "/");
        assert_eq!(normalize_path(Utf8Path::new("")), "");
    }

    #[test]
    fn test_is_within() {
        let dir = Utf8Path::new("/repo/src");
        assert!(is_within(Utf8Path::new("/repo/src"), dir));
        assert!(is_within(Utf8Path::new("/repo/src/a/b"), dir));
        assert!(!is_within(Utf8Path::new("/repo/srcs"), dir));
        assert!(!is_within(Utf8Path::new("/repo"), dir));
    }

    #[test]
    fn test_relative_name() {
        let dir = Utf8Path::new("/repo");
        assert_eq!(relative_name(dir, Utf8Path::new("/repo/x.txt")), Some("x.txt"));
        assert_eq!(relative_name(dir, Utf8Path::new("/repo")), None);
        assert_eq!(relative_name(dir, Utf8Path::new("/other/x.txt")), None);
    }
}
