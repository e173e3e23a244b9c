//! Version-control status kinds.
//!
//! This module provides the [`StatusKind`] enum together with the severity
//! order used to reduce many statuses down to the "most important" one.
//!
//! # Severity Order
//!
//! From least to most important:
//!
//! ```text
//! none < unknown < unversioned < ignored < normal < modified
//!      < missing < added < deleted < conflicted
//! ```
//!
//! [`StatusKind::combine`] picks the maximum under this order, so folding any
//! collection of statuses in any order yields the same result.

use serde::{Deserialize, Serialize};

/// The version-control status of a file or directory.
///
/// The declaration order fixes the on-disk code of each kind (see
/// [`code`](Self::code)); the severity order is given by
/// [`rank`](Self::rank) and is independent of it.
///
/// # Examples
///
/// ```
/// use wcs_core::StatusKind;
///
/// let worst = StatusKind::Normal.combine(StatusKind::Modified);
/// assert_eq!(worst, StatusKind::Modified);
/// assert!(StatusKind::Modified.is_versioned());
/// assert!(!StatusKind::Unversioned.is_versioned());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    /// No status information at all.
    #[default]
    None,

    /// The path exists but is not tracked.
    Unversioned,

    /// The path is excluded by ignore rules.
    Ignored,

    /// Tracked and unchanged.
    Normal,

    /// Tracked with local modifications.
    Modified,

    /// Scheduled for addition.
    Added,

    /// Scheduled for deletion.
    Deleted,

    /// Has unresolved merge conflicts.
    Conflicted,

    /// Tracked but gone from the working tree.
    Missing,

    /// Placeholder handed out while the real status is being computed.
    Unknown,
}

impl StatusKind {
    /// Every kind, in declaration (wire code) order.
    pub const ALL: [Self; 10] = [
        Self::None,
        Self::Unversioned,
        Self::Ignored,
        Self::Normal,
        Self::Modified,
        Self::Added,
        Self::Deleted,
        Self::Conflicted,
        Self::Missing,
        Self::Unknown,
    ];

    /// Returns the severity rank of this kind. Higher is more important.
    #[inline]
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Unknown => 1,
            Self::Unversioned => 2,
            Self::Ignored => 3,
            Self::Normal => 4,
            Self::Modified => 5,
            Self::Missing => 6,
            Self::Added => 7,
            Self::Deleted => 8,
            Self::Conflicted => 9,
        }
    }

    /// Returns the more important of two kinds.
    ///
    /// This is commutative, associative and idempotent.
    ///
    /// # Examples
    ///
    /// ```
    /// use wcs_core::StatusKind;
    ///
    /// assert_eq!(
    ///     StatusKind::Conflicted.combine(StatusKind::Normal),
    ///     StatusKind::Conflicted
    /// );
    /// assert_eq!(StatusKind::None.combine(StatusKind::None), StatusKind::None);
    /// ```
    #[inline]
    #[must_use]
    pub const fn combine(self, other: Self) -> Self {
        if other.rank() > self.rank() { other } else { self }
    }

    /// Folds an iterator of kinds into the most important one.
    ///
    /// Returns [`StatusKind::None`] for an empty iterator.
    #[must_use]
    pub fn most_important(kinds: impl IntoIterator<Item = Self>) -> Self {
        kinds.into_iter().fold(Self::None, Self::combine)
    }

    /// Maps a kind onto what a directory may carry as a composite value.
    ///
    /// A directory cannot appear or disappear atomically, so `added` and
    /// `deleted` read as `modified` at directory level.
    #[inline]
    #[must_use]
    pub const fn for_directory(self) -> Self {
        match self {
            Self::Added | Self::Deleted => Self::Modified,
            other => other,
        }
    }

    /// Returns `true` if this kind describes a tracked path.
    ///
    /// Ignored paths count as versioned here: they are known to the working
    /// copy and carry a definite answer.
    #[inline]
    #[must_use]
    pub const fn is_versioned(self) -> bool {
        !matches!(self, Self::None | Self::Unknown | Self::Unversioned)
    }

    /// Returns the stable on-disk code of this kind.
    #[inline]
    #[must_use]
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Parses an on-disk code back into a kind.
    ///
    /// # Examples
    ///
    /// ```
    /// use wcs_core::StatusKind;
    ///
    /// assert_eq!(StatusKind::from_code(4), Some(StatusKind::Modified));
    /// assert_eq!(StatusKind::from_code(42), None);
    /// ```
    #[must_use]
    pub const fn from_code(code: u32) -> Option<Self> {
        let kind = match code {
            0 => Self::None,
            1 => Self::Unversioned,
            2 => Self::Ignored,
            3 => Self::Normal,
            4 => Self::Modified,
            5 => Self::Added,
            6 => Self::Deleted,
            7 => Self::Conflicted,
            8 => Self::Missing,
            9 => Self::Unknown,
            _ => return None,
        };
        Some(kind)
    }

    /// Returns a human-readable label for this kind.
    #[inline]
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Unversioned => "unversioned",
            Self::Ignored => "ignored",
            Self::Normal => "normal",
            Self::Modified => "modified",
            Self::Added => "added",
            Self::Deleted => "deleted",
            Self::Conflicted => "conflicted",
            Self::Missing => "missing",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for StatusKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}
