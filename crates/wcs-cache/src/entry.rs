//! Cached status of a single path.
//!
//! A [`StatusEntry`] pairs a [`StatusKind`] with the evidence needed to decide
//! whether it can still be trusted: the file's modification time when the
//! status was recorded (its fingerprint) and a wall-clock deadline.
//!
//! # Examples
//!
//! ```
//! use wcs_cache::{FileTime, RawStatus, StatusEntry};
//! use wcs_core::StatusKind;
//!
//! let mtime = FileTime::from_nanos(42);
//! let mut entry = StatusEntry::default();
//! entry.set_status(&RawStatus::file("/repo/a.txt", StatusKind::Modified), mtime, 1_000);
//!
//! assert_eq!(entry.effective_status(), StatusKind::Modified);
//! assert!(!entry.has_expired(999));
//! assert!(entry.has_expired(1_000));
//! assert!(entry.fingerprint_matches(mtime));
//! ```

use std::io::{Read, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use wcs_core::StatusKind;

use crate::codec::{RecordReader, RecordWriter};
use crate::error::PersistError;
use crate::fs::FileTime;
use crate::provider::RawStatus;

const FLAG_ASSUME_VALID: u32 = 1;
const FLAG_SKIP_WORKTREE: u32 = 1 << 1;
const FLAG_HAS_BEEN_SET: u32 = 1 << 2;

/// Returns the current wall-clock time in milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// The cached status of one file or directory.
///
/// An entry answers queries only while `now < deadline` and the live
/// modification time of the path equals the stored fingerprint. A
/// default-constructed entry has never been set and is always expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusEntry {
    kind: StatusKind,
    assume_valid: bool,
    skip_worktree: bool,
    fingerprint: FileTime,
    deadline: u64,
    has_been_set: bool,
}

impl StatusEntry {
    /// Creates an entry that carries `kind` but has never been set.
    ///
    /// Used for answers handed out while the real status is unknown.
    #[inline]
    #[must_use]
    pub fn placeholder(kind: StatusKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    /// Overwrites the status and flags from a provider record and stamps a
    /// fresh fingerprint and deadline.
    pub fn set_status(&mut self, raw: &RawStatus, fingerprint: FileTime, deadline: u64) {
        self.kind = raw.effective();
        self.assume_valid = raw.assume_valid;
        self.skip_worktree = raw.skip_worktree;
        self.fingerprint = fingerprint;
        self.deadline = deadline;
        self.has_been_set = true;
    }

    /// Like [`set_status`](Self::set_status) for a bare kind with no flags.
    pub fn set_kind(&mut self, kind: StatusKind, fingerprint: FileTime, deadline: u64) {
        *self = Self {
            kind,
            fingerprint,
            deadline,
            has_been_set: true,
            ..Self::default()
        };
    }

    /// Returns the more important of the text and property status recorded
    /// by the last [`set_status`](Self::set_status), or the forced kind.
    #[inline]
    #[must_use]
    pub const fn effective_status(&self) -> StatusKind {
        self.kind
    }

    /// Returns `true` once `now` (milliseconds since the epoch) has reached
    /// the deadline.
    #[inline]
    #[must_use]
    pub const fn has_expired(&self, now: u64) -> bool {
        now >= self.deadline
    }

    /// Returns `true` if `mtime` equals the fingerprint taken when the status
    /// was recorded.
    #[inline]
    #[must_use]
    pub fn fingerprint_matches(&self, mtime: FileTime) -> bool {
        self.fingerprint == mtime
    }

    /// Forces the entry to expire immediately.
    #[inline]
    pub fn invalidate(&mut self) {
        self.deadline = 0;
    }

    /// Overrides the effective kind, leaving fingerprint and deadline alone.
    #[inline]
    pub fn force_status(&mut self, kind: StatusKind) {
        self.kind = kind;
    }

    /// Returns `true` if the effective kind describes a tracked path.
    #[inline]
    #[must_use]
    pub const fn is_versioned(&self) -> bool {
        self.kind.is_versioned()
    }

    /// Returns `true` if the entry was ever filled in from a real status.
    #[inline]
    #[must_use]
    pub const fn has_been_set(&self) -> bool {
        self.has_been_set
    }

    /// Returns `true` if the index entry is marked assume-unchanged.
    #[inline]
    #[must_use]
    pub const fn assume_valid(&self) -> bool {
        self.assume_valid
    }

    /// Returns `true` if the index entry is marked skip-worktree.
    #[inline]
    #[must_use]
    pub const fn skip_worktree(&self) -> bool {
        self.skip_worktree
    }

    /// Returns the stored fingerprint.
    #[inline]
    #[must_use]
    pub const fn fingerprint(&self) -> FileTime {
        self.fingerprint
    }

    /// Returns the deadline in milliseconds since the Unix epoch.
    #[inline]
    #[must_use]
    pub const fn deadline(&self) -> u64 {
        self.deadline
    }

    const fn flags(&self) -> u32 {
        let mut flags = 0;
        if self.assume_valid {
            flags |= FLAG_ASSUME_VALID;
        }
        if self.skip_worktree {
            flags |= FLAG_SKIP_WORKTREE;
        }
        if self.has_been_set {
            flags |= FLAG_HAS_BEEN_SET;
        }
        flags
    }

    pub(crate) fn save<W: Write>(&self, out: &mut RecordWriter<W>) -> Result<(), PersistError> {
        out.status(self.kind)?;
        out.u32(self.flags())?;
        out.u64(self.fingerprint.as_nanos())?;
        out.u64(self.deadline)
    }

    pub(crate) fn load<R: Read>(input: &mut RecordReader<R>) -> Result<Self, PersistError> {
        let kind = input.status()?;
        let flags = input.u32()?;
        let fingerprint = FileTime::from_nanos(input.u64()?);
        let deadline = input.u64()?;
        Ok(Self {
            kind,
            assume_valid: flags & FLAG_ASSUME_VALID != 0,
            skip_worktree: flags & FLAG_SKIP_WORKTREE != 0,
            fingerprint,
            deadline,
            has_been_set: flags & FLAG_HAS_BEEN_SET != 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(kind: StatusKind) -> RawStatus {
        RawStatus::file("/repo/a.txt", kind)
    }

    #[test]
    fn test_default_entry_is_unset_and_expired() {
        let entry = StatusEntry::default();
        assert!(!entry.has_been_set());
        assert!(entry.has_expired(0));
        assert_eq!(entry.effective_status(), StatusKind::None);
        assert!(!entry.is_versioned());
    }

    #[test]
    fn test_set_status_uses_more_important_of_text_and_prop() {
        let mut record = raw(StatusKind::Normal);
        record.prop_status = StatusKind::Modified;
        record.skip_worktree = true;

        let mut entry = StatusEntry::default();
        entry.set_status(&record, FileTime::from_nanos(7), 100);
        assert_eq!(entry.effective_status(), StatusKind::Modified);
        assert!(entry.skip_worktree());
        assert!(!entry.assume_valid());
        assert!(entry.has_been_set());
        assert_eq!(entry.deadline(), 100);
    }

    #[test]
    fn test_expiry_and_invalidate() {
        let mut entry = StatusEntry::default();
        entry.set_status(&raw(StatusKind::Normal), FileTime::from_nanos(1), 500);
        assert!(!entry.has_expired(499));
        entry.invalidate();
        assert!(entry.has_expired(0));
        assert!(entry.has_been_set());
    }

    #[test]
    fn test_fingerprint() {
        let mut entry = StatusEntry::default();
        entry.set_status(&raw(StatusKind::Normal), FileTime::from_nanos(10), 500);
        assert!(entry.fingerprint_matches(FileTime::from_nanos(10)));
        assert!(!entry.fingerprint_matches(FileTime::from_nanos(11)));
        assert!(!entry.fingerprint_matches(FileTime::ABSENT));
    }

    #[test]
    fn test_force_status_keeps_fingerprint() {
        let mut entry = StatusEntry::default();
        entry.set_status(&raw(StatusKind::Normal), FileTime::from_nanos(10), 500);
        entry.force_status(StatusKind::Conflicted);
        assert_eq!(entry.effective_status(), StatusKind::Conflicted);
        assert_eq!(entry.fingerprint(), FileTime::from_nanos(10));
        assert_eq!(entry.deadline(), 500);
    }

    #[test]
    fn test_placeholder() {
        let entry = StatusEntry::placeholder(StatusKind::Unknown);
        assert_eq!(entry.effective_status(), StatusKind::Unknown);
        assert!(!entry.has_been_set());
    }

    #[test]
    fn test_save_and_load_preserve_flags() {
        let mut record = raw(StatusKind::Added);
        record.assume_valid = true;
        let mut entry = StatusEntry::default();
        entry.set_status(&record, FileTime::from_nanos(99), 12_345);

        let mut buf = Vec::new();
        entry.save(&mut RecordWriter::new(&mut buf)).unwrap();
        assert_eq!(buf.len(), 24);
        // kind, then flags with assume-valid and has-been-set
        assert_eq!(&buf[..8], &[5, 0, 0, 0, 0b101, 0, 0, 0]);

        let loaded = StatusEntry::load(&mut RecordReader::new(buf.as_slice())).unwrap();
        assert_eq!(loaded, entry);
    }

    #[test]
    fn test_now_millis_is_recent() {
        // 2020-01-01T00:00:00Z
        assert!(now_millis() > 1_577_836_800_000);
    }
}
