//! Little-endian primitives for the on-disk cache format.
//!
//! Every record is a flat sequence of `u32`/`u64` values and length-prefixed
//! UTF-8 strings. Lengths are byte counts and are capped at
//! [`MAX_PATH_LEN`]; anything longer is treated as corruption.

use std::io::{Read, Write};

use wcs_core::StatusKind;

use crate::error::PersistError;

/// Format version of a single directory record.
pub const NODE_FORMAT_VERSION: u32 = 1;

/// Format version of the whole-tree cache file.
pub const CACHE_FILE_VERSION: u32 = 1;

/// Ceiling for every encoded length field, in bytes.
pub const MAX_PATH_LEN: u32 = 4096;

/// Writes primitive values to a byte stream.
pub(crate) struct RecordWriter<W> {
    inner: W,
}

impl<W: Write> RecordWriter<W> {
    pub(crate) const fn new(inner: W) -> Self {
        Self { inner }
    }

    pub(crate) fn u32(&mut self, value: u32) -> Result<(), PersistError> {
        self.inner.write_all(&value.to_le_bytes())?;
        Ok(())
    }

    pub(crate) fn u64(&mut self, value: u64) -> Result<(), PersistError> {
        self.inner.write_all(&value.to_le_bytes())?;
        Ok(())
    }

    pub(crate) fn count(&mut self, count: usize) -> Result<(), PersistError> {
        let count = u32::try_from(count).map_err(|_| PersistError::TooMany(count))?;
        self.u32(count)
    }

    pub(crate) fn status(&mut self, kind: StatusKind) -> Result<(), PersistError> {
        self.u32(kind.code())
    }

    pub(crate) fn str(&mut self, value: &str) -> Result<(), PersistError> {
        let len = u32::try_from(value.len()).unwrap_or(u32::MAX);
        if len > MAX_PATH_LEN {
            return Err(PersistError::LengthExceeded {
                len,
                max: MAX_PATH_LEN,
            });
        }
        self.u32(len)?;
        self.inner.write_all(value.as_bytes())?;
        Ok(())
    }

    pub(crate) fn flush(&mut self) -> Result<(), PersistError> {
        self.inner.flush()?;
        Ok(())
    }
}

/// Reads primitive values from a byte stream.
pub(crate) struct RecordReader<R> {
    inner: R,
}

impl<R: Read> RecordReader<R> {
    pub(crate) const fn new(inner: R) -> Self {
        Self { inner }
    }

    pub(crate) fn u32(&mut self) -> Result<u32, PersistError> {
        let mut buf = [0u8; 4];
        self.inner.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    pub(crate) fn u64(&mut self) -> Result<u64, PersistError> {
        let mut buf = [0u8; 8];
        self.inner.read_exact(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Reads and checks a version field.
    pub(crate) fn version(&mut self, expected: u32) -> Result<(), PersistError> {
        let found = self.u32()?;
        if found != expected {
            return Err(PersistError::VersionMismatch { expected, found });
        }
        Ok(())
    }

    pub(crate) fn status(&mut self) -> Result<StatusKind, PersistError> {
        let code = self.u32()?;
        StatusKind::from_code(code).ok_or(PersistError::UnknownStatus(code))
    }

    pub(crate) fn str(&mut self) -> Result<String, PersistError> {
        let len = self.u32()?;
        if len > MAX_PATH_LEN {
            return Err(PersistError::LengthExceeded {
                len,
                max: MAX_PATH_LEN,
            });
        }
        let mut buf = vec![0u8; len as usize];
        self.inner.read_exact(&mut buf)?;
        Ok(String::from_utf8(buf)?)
    }
}
