//! Handles: references to stored records.

use crate::codec::{Capsule, CodecState};
use crate::error::{StoreError, StoreResult};
use crate::record::{self, Record};
use crate::storage::braf::BufferedRandomAccessFile;
use std::path::Path;
use std::sync::Arc;

/// Reference to a record's storage location.
///
/// - `Materialized` and `Capsule` keep the record in memory. They are used in
///   compressed mode, where the file may be gzipped later and offsets stop
///   meaning anything.
/// - `Lazy` keeps `(file, offset, length)` and re-reads the line on every access.
///   It is used in rewritable mode, where dump files never change below EOF.
#[derive(Debug, Clone)]
pub enum Handle {
    Materialized(Arc<Record>),
    Capsule {
        capsule: Arc<Capsule>,
        codec: Arc<CodecState>,
    },
    Lazy(LazyHandle),
}

/// `(file, offset, length)` of one newline-free JSON line.
#[derive(Debug, Clone)]
pub struct LazyHandle {
    file: Arc<BufferedRandomAccessFile>,
    offset: u64,
    length: usize,
}

impl LazyHandle {
    pub fn new(file: Arc<BufferedRandomAccessFile>, offset: u64, length: usize) -> Self {
        Self {
            file,
            offset,
            length,
        }
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn length(&self) -> usize {
        self.length
    }

    /// Exactly the stored line bytes, without terminator.
    pub fn read_bytes(&self) -> StoreResult<Vec<u8>> {
        let mut buf = vec![0u8; self.length];
        let read = self.file.read_at(&mut buf, self.offset)?;
        if read != self.length {
            return Err(StoreError::TruncatedRecord {
                path: self.file.path().to_path_buf(),
                offset: self.offset,
                expected: self.length,
                actual: read,
            });
        }
        Ok(buf)
    }

    pub fn record(&self) -> StoreResult<Record> {
        let bytes = self.read_bytes()?;
        record::parse_line(&self.file.path().to_string_lossy(), &bytes)
    }
}

impl Handle {
    pub fn materialized(record: Record) -> Self {
        Handle::Materialized(Arc::new(record))
    }

    pub fn lazy(file: Arc<BufferedRandomAccessFile>, offset: u64, length: usize) -> Self {
        Handle::Lazy(LazyHandle::new(file, offset, length))
    }

    /// Minifies `record` into a capsule owned by `codec`.
    pub fn capsule(record: &Record, codec: &Arc<CodecState>) -> StoreResult<Self> {
        Ok(Handle::Capsule {
            capsule: Arc::new(codec.encode(record)?),
            codec: Arc::clone(codec),
        })
    }

    /// The referenced record. Lazy handles hit the file on every call.
    pub fn record(&self) -> StoreResult<Record> {
        match self {
            Handle::Materialized(record) => Ok(Record::clone(record)),
            Handle::Capsule { capsule, codec } => codec.decode(capsule),
            Handle::Lazy(lazy) => lazy.record(),
        }
    }

    pub fn is_lazy(&self) -> bool {
        matches!(self, Handle::Lazy(_))
    }

    /// `(path, offset, length)` for lazy handles.
    pub fn location(&self) -> Option<(&Path, u64, usize)> {
        match self {
            Handle::Lazy(lazy) => Some((lazy.path(), lazy.offset, lazy.length)),
            _ => None,
        }
    }

    /// Two handles refer to the same stored record.
    ///
    /// Lazy handles compare by location, in-memory handles by identity.
    pub fn same_record(&self, other: &Handle) -> bool {
        match (self, other) {
            (Handle::Lazy(a), Handle::Lazy(b)) => {
                a.offset == b.offset && a.length == b.length && a.path() == b.path()
            }
            (Handle::Materialized(a), Handle::Materialized(b)) => Arc::ptr_eq(a, b),
            (Handle::Capsule { capsule: a, .. }, Handle::Capsule { capsule: b, .. }) => {
                Arc::ptr_eq(a, b)
            }
            _ => false,
        }
    }
}
