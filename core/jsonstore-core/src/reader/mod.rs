//! Dump file readers.
//!
//! - [`RandomAccessReader`] scans a plain `.txt` dump through a BRAF and keeps
//!   the offset and length of every line.
//! - [`StreamReader`] scans a gzip archive (or any byte stream) sequentially.
//!
//! Both skip lines that are not JSON objects, logging the file and line, and
//! count them in `skipped()`. Empty lines are skipped silently.

pub mod random_access;
pub mod stream;

pub use random_access::RandomAccessReader;
pub use stream::StreamReader;

use crate::config::Mode;
use crate::dump::{Repository, naming};
use crate::error::StoreResult;
use crate::handle::Handle;
use crate::record::Record;
use std::path::Path;
use std::sync::Arc;

/// One record produced by a scan.
#[derive(Debug, Clone)]
pub struct ScannedRecord {
    /// The parsed line.
    pub record: Arc<Record>,
    /// Lazy for `.txt` dumps in rewritable mode, materialized otherwise.
    pub handle: Handle,
    /// Byte offset of the line; `None` for streamed archives.
    pub offset: Option<u64>,
    /// Byte length of the line without terminator.
    pub length: usize,
    /// 1-based physical line number within the file.
    pub line: u64,
}

/// Reader chosen by file extension.
#[derive(Debug)]
pub enum DumpReader {
    RandomAccess(RandomAccessReader),
    Stream(StreamReader),
}

impl DumpReader {
    /// Opens `path` for a repository scan: `.gz` files stream, everything else
    /// is read through [`Repository::open_file`].
    pub fn open(repository: &Repository, path: &Path) -> StoreResult<Self> {
        if is_archive_path(path) {
            return Ok(DumpReader::Stream(StreamReader::open(path)?));
        }
        let file = repository.open_file(path)?;
        Ok(DumpReader::RandomAccess(RandomAccessReader::new(
            file,
            repository.mode(),
            repository.config().buffer_size,
        )?))
    }

    /// Opens `path` without a repository.
    pub fn open_path(path: &Path, mode: Mode, buffer_size: usize) -> StoreResult<Self> {
        if is_archive_path(path) {
            Ok(DumpReader::Stream(StreamReader::open(path)?))
        } else {
            Ok(DumpReader::RandomAccess(RandomAccessReader::open(
                path,
                mode,
                buffer_size,
            )?))
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            DumpReader::RandomAccess(r) => r.path(),
            DumpReader::Stream(r) => r.path(),
        }
    }

    /// Malformed lines skipped so far.
    pub fn skipped(&self) -> usize {
        match self {
            DumpReader::RandomAccess(r) => r.skipped(),
            DumpReader::Stream(r) => r.skipped(),
        }
    }
}

impl Iterator for DumpReader {
    type Item = StoreResult<ScannedRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            DumpReader::RandomAccess(r) => r.next(),
            DumpReader::Stream(r) => r.next(),
        }
    }
}

fn is_archive_path(path: &Path) -> bool {
    path.file_name()
        .is_some_and(|n| naming::is_archive(&n.to_string_lossy()))
}

/// Strips one trailing `\r`; `None` for blank lines.
pub(crate) fn content(line: &[u8]) -> Option<&[u8]> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    if line.trim_ascii().is_empty() {
        None
    } else {
        Some(line)
    }
}
