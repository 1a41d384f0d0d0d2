//! Random-Access Reader.

use super::ScannedRecord;
use crate::config::Mode;
use crate::error::StoreResult;
use crate::handle::Handle;
use crate::record;
use crate::storage::braf::{BufferedRandomAccessFile, IndexedLine};
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

/// Line-by-line scan of a plain dump that keeps every line's offset and length.
///
/// In rewritable mode each record comes with a lazy handle on the scanned
/// file; in compressed mode the handle is materialized because the file may be
/// gzipped later.
///
/// Every reader scans through its own read-only BRAF, so several scans of one
/// file (including the current dump while it is being appended to) never move
/// each other's cursor. Lazy handles point at the shared `file` instead.
#[derive(Debug)]
pub struct RandomAccessReader {
    scan: BufferedRandomAccessFile,
    file: Arc<BufferedRandomAccessFile>,
    label: String,
    mode: Mode,
    line: u64,
    skipped: usize,
    done: bool,
}

impl RandomAccessReader {
    /// Scans the file behind `file` from offset 0. Handles produced in
    /// rewritable mode read through `file`; the scan itself uses a private
    /// cursor with a `buffer_size` buffer.
    pub fn new(
        file: Arc<BufferedRandomAccessFile>,
        mode: Mode,
        buffer_size: usize,
    ) -> StoreResult<Self> {
        let scan = BufferedRandomAccessFile::open_read_only(file.path(), buffer_size)?;
        let label = file.path().to_string_lossy().into_owned();
        Ok(Self {
            scan,
            file,
            label,
            mode,
            line: 0,
            skipped: 0,
            done: false,
        })
    }

    /// Opens `path` read-only and scans it.
    pub fn open(path: &Path, mode: Mode, buffer_size: usize) -> StoreResult<Self> {
        let file = BufferedRandomAccessFile::open_read_only(path, buffer_size)?;
        Self::new(Arc::new(file), mode, buffer_size)
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    fn scanned(&self, offset: u64, bytes: &[u8]) -> StoreResult<ScannedRecord> {
        let record = Arc::new(record::parse_line(&self.label, bytes)?);
        let handle = match self.mode {
            Mode::Rewritable => Handle::lazy(Arc::clone(&self.file), offset, bytes.len()),
            Mode::Compressed => Handle::Materialized(Arc::clone(&record)),
        };
        Ok(ScannedRecord {
            record,
            handle,
            offset: Some(offset),
            length: bytes.len(),
            line: self.line,
        })
    }
}

impl Iterator for RandomAccessReader {
    type Item = StoreResult<ScannedRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let IndexedLine { offset, bytes } = match self.scan.read_indexed_line() {
                Ok(Some(line)) => line,
                Ok(None) => {
                    self.done = true;
                    break;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };
            self.line += 1;
            if bytes.trim_ascii().is_empty() {
                continue;
            }
            match self.scanned(offset, &bytes) {
                Ok(scanned) => return Some(Ok(scanned)),
                Err(e) => {
                    self.skipped += 1;
                    warn!(file = %self.label, line = self.line, error = %e, "skipping malformed record");
                }
            }
        }
        None
    }
}
