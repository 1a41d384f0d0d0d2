//! Stream Reader for archived dumps.

use super::{ScannedRecord, content};
use crate::error::{StoreError, StoreResult};
use crate::handle::Handle;
use crate::record;
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

/// Sequential scan yielding materialized records without offsets.
pub struct StreamReader {
    path: PathBuf,
    label: String,
    reader: Box<dyn BufRead + Send>,
    buf: Vec<u8>,
    line: u64,
    skipped: usize,
    done: bool,
}

impl std::fmt::Debug for StreamReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamReader")
            .field("path", &self.path)
            .field("line", &self.line)
            .finish()
    }
}

impl StreamReader {
    /// Opens a `.gz` archive, or a plain file for any other extension.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let file = File::open(path)?;
        let reader: Box<dyn BufRead + Send> =
            if path.extension().is_some_and(|e| e == "gz") {
                Box::new(BufReader::new(MultiGzDecoder::new(BufReader::new(file))))
            } else {
                Box::new(BufReader::new(file))
            };
        Ok(Self::from_reader(path, reader))
    }

    /// Scans an arbitrary byte stream; `path` is only used in log output.
    pub fn from_reader(path: &Path, reader: Box<dyn BufRead + Send>) -> Self {
        Self {
            path: path.to_path_buf(),
            label: path.to_string_lossy().into_owned(),
            reader,
            buf: Vec::new(),
            line: 0,
            skipped: 0,
            done: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    fn read_error(&self, e: io::Error) -> StoreError {
        match e.kind() {
            io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => {
                StoreError::CorruptArchive {
                    path: self.path.clone(),
                    reason: e.to_string(),
                }
            }
            _ => StoreError::Io { source: e },
        }
    }
}

impl Iterator for StreamReader {
    type Item = StoreResult<ScannedRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            self.buf.clear();
            match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => {
                    self.done = true;
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    self.done = true;
                    return Some(Err(self.read_error(e)));
                }
            }
            self.line += 1;
            let bytes = self.buf.strip_suffix(b"\n").unwrap_or(&self.buf[..]);
            let Some(bytes) = content(bytes) else { continue };
            match record::parse_line(&self.label, bytes) {
                Ok(parsed) => {
                    let record = Arc::new(parsed);
                    return Some(Ok(ScannedRecord {
                        handle: Handle::Materialized(Arc::clone(&record)),
                        record,
                        offset: None,
                        length: bytes.len(),
                        line: self.line,
                    }));
                }
                Err(e) => {
                    self.skipped += 1;
                    warn!(file = %self.label, line = self.line, error = %e, "skipping malformed record");
                }
            }
        }
        None
    }
}
