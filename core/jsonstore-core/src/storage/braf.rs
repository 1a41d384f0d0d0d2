//! Buffered Random-Access File.
//!
//! A single read buffer over an owned [`File`], with sequential byte and line
//! reads, append, and offset-addressed random reads. Every operation takes the
//! same lock, so a sequential scan and random reads from other threads never
//! see a half-updated buffer.
//!
//! # Buffer window
//!
//! `real_pos` is the file offset just past the last buffered byte and equals the
//! OS file position at all times. The buffered window is therefore
//! `[real_pos - buf_end, real_pos)` and the logical cursor is
//! `real_pos - buf_end + buf_pos`. Seeking inside the window only moves
//! `buf_pos`; anything else is a real seek that drops the buffer.

use crate::error::StoreResult;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// A line together with the file offset of its first byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedLine {
    pub offset: u64,
    pub bytes: Vec<u8>,
}

struct Inner {
    file: File,
    buffer: Box<[u8]>,
    buf_end: usize,
    buf_pos: usize,
    real_pos: u64,
}

impl Inner {
    fn file_pointer(&self) -> u64 {
        self.real_pos - self.buf_end as u64 + self.buf_pos as u64
    }

    fn fill_buffer(&mut self) -> io::Result<usize> {
        let n = loop {
            match self.file.read(&mut self.buffer) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        };
        self.real_pos += n as u64;
        self.buf_end = n;
        self.buf_pos = 0;
        Ok(n)
    }

    fn seek(&mut self, pos: u64) -> io::Result<()> {
        let window_start = self.real_pos - self.buf_end as u64;
        if pos >= window_start && pos <= self.real_pos {
            self.buf_pos = (pos - window_start) as usize;
        } else {
            self.file.seek(SeekFrom::Start(pos))?;
            self.real_pos = pos;
            self.buf_end = 0;
            self.buf_pos = 0;
        }
        Ok(())
    }

    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        if self.buf_pos >= self.buf_end && self.fill_buffer()? == 0 {
            return Ok(None);
        }
        let b = self.buffer[self.buf_pos];
        self.buf_pos += 1;
        Ok(Some(b))
    }

    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let mut copied = 0;
        while copied < out.len() {
            if self.buf_pos >= self.buf_end && self.fill_buffer()? == 0 {
                break;
            }
            let n = (self.buf_end - self.buf_pos).min(out.len() - copied);
            out[copied..copied + n].copy_from_slice(&self.buffer[self.buf_pos..self.buf_pos + n]);
            self.buf_pos += n;
            copied += n;
        }
        Ok(copied)
    }

    fn read_line(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut line: Option<Vec<u8>> = None;
        loop {
            if self.buf_pos >= self.buf_end && self.fill_buffer()? == 0 {
                // EOF: a final line without terminator is still a line
                return Ok(line.map(strip_cr));
            }
            let window = &self.buffer[self.buf_pos..self.buf_end];
            match window.iter().position(|&b| b == b'\n') {
                Some(i) => {
                    let acc = line.get_or_insert_with(Vec::new);
                    acc.extend_from_slice(&window[..i]);
                    self.buf_pos += i + 1;
                    return Ok(line.map(strip_cr));
                }
                None => {
                    line.get_or_insert_with(Vec::new).extend_from_slice(window);
                    self.buf_pos = self.buf_end;
                }
            }
        }
    }

    fn append_line(&mut self, payload: &[u8]) -> io::Result<u64> {
        let offset = self.file.seek(SeekFrom::End(0))?;
        let mut line = Vec::with_capacity(payload.len() + 1);
        line.extend_from_slice(payload);
        line.push(b'\n');
        let written = write_or_rollback(&mut self.file, &line, offset, |f, len| f.set_len(len));
        // restore the OS position so the buffer window stays valid
        self.file.seek(SeekFrom::Start(self.real_pos))?;
        written?;
        Ok(offset)
    }
}

/// Writes `line` at end of file. If the write fails, the file is cut back to
/// `end` so the next append does not glue onto a partial line. The write error
/// is returned either way.
fn write_or_rollback<W: Write>(
    out: &mut W,
    line: &[u8],
    end: u64,
    truncate: impl FnOnce(&mut W, u64) -> io::Result<()>,
) -> io::Result<()> {
    let Err(e) = out.write_all(line) else {
        return Ok(());
    };
    if let Err(cut) = truncate(out, end) {
        warn!(end, error = %cut, "could not roll back failed append");
    }
    Err(e)
}

fn strip_cr(mut line: Vec<u8>) -> Vec<u8> {
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    line
}

/// Buffered, lock-protected random-access file.
///
/// # Thread Safety
///
/// All methods take `&self`; share it across threads with `Arc`.
pub struct BufferedRandomAccessFile {
    path: PathBuf,
    writable: bool,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for BufferedRandomAccessFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferedRandomAccessFile")
            .field("path", &self.path)
            .field("writable", &self.writable)
            .finish()
    }
}

impl BufferedRandomAccessFile {
    /// Opens (creating if needed) a file for reading and appending.
    pub fn open(path: &Path, buffer_size: usize) -> StoreResult<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        Ok(Self::from_file(path, file, buffer_size, true))
    }

    /// Opens an existing file for reading only.
    pub fn open_read_only(path: &Path, buffer_size: usize) -> StoreResult<Self> {
        let file = File::open(path)?;
        Ok(Self::from_file(path, file, buffer_size, false))
    }

    fn from_file(path: &Path, file: File, buffer_size: usize, writable: bool) -> Self {
        Self {
            path: path.to_path_buf(),
            writable,
            inner: Mutex::new(Inner {
                file,
                buffer: vec![0u8; buffer_size.max(1)].into_boxed_slice(),
                buf_end: 0,
                buf_pos: 0,
                real_pos: 0,
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Reads one byte at the cursor; `None` at EOF.
    pub fn read_byte(&self) -> StoreResult<Option<u8>> {
        Ok(self.inner.lock().read_byte()?)
    }

    /// Fills `out` from the cursor and returns the number of bytes read
    /// (less than `out.len()` only at EOF).
    pub fn read(&self, out: &mut [u8]) -> StoreResult<usize> {
        Ok(self.inner.lock().read(out)?)
    }

    /// Reads the next line without its terminator; `None` at EOF.
    ///
    /// Lines end at `\n`; a `\r` right before it belongs to the terminator.
    pub fn read_line(&self) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.inner.lock().read_line()?)
    }

    /// Like [`read_line`](Self::read_line), with the offset of the line's first byte.
    pub fn read_indexed_line(&self) -> StoreResult<Option<IndexedLine>> {
        let mut inner = self.inner.lock();
        let offset = inner.file_pointer();
        Ok(inner
            .read_line()?
            .map(|bytes| IndexedLine { offset, bytes }))
    }

    /// Appends `payload` plus `\n` at end of file and returns the offset at
    /// which `payload` starts. The read cursor is left untouched.
    pub fn append_line(&self, payload: &[u8]) -> StoreResult<u64> {
        Ok(self.inner.lock().append_line(payload)?)
    }

    /// Reads `out.len()` bytes starting at `offset` and returns how many were
    /// available. The read cursor is left untouched.
    pub fn read_at(&self, out: &mut [u8], offset: u64) -> StoreResult<usize> {
        let mut inner = self.inner.lock();
        let cursor = inner.file_pointer();
        inner.seek(offset)?;
        let read = inner.read(out);
        inner.seek(cursor)?;
        Ok(read?)
    }

    /// Moves the read cursor.
    pub fn seek(&self, pos: u64) -> StoreResult<()> {
        Ok(self.inner.lock().seek(pos)?)
    }

    /// Current read cursor.
    pub fn file_pointer(&self) -> u64 {
        self.inner.lock().file_pointer()
    }

    pub fn len(&self) -> StoreResult<u64> {
        Ok(self.inner.lock().file.metadata()?.len())
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// fsync.
    pub fn sync(&self) -> StoreResult<()> {
        Ok(self.inner.lock().file.sync_all()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn test_lines(count: usize) -> Vec<String> {
        (0..count)
            .map(|i| format!("{{\"{}\":\"X\"}}", i.wrapping_mul(2654435761)))
            .collect()
    }

    fn write_lines(path: &Path, lines: &[String]) {
        let mut text = String::new();
        for l in lines {
            text.push_str(l);
            text.push('\n');
        }
        std::fs::write(path, text).unwrap();
    }

    #[test]
    fn test_sequential_then_random_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("lines.txt");
        let lines = test_lines(5_000);
        write_lines(&path, &lines);

        // small buffer forces many refills and lines spanning buffer edges
        let braf = BufferedRandomAccessFile::open(&path, 97).unwrap();
        let mut positions = HashMap::new();
        for expected in &lines {
            let line = braf.read_indexed_line().unwrap().unwrap();
            assert_eq!(line.bytes, expected.as_bytes());
            positions.insert(line.offset, expected.clone());
        }
        assert!(braf.read_line().unwrap().is_none());

        for (offset, expected) in &positions {
            let mut buf = vec![0u8; expected.len()];
            assert_eq!(braf.read_at(&mut buf, *offset).unwrap(), expected.len());
            assert_eq!(buf, expected.as_bytes());
        }
    }

    #[test]
    fn test_crlf_and_missing_final_newline() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("crlf.txt");
        std::fs::write(&path, b"{\"a\":1}\r\n\n{\"b\":2}").unwrap();

        let braf = BufferedRandomAccessFile::open_read_only(&path, 4).unwrap();
        assert_eq!(braf.read_line().unwrap().unwrap(), b"{\"a\":1}");
        assert_eq!(braf.read_line().unwrap().unwrap(), b"");
        let last = braf.read_indexed_line().unwrap().unwrap();
        assert_eq!(last.bytes, b"{\"b\":2}");
        assert_eq!(last.offset, 10);
        assert!(braf.read_line().unwrap().is_none());
    }

    #[test]
    fn test_lone_cr_is_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cr.txt");
        std::fs::write(&path, b"a\rb\n").unwrap();

        let braf = BufferedRandomAccessFile::open_read_only(&path, 16).unwrap();
        assert_eq!(braf.read_line().unwrap().unwrap(), b"a\rb");
    }

    #[test]
    fn test_append_returns_payload_offset() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("append.txt");
        let braf = BufferedRandomAccessFile::open(&path, 64).unwrap();

        let first = braf.append_line(b"{\"a\":1}").unwrap();
        let second = braf.append_line(b"{\"a\":2}").unwrap();
        assert_eq!(first, 0);
        assert_eq!(second, 8);
        assert_eq!(braf.len().unwrap(), 16);

        let mut buf = [0u8; 7];
        braf.read_at(&mut buf, second).unwrap();
        assert_eq!(&buf, b"{\"a\":2}");
        assert_eq!(std::fs::read(&path).unwrap(), b"{\"a\":1}\n{\"a\":2}\n");
    }

    #[test]
    fn test_append_during_scan_keeps_cursor() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scan.txt");
        write_lines(&path, &test_lines(3));
        let braf = BufferedRandomAccessFile::open(&path, 8).unwrap();

        let first = braf.read_line().unwrap().unwrap();
        let cursor = braf.file_pointer();
        braf.append_line(b"{\"late\":true}").unwrap();
        assert_eq!(braf.file_pointer(), cursor);

        let mut rest = Vec::new();
        while let Some(l) = braf.read_line().unwrap() {
            rest.push(l);
        }
        assert_ne!(first, rest[0]);
        assert_eq!(rest.len(), 3);
        assert_eq!(rest[2], b"{\"late\":true}");
    }

    /// Accepts `room` bytes, then fails like a full disk.
    struct FullDisk {
        data: Vec<u8>,
        room: usize,
    }

    impl Write for FullDisk {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = buf.len().min(self.room - self.data.len());
            if n == 0 {
                return Err(io::Error::new(io::ErrorKind::StorageFull, "no space left"));
            }
            self.data.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_failed_write_is_rolled_back() {
        let mut disk = FullDisk {
            data: b"{\"a\":1}\n".to_vec(),
            room: 13,
        };
        let end = disk.data.len() as u64;
        let cut = |d: &mut FullDisk, len: u64| -> io::Result<()> {
            d.data.truncate(len as usize);
            Ok(())
        };

        let err = write_or_rollback(&mut disk, b"{\"b\":2}\n", end, cut).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::StorageFull);
        assert_eq!(disk.data, b"{\"a\":1}\n");

        disk.room = 64;
        write_or_rollback(&mut disk, b"{\"c\":3}\n", end, cut).unwrap();
        assert_eq!(disk.data, b"{\"a\":1}\n{\"c\":3}\n");
    }

    #[test]
    fn test_append_io_error_is_returned() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ro.txt");
        std::fs::write(&path, b"{\"a\":1}\n").unwrap();
        let braf = BufferedRandomAccessFile::open_read_only(&path, 16).unwrap();

        let err = braf.append_line(b"{\"b\":2}").unwrap_err();
        assert!(matches!(err, crate::error::StoreError::Io { .. }));
        assert_eq!(std::fs::read(&path).unwrap(), b"{\"a\":1}\n");
        assert_eq!(braf.read_line().unwrap().unwrap(), b"{\"a\":1}");
    }

    #[test]
    fn test_read_at_keeps_cursor() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cursor.txt");
        let lines = test_lines(50);
        write_lines(&path, &lines);
        let braf = BufferedRandomAccessFile::open_read_only(&path, 32).unwrap();

        braf.read_line().unwrap();
        let cursor = braf.file_pointer();
        let mut buf = [0u8; 4];
        braf.read_at(&mut buf, 500).unwrap();
        assert_eq!(braf.file_pointer(), cursor);
        assert_eq!(braf.read_line().unwrap().unwrap(), lines[1].as_bytes());
    }

    #[test]
    fn test_read_bytes_and_short_read_at_eof() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bytes.txt");
        std::fs::write(&path, b"abc").unwrap();
        let braf = BufferedRandomAccessFile::open_read_only(&path, 2).unwrap();

        assert_eq!(braf.read_byte().unwrap(), Some(b'a'));
        let mut buf = [0u8; 5];
        assert_eq!(braf.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"bc");
        assert_eq!(braf.read_byte().unwrap(), None);

        braf.seek(1).unwrap();
        assert_eq!(braf.read_byte().unwrap(), Some(b'b'));
    }

    #[test]
    fn test_concurrent_random_reads_during_scan() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("concurrent.txt");
        let lines = test_lines(2_000);
        write_lines(&path, &lines);

        let braf = Arc::new(BufferedRandomAccessFile::open(&path, 128).unwrap());
        let mut offsets = Vec::new();
        let mut pos = 0u64;
        for l in &lines {
            offsets.push((pos, l.clone()));
            pos += l.len() as u64 + 1;
        }
        let offsets = Arc::new(offsets);

        let readers: Vec<_> = (0..4)
            .map(|t| {
                let braf = Arc::clone(&braf);
                let offsets = Arc::clone(&offsets);
                std::thread::spawn(move || {
                    for (offset, expected) in offsets.iter().skip(t).step_by(4) {
                        let mut buf = vec![0u8; expected.len()];
                        braf.read_at(&mut buf, *offset).unwrap();
                        assert_eq!(buf, expected.as_bytes());
                    }
                })
            })
            .collect();

        let mut scanned = 0;
        while let Some(line) = braf.read_line().unwrap() {
            assert_eq!(line, lines[scanned].as_bytes());
            scanned += 1;
        }
        for r in readers {
            r.join().unwrap();
        }
        assert_eq!(scanned, lines.len());
    }

    proptest! {
        #[test]
        fn prop_lines_survive_any_buffer_size(
            lines in prop::collection::vec("[a-z0-9{}:\", ]{0,40}", 1..40),
            buffer_size in 1usize..64,
        ) {
            let dir = tempdir().unwrap();
            let path = dir.path().join("prop.txt");
            let braf = BufferedRandomAccessFile::open(&path, buffer_size).unwrap();
            let mut offsets = Vec::new();
            for l in &lines {
                offsets.push(braf.append_line(l.as_bytes()).unwrap());
            }
            for (l, offset) in lines.iter().zip(&offsets) {
                let line = braf.read_indexed_line().unwrap().unwrap();
                prop_assert_eq!(line.offset, *offset);
                prop_assert_eq!(line.bytes, l.as_bytes().to_vec());
            }
            prop_assert!(braf.read_line().unwrap().is_none());
        }
    }
}
