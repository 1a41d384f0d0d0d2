//! gzip helpers for capsules and dump archives.
//!
//! Whole-file conversions always write to a temporary file in the destination
//! directory and rename it into place, so a concurrent directory listing sees
//! either the source, or the source and the complete destination, never a
//! partial destination. The source is removed only after the rename.
//!
//! # Example
//!
//! ```rust
//! use jsonstore_core::storage::compression::{CompressionLevel, gunzip_bytes, gzip_bytes};
//!
//! let packed = gzip_bytes(b"{\"0\":\"hello\"}", CompressionLevel::Best).unwrap();
//! assert_eq!(gunzip_bytes(&packed).unwrap(), b"{\"0\":\"hello\"}");
//! ```

use crate::error::{StoreError, StoreResult};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use tempfile::Builder;

/// gzip effort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompressionLevel {
    /// Fastest deflate setting.
    Fast,
    /// zlib's default (6).
    #[default]
    Default,
    /// Smallest output (9). Used for capsules and archived dumps.
    Best,
}

impl CompressionLevel {
    fn to_flate2(self) -> Compression {
        match self {
            Self::Fast => Compression::fast(),
            Self::Default => Compression::default(),
            Self::Best => Compression::best(),
        }
    }
}

impl std::fmt::Display for CompressionLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fast => write!(f, "fast"),
            Self::Default => write!(f, "default"),
            Self::Best => write!(f, "best"),
        }
    }
}

/// gzip a byte slice in memory.
pub fn gzip_bytes(data: &[u8], level: CompressionLevel) -> StoreResult<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2 + 32), level.to_flate2());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Inflate a gzip byte slice in memory.
pub fn gunzip_bytes(data: &[u8]) -> StoreResult<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::with_capacity(data.len() * 4);
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Compress `source` into `dest`, then delete `source`.
pub fn gzip_file(source: &Path, dest: &Path, level: CompressionLevel) -> StoreResult<()> {
    let input = BufReader::new(File::open(source)?);
    convert(input, dest, |mut reader, tmp| {
        let mut encoder = GzEncoder::new(BufWriter::new(tmp), level.to_flate2());
        io::copy(&mut reader, &mut encoder)?;
        encoder.finish()?.flush()
    })?;
    fs::remove_file(source)?;
    Ok(())
}

/// Inflate `source` into `dest`, then delete `source`.
///
/// Inflate failures are reported as [`StoreError::CorruptArchive`]; the
/// temporary output is discarded and `source` is left in place.
pub fn gunzip_file(source: &Path, dest: &Path) -> StoreResult<()> {
    let input = GzDecoder::new(BufReader::new(File::open(source)?));
    convert(input, dest, |mut reader, tmp| {
        let mut writer = BufWriter::new(tmp);
        io::copy(&mut reader, &mut writer)?;
        writer.flush()
    })
    .map_err(|e| match e {
        StoreError::Io { source: err } if is_inflate_error(&err) => StoreError::CorruptArchive {
            path: source.to_path_buf(),
            reason: err.to_string(),
        },
        other => other,
    })?;
    fs::remove_file(source)?;
    Ok(())
}

fn is_inflate_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof
    )
}

fn convert<R, F>(reader: R, dest: &Path, copy: F) -> StoreResult<()>
where
    F: FnOnce(R, &mut File) -> io::Result<()>,
{
    let dir = dest.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = Builder::new().prefix(".convert-").tempfile_in(dir)?;
    copy(reader, tmp.as_file_mut())?;
    tmp.as_file().sync_all()?;
    // drops (and removes) the temp file on failure
    tmp.persist(dest).map_err(|e| StoreError::Io { source: e.error })?;
    Ok(())
}
