//! Background mode conversion of non-current dump files.
//!
//! Jobs run on their own threads and report through the log only. The join
//! handles are kept so the owner can wait for them.

use super::naming;
use crate::error::{StoreError, StoreResult};
use crate::storage::compression::{self, CompressionLevel};
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use tracing::{error, info, warn};

/// Outcome of one conversion job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conversion {
    /// `x.txt` became `x.txt.gz`
    Compressed(PathBuf),
    /// `x.txt.gz` became `x.txt`
    Decompressed(PathBuf),
    /// The archive could not be inflated and was renamed to this path
    Invalidated(PathBuf),
    /// Nothing was done (destination exists or the job failed)
    Skipped(PathBuf),
}

/// gzip `path` to `path.gz` and delete the source.
pub fn compress_dump(path: &Path) -> StoreResult<Conversion> {
    let dest = append_to_name(path, naming::GZ_EXTENSION);
    if dest.exists() {
        warn!(path = %path.display(), "archive already exists, not compressing");
        return Ok(Conversion::Skipped(path.to_path_buf()));
    }
    info!(path = %path.display(), "compressing dump");
    compression::gzip_file(path, &dest, CompressionLevel::Best)?;
    info!(path = %dest.display(), "dump compressed");
    Ok(Conversion::Compressed(dest))
}

/// Inflate `path.gz` to `path` and delete the archive. An archive that fails
/// to inflate is renamed to `<name>.invalid`.
pub fn decompress_dump(path: &Path) -> StoreResult<Conversion> {
    let name = file_name(path);
    let Some(plain) = naming::plain_name(&name) else {
        return Ok(Conversion::Skipped(path.to_path_buf()));
    };
    let dest = path.with_file_name(plain);
    if dest.exists() {
        warn!(path = %path.display(), "plain dump already exists, not decompressing");
        return Ok(Conversion::Skipped(path.to_path_buf()));
    }
    info!(path = %path.display(), "decompressing dump");
    match compression::gunzip_file(path, &dest) {
        Ok(()) => {
            info!(path = %dest.display(), "dump decompressed");
            Ok(Conversion::Decompressed(dest))
        }
        Err(StoreError::CorruptArchive { reason, .. }) => {
            let invalid = path.with_file_name(naming::invalid_name(&name));
            fs::rename(path, &invalid)?;
            error!(
                path = %path.display(),
                renamed = %invalid.display(),
                reason = %reason,
                "corrupt archive excluded from further processing"
            );
            Ok(Conversion::Invalidated(invalid))
        }
        Err(e) => Err(e),
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn append_to_name(path: &Path, extension: &str) -> PathBuf {
    path.with_file_name(format!("{}{extension}", file_name(path)))
}

/// Which direction a background job converts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Compress,
    Decompress,
}

/// Join handles of the background jobs a repository started.
#[derive(Debug, Default)]
pub struct Conversions {
    jobs: Mutex<Vec<JoinHandle<Conversion>>>,
}

impl Conversions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts converting `path` on a new thread.
    pub fn spawn(&self, path: PathBuf, direction: Direction) -> StoreResult<()> {
        let job = thread::Builder::new()
            .name("jsonstore-convert".into())
            .spawn(move || {
                let result = match direction {
                    Direction::Compress => compress_dump(&path),
                    Direction::Decompress => decompress_dump(&path),
                };
                result.unwrap_or_else(|e| {
                    error!(path = %path.display(), error = %e, "dump conversion failed");
                    Conversion::Skipped(path)
                })
            })?;
        self.jobs.lock().push(job);
        Ok(())
    }

    /// Number of jobs not yet awaited.
    pub fn pending(&self) -> usize {
        self.jobs.lock().len()
    }

    /// Blocks until every job started so far has finished.
    pub fn await_all(&self) -> Vec<Conversion> {
        let jobs = std::mem::take(&mut *self.jobs.lock());
        jobs.into_iter()
            .filter_map(|job| match job.join() {
                Ok(outcome) => Some(outcome),
                Err(_) => {
                    error!("dump conversion thread panicked");
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::compression::gzip_bytes;
    use tempfile::tempdir;

    #[test]
    fn test_compress_then_decompress() {
        let dir = tempdir().unwrap();
        let txt = dir.path().join("u_202601_00000001.txt");
        fs::write(&txt, b"{\"a\":1}\n").unwrap();

        let gz = match compress_dump(&txt).unwrap() {
            Conversion::Compressed(p) => p,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(gz, dir.path().join("u_202601_00000001.txt.gz"));
        assert!(!txt.exists());

        assert_eq!(
            decompress_dump(&gz).unwrap(),
            Conversion::Decompressed(txt.clone())
        );
        assert_eq!(fs::read(&txt).unwrap(), b"{\"a\":1}\n");
    }

    #[test]
    fn test_corrupt_archive_is_renamed_invalid() {
        let dir = tempdir().unwrap();
        let gz = dir.path().join("u_202601_00000002.txt.gz");
        fs::write(&gz, b"this is not gzip at all").unwrap();

        let outcome = decompress_dump(&gz).unwrap();
        let invalid = dir.path().join("u_202601_00000002.txt.gz.invalid");
        assert_eq!(outcome, Conversion::Invalidated(invalid.clone()));
        assert!(invalid.exists());
        assert!(!gz.exists());
        assert!(!dir.path().join("u_202601_00000002.txt").exists());
    }

    #[test]
    fn test_existing_destination_is_left_alone() {
        let dir = tempdir().unwrap();
        let txt = dir.path().join("u_1.txt");
        let gz = dir.path().join("u_1.txt.gz");
        fs::write(&txt, b"{}\n").unwrap();
        fs::write(&gz, gzip_bytes(b"{}\n", CompressionLevel::Fast).unwrap()).unwrap();

        assert_eq!(compress_dump(&txt).unwrap(), Conversion::Skipped(txt.clone()));
        assert!(txt.exists());
    }

    #[test]
    fn test_background_jobs_are_awaited() {
        let dir = tempdir().unwrap();
        let conversions = Conversions::new();
        for i in 0..4 {
            let path = dir.path().join(format!("u_2026010{i}_0000000{i}.txt"));
            fs::write(&path, format!("{{\"i\":{i}}}\n")).unwrap();
            conversions.spawn(path, Direction::Compress).unwrap();
        }
        let outcomes = conversions.await_all();
        assert_eq!(outcomes.len(), 4);
        assert!(outcomes.iter().all(|o| matches!(o, Conversion::Compressed(_))));
        assert_eq!(conversions.pending(), 0);
    }
}
