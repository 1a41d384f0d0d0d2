//! Date-partitioned write buffer.
//!
//! Records are grouped by their UTC creation day and written in batches to
//! `buffer/<prefix><yyyyMMdd>.txt`, one JSON object per line. Each partition is
//! flushed on its own once it holds `flush_threshold` records; `flush_all`
//! writes every partition in parallel.

use super::clock::Clock;
use super::naming::TXT_EXTENSION;
use crate::error::StoreResult;
use crate::record::{self, Record};
use dashmap::DashMap;
use rayon::prelude::*;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

const DAY_FORMAT: &str = "%Y%m%d";

/// In-memory partitions of pending records, keyed by `yyyyMMdd`.
pub struct DumpBuffer {
    partitions: DashMap<String, Vec<Record>>,
    dir: PathBuf,
    prefix: String,
    flush_threshold: usize,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for DumpBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DumpBuffer")
            .field("dir", &self.dir)
            .field("partitions", &self.partitions.len())
            .finish()
    }
}

impl DumpBuffer {
    pub fn new(
        dir: PathBuf,
        prefix: impl Into<String>,
        flush_threshold: usize,
        clock: Arc<dyn Clock>,
    ) -> StoreResult<Self> {
        fs::create_dir_all(&dir)?;
        Ok(Self {
            partitions: DashMap::new(),
            dir,
            prefix: prefix.into(),
            flush_threshold: flush_threshold.max(1),
            clock,
        })
    }

    /// Buffers `record` under today's partition, flushing it when full.
    pub fn push(&self, record: Record) -> StoreResult<()> {
        let day = self.clock.now().format(DAY_FORMAT).to_string();
        let mut partition = self.partitions.entry(day.clone()).or_default();
        partition.push(record);

        if partition.len() >= self.flush_threshold {
            let records = std::mem::take(&mut *partition);
            drop(partition); // release the shard lock before touching the disk
            self.flush_records(&day, &records)?;
        }
        Ok(())
    }

    /// Writes out every non-empty partition. Returns the number of records written.
    pub fn flush_all(&self) -> StoreResult<usize> {
        let days: Vec<String> = self.partitions.iter().map(|e| e.key().clone()).collect();

        let flushed: Vec<StoreResult<usize>> = days
            .par_iter()
            .map(|day| {
                let Some(mut partition) = self.partitions.get_mut(day) else {
                    return Ok(0);
                };
                if partition.is_empty() {
                    return Ok(0);
                }
                let records = std::mem::take(&mut *partition);
                drop(partition);
                self.flush_records(day, &records)?;
                Ok(records.len())
            })
            .collect();

        let mut total = 0;
        for result in flushed {
            total += result?;
        }
        Ok(total)
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Records held in memory, not yet flushed.
    pub fn buffered_count(&self) -> usize {
        self.partitions.iter().map(|e| e.value().len()).sum()
    }

    /// Number of shard files on disk.
    pub fn shard_count(&self) -> StoreResult<usize> {
        Ok(self.shard_names()?.len())
    }

    /// Reads and deletes the oldest shard file.
    ///
    /// Returns the shard's day and its records; malformed lines are logged and
    /// dropped.
    pub fn take_shard(&self) -> StoreResult<Option<(String, Vec<Record>)>> {
        let Some(name) = self.shard_names()?.into_iter().next() else {
            return Ok(None);
        };
        let path = self.dir.join(&name);
        let file_label = path.to_string_lossy().into_owned();
        let mut records = Vec::new();
        for line in BufReader::new(fs::File::open(&path)?).split(b'\n') {
            let line = line?;
            let line = line.strip_suffix(b"\r").unwrap_or(&line[..]);
            if line.trim_ascii().is_empty() {
                continue;
            }
            match record::parse_line(&file_label, line) {
                Ok(r) => records.push(r),
                Err(e) => warn!(error = %e, "skipping malformed buffered record"),
            }
        }
        fs::remove_file(&path)?;

        let day = name
            .strip_prefix(self.prefix.as_str())
            .and_then(|rest| rest.strip_suffix(TXT_EXTENSION))
            .unwrap_or_default()
            .to_string();
        debug!(path = %path.display(), records = records.len(), "buffer shard taken");
        Ok(Some((day, records)))
    }

    fn shard_names(&self) -> StoreResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if name.starts_with(&self.prefix) && name.ends_with(TXT_EXTENSION) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    fn flush_records(&self, day: &str, records: &[Record]) -> StoreResult<()> {
        let path = self.dir.join(format!("{}{day}{TXT_EXTENSION}", self.prefix));
        let mut batch = Vec::new();
        for r in records {
            batch.extend_from_slice(&record::to_line(r)?);
            batch.push(b'\n');
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(&batch)?;
        file.flush()?;
        debug!(path = %path.display(), records = records.len(), "buffer partition flushed");
        Ok(())
    }
}
