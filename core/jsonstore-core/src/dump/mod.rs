//! Append Log / Repository.
//!
//! A repository owns a directory root with four subdirectories:
//!
//! ```text
//! <root>/own/        records written by this process
//! <root>/import/     dumps received from elsewhere, pending indexing
//! <root>/imported/   import dumps already processed
//! <root>/buffer/     date-partitioned pending writes (see [`DumpBuffer`])
//! <root>/readme.txt  written once if configured
//! ```
//!
//! All writes go to the single current file in `own/`, whose name carries the
//! date suffix of the period it belongs to. When the suffix changes the next
//! write opens a new file. In compressed mode the old file is then gzipped on a
//! background thread.
//!
//! # Example
//!
//! ```rust
//! use jsonstore_core::config::RepositoryConfig;
//! use jsonstore_core::dump::Repository;
//! use jsonstore_core::record::record_of;
//! use serde_json::json;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let repo = Repository::open(RepositoryConfig::new(dir.path(), "users_")).unwrap();
//!
//! let record = record_of([("screen_name", json!("alice"))]);
//! let handle = repo.write(&record).unwrap();
//! assert_eq!(handle.record().unwrap(), record);
//! repo.close().unwrap();
//! ```

pub mod buffer;
pub mod clock;
pub mod convert;
pub mod naming;

pub use buffer::DumpBuffer;
pub use clock::{Clock, ManualClock, SystemClock};
pub use convert::{Conversion, Conversions, Direction};

use crate::config::{Mode, RepositoryConfig};
use crate::error::StoreResult;
use crate::handle::Handle;
use crate::reader::DumpReader;
use crate::record::{self, Opcode, Record};
use crate::storage::braf::BufferedRandomAccessFile;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const OWN_DIR: &str = "own";
pub const IMPORT_DIR: &str = "import";
pub const IMPORTED_DIR: &str = "imported";
pub const BUFFER_DIR: &str = "buffer";
pub const README_FILE: &str = "readme.txt";

struct CurrentDump {
    suffix: String,
    file: Arc<BufferedRandomAccessFile>,
}

/// Append log over the four-directory layout.
///
/// # Thread Safety
///
/// `Repository` is `Send + Sync`. Writes are serialized on the current-file
/// lock; listing and shifting only touch the file system.
pub struct Repository {
    config: RepositoryConfig,
    own_dir: PathBuf,
    import_dir: PathBuf,
    imported_dir: PathBuf,
    clock: Arc<dyn Clock>,
    current: Mutex<Option<CurrentDump>>,
    conversions: Conversions,
    buffer: DumpBuffer,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("root", &self.config.root)
            .field("prefix", &self.config.prefix)
            .field("mode", &self.config.mode)
            .finish()
    }
}

impl Repository {
    /// Opens a repository on the system clock.
    pub fn open(config: RepositoryConfig) -> StoreResult<Self> {
        Self::open_with_clock(config, Arc::new(SystemClock))
    }

    /// Opens a repository.
    ///
    /// Creates missing directories, writes the readme, starts background
    /// conversion of every non-current dump stored in the wrong format and
    /// reopens this period's current file if one exists.
    pub fn open_with_clock(config: RepositoryConfig, clock: Arc<dyn Clock>) -> StoreResult<Self> {
        config.validate()?;
        let own_dir = config.root.join(OWN_DIR);
        let import_dir = config.root.join(IMPORT_DIR);
        let imported_dir = config.root.join(IMPORTED_DIR);
        let buffer_dir = config.root.join(BUFFER_DIR);
        for dir in [&own_dir, &import_dir, &imported_dir] {
            fs::create_dir_all(dir)?;
        }
        if let Some(readme) = &config.readme {
            let path = config.root.join(README_FILE);
            if !path.exists() {
                fs::write(&path, readme)?;
            }
        }
        let buffer = DumpBuffer::new(
            buffer_dir,
            config.prefix.clone(),
            config.buffer_flush_threshold,
            Arc::clone(&clock),
        )?;

        let repo = Self {
            own_dir,
            import_dir,
            imported_dir,
            clock,
            current: Mutex::new(None),
            conversions: Conversions::new(),
            buffer,
            config,
        };

        let suffix = repo.suffix();
        for dir in [&repo.own_dir, &repo.import_dir] {
            repo.schedule_conversions(dir, &suffix)?;
        }
        if let Some(path) = repo.find_current(&suffix)? {
            let file = BufferedRandomAccessFile::open(&path, repo.config.buffer_size)?;
            *repo.current.lock() = Some(CurrentDump {
                suffix,
                file: Arc::new(file),
            });
        }

        info!(
            root = %repo.config.root.display(),
            prefix = %repo.config.prefix,
            mode = repo.config.mode.as_str(),
            current = ?repo.current_dump_path(),
            pending_conversions = repo.conversions.pending(),
            "repository opened"
        );
        Ok(repo)
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    pub fn mode(&self) -> Mode {
        self.config.mode
    }

    pub fn own_dir(&self) -> &Path {
        &self.own_dir
    }

    pub fn import_dir(&self) -> &Path {
        &self.import_dir
    }

    pub fn imported_dir(&self) -> &Path {
        &self.imported_dir
    }

    /// The date-partitioned buffer extension.
    pub fn buffer(&self) -> &DumpBuffer {
        &self.buffer
    }

    /// Path of the current file, if one has been opened or created.
    pub fn current_dump_path(&self) -> Option<PathBuf> {
        self.current
            .lock()
            .as_ref()
            .map(|c| c.file.path().to_path_buf())
    }

    /// Appends `record` unchanged.
    ///
    /// Rewritable mode returns a lazy handle. Compressed mode returns a
    /// materialized one, since the file will be gzipped once it stops being
    /// current.
    pub fn write(&self, record: &Record) -> StoreResult<Handle> {
        let line = record::to_line(record)?;
        self.append(line, || record.clone())
    }

    /// Appends `record` with `$P` set to `opcode` as its first field.
    pub fn write_with_opcode(&self, record: &Record, opcode: Opcode) -> StoreResult<Handle> {
        let tagged = record::with_opcode(record, opcode);
        let line = record::to_line(&tagged)?;
        self.append(line, move || tagged)
    }

    fn append(&self, line: Vec<u8>, materialize: impl FnOnce() -> Record) -> StoreResult<Handle> {
        let suffix = self.suffix();
        let mut current = self.current.lock();
        let file = match current.as_ref() {
            Some(dump) if dump.suffix == suffix => Arc::clone(&dump.file),
            _ => self.rotate(&mut current, suffix)?,
        };
        let offset = file.append_line(&line)?;
        drop(current);

        Ok(match self.config.mode {
            Mode::Rewritable => Handle::lazy(file, offset, line.len()),
            Mode::Compressed => Handle::materialized(materialize()),
        })
    }

    fn rotate(
        &self,
        current: &mut Option<CurrentDump>,
        suffix: String,
    ) -> StoreResult<Arc<BufferedRandomAccessFile>> {
        // after close() this period's file may already exist
        let path = match self.find_current(&suffix)? {
            Some(existing) => existing,
            None => self
                .own_dir
                .join(naming::dump_file_name(&self.config.prefix, &suffix)),
        };
        let file = Arc::new(BufferedRandomAccessFile::open(&path, self.config.buffer_size)?);
        let previous = current.replace(CurrentDump {
            suffix,
            file: Arc::clone(&file),
        });

        match previous {
            Some(old) => {
                let old_path = old.file.path().to_path_buf();
                old.file.sync()?;
                info!(from = %old_path.display(), to = %path.display(), "dump rotated");
                if self.config.mode == Mode::Compressed {
                    drop(old);
                    self.conversions.spawn(old_path, Direction::Compress)?;
                }
            }
            None => debug!(path = %path.display(), "dump created"),
        }
        Ok(file)
    }

    /// Reads a dump file as a stream of records.
    pub fn iterate(&self, path: &Path) -> StoreResult<DumpReader> {
        DumpReader::open(self, path)
    }

    /// A BRAF for `path`. The current file is shared with the writer, so lazy
    /// handles into it and appends go through the same lock.
    pub fn open_file(&self, path: &Path) -> StoreResult<Arc<BufferedRandomAccessFile>> {
        if let Some(current) = self.current.lock().as_ref() {
            if current.file.path() == path {
                return Ok(Arc::clone(&current.file));
            }
        }
        Ok(Arc::new(BufferedRandomAccessFile::open_read_only(
            path,
            self.config.buffer_size,
        )?))
    }

    /// The `count` newest dumps in `own/`, oldest first.
    pub fn get_own_dumps(&self, count: usize) -> StoreResult<BTreeSet<PathBuf>> {
        self.list_dumps(&self.own_dir, count)
    }

    /// The `count` newest dumps in `import/`, oldest first.
    pub fn get_import_dumps(&self, count: usize) -> StoreResult<BTreeSet<PathBuf>> {
        self.list_dumps(&self.import_dir, count)
    }

    /// The `count` newest dumps in `imported/`, oldest first.
    pub fn get_imported_dumps(&self, count: usize) -> StoreResult<BTreeSet<PathBuf>> {
        self.list_dumps(&self.imported_dir, count)
    }

    fn list_dumps(&self, dir: &Path, count: usize) -> StoreResult<BTreeSet<PathBuf>> {
        let mut all = BTreeSet::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name();
            if naming::is_dump_name(&name.to_string_lossy(), &self.config.prefix) {
                all.insert(entry.path());
            }
        }
        let skip = all.len().saturating_sub(count);
        Ok(all.into_iter().skip(skip).collect())
    }

    /// Moves `import/<name>` to `imported/<name>`.
    ///
    /// Returns `false` if the source does not exist.
    pub fn shift_processed_dump(&self, name: &str) -> StoreResult<bool> {
        let source = self.import_dir.join(name);
        if !source.exists() {
            return Ok(false);
        }
        let dest = self.imported_dir.join(name);
        fs::rename(&source, &dest)?;
        info!(from = %source.display(), to = %dest.display(), "import dump shifted");
        Ok(true)
    }

    /// Shifts every import dump. Returns how many were moved.
    pub fn shift_processed_dumps(&self) -> StoreResult<usize> {
        let mut shifted = 0;
        for path in self.get_import_dumps(usize::MAX)? {
            let Some(name) = path.file_name() else { continue };
            if self.shift_processed_dump(&name.to_string_lossy())? {
                shifted += 1;
            }
        }
        Ok(shifted)
    }

    /// Blocks until every background conversion started so far has finished.
    pub fn await_conversions(&self) -> Vec<Conversion> {
        self.conversions.await_all()
    }

    /// Flushes the buffer extension, waits for conversions, syncs and releases
    /// the current file. A later write reopens it.
    pub fn close(&self) -> StoreResult<()> {
        self.buffer.flush_all()?;
        self.await_conversions();
        if let Some(current) = self.current.lock().take() {
            current.file.sync()?;
            info!(path = %current.file.path().display(), "repository closed");
        }
        Ok(())
    }

    fn suffix(&self) -> String {
        naming::date_suffix(self.clock.now(), self.config.rotation)
    }

    fn find_current(&self, suffix: &str) -> StoreResult<Option<PathBuf>> {
        let mut found = None;
        for path in self.list_dumps(&self.own_dir, usize::MAX)? {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if naming::is_current(&name, &self.config.prefix, suffix) {
                // the sort makes the last match win
                found = Some(path);
            }
        }
        Ok(found)
    }

    fn schedule_conversions(&self, dir: &Path, suffix: &str) -> StoreResult<()> {
        for path in self.list_dumps(dir, usize::MAX)? {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let direction = match (self.config.mode, naming::is_archive(&name)) {
                (Mode::Compressed, false) if !naming::is_current(&name, &self.config.prefix, suffix) => {
                    Direction::Compress
                }
                (Mode::Rewritable, true) => Direction::Decompress,
                _ => continue,
            };
            debug!(path = %path.display(), ?direction, "scheduling dump conversion");
            if let Err(e) = self.conversions.spawn(path.clone(), direction) {
                warn!(path = %path.display(), error = %e, "could not start dump conversion");
            }
        }
        Ok(())
    }
}

impl Drop for Repository {
    fn drop(&mut self) {
        self.conversions.await_all();
    }
}
