//! Dataset: a repository plus in-memory indexes over its records.
//!
//! Opening a dataset replays every dump in `own/` through the parallel
//! [`indexer`] and, unless disabled, appends every record found in `import/`
//! to the own log before shifting the import files to `imported/`.
//!
//! # Storage per mode
//!
//! | Mode         | Index value                                    |
//! |--------------|------------------------------------------------|
//! | `Rewritable` | lazy handle: `(file, offset, length)`          |
//! | `Compressed` | capsule of the record, meta keys stripped      |
//!
//! # Example
//!
//! ```rust
//! use jsonstore_core::config::Column;
//! use jsonstore_core::dataset::Dataset;
//! use jsonstore_core::record::record_of;
//! use serde_json::json;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let columns = vec![Column::case_insensitive("screen_name")];
//! let users = Dataset::open(dir.path(), "users_", columns).unwrap();
//!
//! users.put_unique(&record_of([("screen_name", json!("Alice")), ("followers", json!(3))])).unwrap();
//! let alice = users.get("screen_name", "alice").unwrap().unwrap();
//! assert_eq!(alice["followers"], json!(3));
//! ```

pub mod index;
pub mod indexer;

pub use index::{ColumnIndex, IndexSet, Ordinal, index_key};
pub use indexer::IndexStats;

use crate::codec::CodecState;
use crate::config::{Column, DatasetConfig, Mode, RepositoryConfig};
use crate::dump::{Clock, Repository, SystemClock};
use crate::error::StoreResult;
use crate::handle::Handle;
use crate::reader::ScannedRecord;
use crate::record::{self, Opcode, Record};
use parking_lot::Mutex;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Indexed view over a repository.
///
/// # Thread Safety
///
/// `Dataset` is `Send + Sync`. Lookups never block writers for longer than a
/// table shard lock; `put_unique` calls are serialized.
pub struct Dataset {
    config: DatasetConfig,
    repository: Repository,
    index: IndexSet,
    codec: Arc<CodecState>,
    /// Sequence of the next `put_unique`, held for the whole call
    inserts: Mutex<u64>,
}

impl std::fmt::Debug for Dataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dataset")
            .field("repository", &self.repository)
            .field("columns", &self.config.columns)
            .field("size", &self.size())
            .finish()
    }
}

impl Dataset {
    /// Opens a rewritable dataset with default settings.
    pub fn open(
        root: impl Into<PathBuf>,
        prefix: impl Into<String>,
        columns: Vec<Column>,
    ) -> StoreResult<Self> {
        Self::open_with_config(DatasetConfig::new(
            RepositoryConfig::new(root, prefix),
            columns,
        ))
    }

    pub fn open_with_config(config: DatasetConfig) -> StoreResult<Self> {
        Self::open_with_clock(config, Arc::new(SystemClock))
    }

    /// Opens the repository and blocks until the initial index build and the
    /// import replay are complete.
    pub fn open_with_clock(config: DatasetConfig, clock: Arc<dyn Clock>) -> StoreResult<Self> {
        config.validate()?;
        let repository = Repository::open_with_clock(config.repository.clone(), clock)?;
        // listing mid-conversion could see a file under both names
        repository.await_conversions();

        let dataset = Self {
            index: IndexSet::new(&config.columns),
            codec: Arc::new(CodecState::new()),
            inserts: Mutex::new(0),
            repository,
            config,
        };
        let mut stats = dataset.index_own_dumps()?;
        if dataset.config.ingest_imports {
            stats += dataset.ingest_imports()?;
        }
        info!(
            root = %dataset.config.repository.root.display(),
            files = stats.files,
            records = stats.records,
            skipped = stats.skipped,
            size = dataset.size(),
            "dataset opened"
        );
        Ok(dataset)
    }

    fn index_own_dumps(&self) -> StoreResult<IndexStats> {
        let files = self.repository.get_own_dumps(usize::MAX)?;
        let readers = files
            .iter()
            .map(|path| self.repository.iterate(path))
            .collect::<StoreResult<Vec<_>>>()?;
        indexer::run(
            readers,
            self.config.concurrency,
            self.config.queue_capacity,
            |rank, scanned| self.index_scanned(rank, scanned),
        )
    }

    fn index_scanned(&self, rank: u32, scanned: ScannedRecord) -> StoreResult<()> {
        let handle = self.index_handle(&scanned.record, scanned.handle)?;
        self.index
            .insert_record(&scanned.record, (rank, scanned.line), &handle);
        Ok(())
    }

    /// Appends every import dump to the own log, then shifts it to `imported/`.
    fn ingest_imports(&self) -> StoreResult<IndexStats> {
        let mut total = IndexStats::default();
        for path in self.repository.get_import_dumps(usize::MAX)? {
            let reader = self.repository.iterate(&path)?;
            total += indexer::run(
                vec![reader],
                self.config.concurrency,
                self.config.queue_capacity,
                |_, scanned| self.put_unique(&scanned.record).map(|_| ()),
            )?;
            match path.file_name() {
                Some(name) => {
                    self.repository
                        .shift_processed_dump(&name.to_string_lossy())?;
                }
                None => warn!(path = %path.display(), "import dump has no file name"),
            }
        }
        Ok(total)
    }

    /// Handle stored in the index for a record whose log handle is `written`.
    fn index_handle(&self, record: &Record, written: Handle) -> StoreResult<Handle> {
        match self.config.repository.mode {
            Mode::Rewritable => Ok(written),
            Mode::Compressed => {
                let mut stripped = record.clone();
                record::strip_meta(&mut stripped);
                Handle::capsule(&stripped, &self.codec)
            }
        }
    }

    /// Appends `record` with opcode `I` and indexes it under every column whose
    /// key is still free. The append happens even if every key is taken.
    pub fn put_unique(&self, record: &Record) -> StoreResult<Handle> {
        let mut sequence = self.inserts.lock();
        let written = self.repository.write_with_opcode(record, Opcode::Insert)?;
        let handle = self.index_handle(record, written)?;
        self.index
            .insert_record(record, (u32::MAX, *sequence), &handle);
        *sequence += 1;
        Ok(handle)
    }

    /// Handle of the first record whose `column` equals `value`.
    ///
    /// Fails with [`StoreError::ColumnNotDeclared`](crate::error::StoreError::ColumnNotDeclared)
    /// for a column the dataset was not opened with.
    pub fn lookup(&self, column: &str, value: impl Into<Value>) -> StoreResult<Option<Handle>> {
        self.index.lookup(column, &value.into())
    }

    /// Like [`lookup`](Self::lookup), resolved to the record without meta keys.
    pub fn get(&self, column: &str, value: impl Into<Value>) -> StoreResult<Option<Record>> {
        let Some(handle) = self.lookup(column, value)? else {
            return Ok(None);
        };
        let mut found = handle.record()?;
        record::strip_meta(&mut found);
        Ok(Some(found))
    }

    /// Number of keys in the largest column table.
    pub fn size(&self) -> usize {
        self.index.size()
    }

    pub fn columns(&self) -> &[Column] {
        &self.config.columns
    }

    pub fn config(&self) -> &DatasetConfig {
        &self.config
    }

    pub fn repository(&self) -> &Repository {
        &self.repository
    }

    pub fn root(&self) -> &Path {
        &self.config.repository.root
    }

    /// Key table of the capsule codec used in compressed mode.
    pub fn codec(&self) -> &Arc<CodecState> {
        &self.codec
    }

    pub fn close(&self) -> StoreResult<()> {
        self.repository.close()
    }
}
