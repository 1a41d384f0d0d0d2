//! Configuration for repositories and datasets.
//!
//! Everything the host process can tune lives here: directory root, file-name
//! prefix, rotation granularity, storage mode, index columns and worker count.
//! Values are built with `with_*` methods, loaded from a JSON document, or
//! overlaid from `JSONSTORE_*` environment variables.

use crate::error::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Default BRAF buffer size (1 MiB).
pub const DEFAULT_BUFFER_SIZE: usize = 1 << 20;

/// Default capacity of the indexer's bounded queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Default number of records a buffer partition holds before it is flushed.
pub const DEFAULT_BUFFER_FLUSH_THRESHOLD: usize = 100;

/// How non-current dump files are kept on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Non-current dumps are gzip-compressed. Records are held in RAM after indexing.
    Compressed,
    /// Dumps stay plain text forever. The index only keeps file offsets.
    #[default]
    Rewritable,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Compressed => "compressed",
            Mode::Rewritable => "rewritable",
        }
    }

    pub fn parse_mode(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "compressed" => Some(Mode::Compressed),
            "rewritable" => Some(Mode::Rewritable),
            _ => None,
        }
    }
}

/// Date granularity of the dump file suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rotation {
    /// `yyyyMM`
    #[default]
    Monthly,
    /// `yyyyMMdd`
    Daily,
}

impl Rotation {
    /// `chrono` format string of the date suffix.
    pub fn format(&self) -> &'static str {
        match self {
            Rotation::Monthly => "%Y%m",
            Rotation::Daily => "%Y%m%d",
        }
    }

    /// Number of characters the date suffix occupies.
    pub fn suffix_len(&self) -> usize {
        match self {
            Rotation::Monthly => 6,
            Rotation::Daily => 8,
        }
    }

    pub fn parse_rotation(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "monthly" => Some(Rotation::Monthly),
            "daily" => Some(Rotation::Daily),
            _ => None,
        }
    }
}

/// Settings of one [`Repository`](crate::dump::Repository).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Directory holding `own/`, `import/`, `imported/` and `buffer/`
    pub root: PathBuf,
    /// File-name prefix of every dump file
    pub prefix: String,
    /// Written once to `readme.txt` if the file does not exist yet
    #[serde(default)]
    pub readme: Option<String>,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub rotation: Rotation,
    /// BRAF buffer size in bytes
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Records per buffer partition before an automatic flush
    #[serde(default = "default_buffer_flush_threshold")]
    pub buffer_flush_threshold: usize,
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

fn default_buffer_flush_threshold() -> usize {
    DEFAULT_BUFFER_FLUSH_THRESHOLD
}

impl RepositoryConfig {
    pub fn new(root: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            prefix: prefix.into(),
            readme: None,
            mode: Mode::default(),
            rotation: Rotation::default(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            buffer_flush_threshold: DEFAULT_BUFFER_FLUSH_THRESHOLD,
        }
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_readme(mut self, readme: impl Into<String>) -> Self {
        self.readme = Some(readme.into());
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn with_buffer_flush_threshold(mut self, threshold: usize) -> Self {
        self.buffer_flush_threshold = threshold;
        self
    }

    /// Overlays `JSONSTORE_PREFIX`, `JSONSTORE_MODE` and `JSONSTORE_ROTATION`.
    pub fn from_env(root: impl Into<PathBuf>, default_prefix: &str) -> StoreResult<Self> {
        let prefix = env::var("JSONSTORE_PREFIX").unwrap_or_else(|_| default_prefix.to_string());
        let mut config = Self::new(root, prefix);
        if let Ok(mode) = env::var("JSONSTORE_MODE") {
            config.mode = Mode::parse_mode(&mode)
                .ok_or_else(|| StoreError::InvalidConfig(format!("JSONSTORE_MODE={mode}")))?;
        }
        if let Ok(rotation) = env::var("JSONSTORE_ROTATION") {
            config.rotation = Rotation::parse_rotation(&rotation).ok_or_else(|| {
                StoreError::InvalidConfig(format!("JSONSTORE_ROTATION={rotation}"))
            })?;
        }
        Ok(config)
    }

    pub fn validate(&self) -> StoreResult<()> {
        if self.prefix.contains(['/', '\\']) {
            return Err(StoreError::InvalidConfig(format!(
                "prefix '{}' must not contain path separators",
                self.prefix
            )));
        }
        if self.buffer_size == 0 {
            return Err(StoreError::InvalidConfig("buffer_size must be > 0".into()));
        }
        if self.buffer_flush_threshold == 0 {
            return Err(StoreError::InvalidConfig(
                "buffer_flush_threshold must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// An index column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    /// Values are lower-cased before they are used as index keys
    #[serde(default)]
    pub case_insensitive: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, case_insensitive: bool) -> Self {
        Self {
            name: name.into(),
            case_insensitive,
        }
    }

    pub fn case_sensitive(name: impl Into<String>) -> Self {
        Self::new(name, false)
    }

    pub fn case_insensitive(name: impl Into<String>) -> Self {
        Self::new(name, true)
    }
}

/// Settings of one [`Dataset`](crate::dataset::Dataset).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetConfig {
    pub repository: RepositoryConfig,
    pub columns: Vec<Column>,
    /// Number of indexer worker threads
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Capacity of the bounded reader → worker queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Replay `import/` into the own log at open and shift the files to `imported/`
    #[serde(default = "default_ingest_imports")]
    pub ingest_imports: bool,
}

fn default_concurrency() -> usize {
    num_cpus::get().max(1)
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_ingest_imports() -> bool {
    true
}

impl DatasetConfig {
    pub fn new(repository: RepositoryConfig, columns: Vec<Column>) -> Self {
        Self {
            repository,
            columns,
            concurrency: default_concurrency(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            ingest_imports: true,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_ingest_imports(mut self, ingest: bool) -> Self {
        self.ingest_imports = ingest;
        self
    }

    /// Loads a dataset config from a JSON document.
    pub fn from_json_file(path: &Path) -> StoreResult<Self> {
        let text = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Repository settings from [`RepositoryConfig::from_env`], worker count from
    /// `JSONSTORE_CONCURRENCY`.
    pub fn from_env(
        root: impl Into<PathBuf>,
        default_prefix: &str,
        columns: Vec<Column>,
    ) -> StoreResult<Self> {
        let mut config = Self::new(RepositoryConfig::from_env(root, default_prefix)?, columns);
        if let Ok(value) = env::var("JSONSTORE_CONCURRENCY") {
            config.concurrency = value.trim().parse().map_err(|_| {
                StoreError::InvalidConfig(format!("JSONSTORE_CONCURRENCY={value}"))
            })?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> StoreResult<()> {
        self.repository.validate()?;
        if self.concurrency == 0 {
            return Err(StoreError::InvalidConfig("concurrency must be > 0".into()));
        }
        if self.queue_capacity == 0 {
            return Err(StoreError::InvalidConfig("queue_capacity must be > 0".into()));
        }
        let mut seen = HashSet::new();
        for column in &self.columns {
            if column.name.is_empty() {
                return Err(StoreError::InvalidConfig("empty column name".into()));
            }
            if !seen.insert(column.name.as_str()) {
                return Err(StoreError::InvalidConfig(format!(
                    "column '{}' declared twice",
                    column.name
                )));
            }
        }
        Ok(())
    }
}
