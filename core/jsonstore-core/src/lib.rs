//! # jsonstore: Append-Only JSON Record Store
//!
//! Newline-delimited JSON dump files with date-based rotation, background
//! gzip archiving, and in-memory column indexes rebuilt from the files on every
//! start.
//!
//! ## Key Features
//!
//! - **Append log**: one current file per period (`yyyyMM` or `yyyyMMdd`), four-directory layout
//! - **Two modes**: rewritable (plain text, lazy offset handles) or compressed (gzip archives, in-memory capsules)
//! - **Parallel index build**: one reader thread per dump, N workers behind a bounded queue
//! - **First writer wins**: `put_unique` never overwrites an indexed key
//!
//! ## Quick Start
//!
//! ```rust
//! use jsonstore_core::{Column, Dataset, record_of};
//! use serde_json::json;
//!
//! # fn main() -> jsonstore_core::StoreResult<()> {
//! let dir = tempfile::tempdir()?;
//! let users = Dataset::open(dir.path(), "users_", vec![Column::case_insensitive("screen_name")])?;
//!
//! users.put_unique(&record_of([("screen_name", json!("Alice"))]))?;
//! users.put_unique(&record_of([("screen_name", json!("alice")), ("dup", json!(true))]))?;
//!
//! // the first record keeps the slot
//! let alice = users.get("screen_name", "ALICE")?.unwrap();
//! assert!(alice.get("dup").is_none());
//! users.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! write(record) ──▶ Repository ──▶ BRAF.append_line ──▶ own/<prefix><date>_<rand>.txt
//!                      │ rotation                              │ not current any more
//!                      ▼                                       ▼
//!               Conversions (gzip / gunzip threads)      .txt.gz (compressed mode)
//!
//! open ──▶ DumpReader per file ──▶ bounded queue ──▶ N workers ──▶ IndexSet
//! ```
//!
//! ## Modules
//!
//! - [`storage`]: buffered random-access file and gzip helpers
//! - [`codec`]: record capsule codec
//! - [`record`] / [`handle`]: record model and handles
//! - [`dump`]: repository, rotation, conversion, buffer extension
//! - [`reader`]: random-access and stream readers
//! - [`dataset`]: column indexes and the parallel indexer

pub mod codec;
pub mod config;
pub mod dataset;
pub mod dump;
pub mod error;
pub mod handle;
pub mod reader;
pub mod record;
pub mod storage;

// Logging utilities
pub mod logging;

// Re-export commonly used types
pub use codec::{Capsule, CodecState};
pub use config::{Column, DatasetConfig, Mode, RepositoryConfig, Rotation};
pub use dataset::{Dataset, IndexStats};
pub use dump::Repository;
pub use error::{StoreError, StoreResult};
pub use handle::Handle;
pub use record::{Opcode, Record, record_of};
