//! Storage primitives.
//!
//! - [`braf`]: buffered random-access file (line reads, append, offset reads)
//! - [`compression`]: gzip for capsules and dump archives

pub mod braf;
pub mod compression;

pub use braf::{BufferedRandomAccessFile, IndexedLine};
