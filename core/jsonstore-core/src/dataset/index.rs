//! In-memory column indexes.
//!
//! One table per configured column maps an index key to the handle of the
//! earliest record carrying it. Inserts never overwrite a key held by an
//! earlier record.

use crate::config::Column;
use crate::error::{StoreError, StoreResult};
use crate::handle::Handle;
use crate::record::Record;
use ahash::AHashMap;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::Value;

/// Position of a record in replay order: `(file rank, line)` for records read
/// at startup, `(u32::MAX, sequence)` for records inserted afterwards.
pub type Ordinal = (u32, u64);

/// Index key of `value`, or `None` if the value is not indexable.
///
/// Strings index as-is (lower-cased for case-insensitive columns), numbers and
/// booleans by their JSON text.
pub fn index_key(value: &Value, case_insensitive: bool) -> Option<String> {
    match value {
        Value::String(s) if case_insensitive => Some(s.to_lowercase()),
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Key → handle table of one column.
#[derive(Debug)]
pub struct ColumnIndex {
    column: Column,
    table: DashMap<String, (Ordinal, Handle), ahash::RandomState>,
}

impl ColumnIndex {
    pub fn new(column: Column) -> Self {
        Self {
            column,
            table: DashMap::with_hasher(ahash::RandomState::new()),
        }
    }

    pub fn column(&self) -> &Column {
        &self.column
    }

    /// Inserts `handle` under `key` unless an earlier record holds it.
    ///
    /// Returns `true` if the table now points at `handle`.
    pub fn insert(&self, key: String, ordinal: Ordinal, handle: &Handle) -> bool {
        match self.table.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert((ordinal, handle.clone()));
                true
            }
            Entry::Occupied(mut slot) if ordinal < slot.get().0 => {
                slot.insert((ordinal, handle.clone()));
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    pub fn get(&self, key: &str) -> Option<Handle> {
        self.table.get(key).map(|e| e.value().1.clone())
    }

    pub fn key_of(&self, value: &Value) -> Option<String> {
        index_key(value, self.column.case_insensitive)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

/// All column indexes of a dataset. The column set is fixed at construction.
#[derive(Debug)]
pub struct IndexSet {
    columns: AHashMap<String, ColumnIndex>,
}

impl IndexSet {
    pub fn new(columns: &[Column]) -> Self {
        Self {
            columns: columns
                .iter()
                .map(|c| (c.name.clone(), ColumnIndex::new(c.clone())))
                .collect(),
        }
    }

    /// Indexes `record` under every column it has an indexable value for.
    /// Returns the number of tables that now point at `handle`.
    pub fn insert_record(&self, record: &Record, ordinal: Ordinal, handle: &Handle) -> usize {
        let mut inserted = 0;
        for (name, index) in &self.columns {
            let Some(key) = record.get(name).and_then(|v| index.key_of(v)) else {
                continue;
            };
            if index.insert(key, ordinal, handle) {
                inserted += 1;
            }
        }
        inserted
    }

    /// Looks `value` up in `column`.
    pub fn lookup(&self, column: &str, value: &Value) -> StoreResult<Option<Handle>> {
        let index = self
            .columns
            .get(column)
            .ok_or_else(|| StoreError::ColumnNotDeclared(column.to_string()))?;
        Ok(index.key_of(value).and_then(|key| index.get(&key)))
    }

    pub fn column(&self, name: &str) -> Option<&ColumnIndex> {
        self.columns.get(name)
    }

    /// Size of the largest table.
    pub fn size(&self) -> usize {
        self.columns.values().map(ColumnIndex::len).max().unwrap_or(0)
    }
}
