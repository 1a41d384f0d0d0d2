//! Record Capsule Codec.
//!
//! Field names are interned into a [`CodecState`] the first time they are seen
//! and replaced by the hex form of their index (`"screen_name"` → `"0"`,
//! the eleventh name → `"a"`). The renamed record is stored raw or gzipped,
//! whichever is smaller, behind a one-byte tag.
//!
//! ```text
//! capsule = [tag: u8][payload]
//! tag 0   = compact JSON with short keys
//! tag 1   = gzip of the same bytes
//! ```
//!
//! The key table is not written anywhere by the store: a capsule can only be
//! decoded by the state that encoded it, or by one restored from
//! [`CodecState::snapshot`].

use crate::error::{StoreError, StoreResult};
use crate::record::Record;
use crate::storage::compression::{CompressionLevel, gunzip_bytes, gzip_bytes};
use ahash::AHashMap;
use parking_lot::RwLock;
use serde_json::{Map, Value};

/// Tag of an uncompressed capsule.
pub const TAG_RAW: u8 = 0;
/// Tag of a gzip capsule.
pub const TAG_GZIP: u8 = 1;

#[derive(Default)]
struct Interner {
    codes: AHashMap<String, usize>,
    names: Vec<String>,
}

/// Interned field names with stable indices.
///
/// Thread-safe; one instance is shared by every encoder and decoder of a dataset.
#[derive(Default)]
pub struct CodecState {
    interner: RwLock<Interner>,
}

impl std::fmt::Debug for CodecState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecState")
            .field("names", &self.len())
            .finish()
    }
}

impl CodecState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restores a state from [`snapshot`](Self::snapshot) output.
    pub fn from_snapshot(names: Vec<String>) -> Self {
        let codes = names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), i))
            .collect();
        Self {
            interner: RwLock::new(Interner { codes, names }),
        }
    }

    /// Field names in code order; index `i` has short key `format!("{i:x}")`.
    pub fn snapshot(&self) -> Vec<String> {
        self.interner.read().names.clone()
    }

    /// Number of interned names.
    pub fn len(&self) -> usize {
        self.interner.read().names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Short key of `name`, assigning the next code on first sight.
    pub fn short_key(&self, name: &str) -> String {
        if let Some(&code) = self.interner.read().codes.get(name) {
            return format!("{code:x}");
        }
        let mut interner = self.interner.write();
        // another thread may have assigned it between the two locks
        if let Some(&code) = interner.codes.get(name) {
            return format!("{code:x}");
        }
        let code = interner.names.len();
        interner.names.push(name.to_string());
        interner.codes.insert(name.to_string(), code);
        format!("{code:x}")
    }

    /// Original name of a short key.
    pub fn long_key(&self, short: &str) -> Option<String> {
        let code = usize::from_str_radix(short, 16).ok()?;
        // reject non-canonical spellings such as "0a" or "A"
        if format!("{code:x}") != short {
            return None;
        }
        self.interner.read().names.get(code).cloned()
    }

    /// Encodes a record into a capsule.
    pub fn encode(&self, record: &Record) -> StoreResult<Capsule> {
        let mut minified = Map::with_capacity(record.len());
        for (key, value) in record {
            minified.insert(self.short_key(key), value.clone());
        }
        let raw = serde_json::to_vec(&Value::Object(minified))?;
        let packed = gzip_bytes(&raw, CompressionLevel::Best)?;

        let (tag, payload) = if packed.len() < raw.len() {
            (TAG_GZIP, packed)
        } else {
            (TAG_RAW, raw)
        };
        let mut bytes = Vec::with_capacity(payload.len() + 1);
        bytes.push(tag);
        bytes.extend_from_slice(&payload);
        Ok(Capsule(bytes.into_boxed_slice()))
    }

    /// Decodes a capsule produced by this state.
    ///
    /// An unknown short key means the capsule came from a different state. That
    /// is a programming error, reported as [`StoreError::UnknownShortKey`].
    pub fn decode(&self, capsule: &Capsule) -> StoreResult<Record> {
        let minified = match capsule.raw_json()? {
            Value::Object(map) => map,
            other => {
                return Err(StoreError::InvalidCapsule(format!(
                    "payload is not an object: {other}"
                )));
            }
        };
        let mut record = Record::with_capacity(minified.len());
        for (short, value) in minified {
            match self.long_key(&short) {
                Some(name) => {
                    record.insert(name, value);
                }
                None => {
                    tracing::error!(short = %short, "capsule key has no mapping in this codec");
                    return Err(StoreError::UnknownShortKey(short));
                }
            }
        }
        Ok(record)
    }
}

/// Minified, possibly gzipped record bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capsule(Box<[u8]>);

impl Capsule {
    /// Wraps capsule bytes, checking the tag.
    pub fn from_bytes(bytes: Vec<u8>) -> StoreResult<Self> {
        match bytes.first() {
            Some(&TAG_RAW) | Some(&TAG_GZIP) => Ok(Self(bytes.into_boxed_slice())),
            Some(tag) => Err(StoreError::InvalidCapsule(format!("unknown tag {tag}"))),
            None => Err(StoreError::InvalidCapsule("empty capsule".into())),
        }
    }

    pub fn tag(&self) -> u8 {
        self.0[0]
    }

    pub fn is_compressed(&self) -> bool {
        self.tag() == TAG_GZIP
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Size in memory, tag included.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.len() <= 1
    }

    fn raw_json(&self) -> StoreResult<Value> {
        let payload = &self.0[1..];
        let bytes = if self.is_compressed() {
            gunzip_bytes(payload).map_err(|e| StoreError::InvalidCapsule(e.to_string()))?
        } else {
            payload.to_vec()
        };
        serde_json::from_slice(&bytes).map_err(|e| StoreError::InvalidCapsule(e.to_string()))
    }
}
