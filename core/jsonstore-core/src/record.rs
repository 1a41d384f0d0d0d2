//! Records and their on-disk line form.
//!
//! A record is an insertion-ordered JSON object. On disk it is one UTF-8 line of
//! compact JSON; when written with an [`Opcode`] the reserved key `$P` comes first.

use crate::error::{StoreError, StoreResult};
use serde_json::{Map, Value};

/// An ordered string-keyed map of JSON values.
pub type Record = Map<String, Value>;

/// Reserved key holding the single-character operation tag.
pub const OPERATION_KEY: &str = "$P";
/// Reserved key holding a modification date.
pub const MOD_DATE_KEY: &str = "$D";
/// Reserved key holding a referrer.
pub const REFERRER_KEY: &str = "$U";
/// All reserved meta keys.
pub const META_KEYS: [&str; 3] = [OPERATION_KEY, MOD_DATE_KEY, REFERRER_KEY];

/// Operation tag stored under [`OPERATION_KEY`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Insert,
    Update,
    Delete,
    Other(char),
}

impl Opcode {
    pub fn as_char(&self) -> char {
        match self {
            Opcode::Insert => 'I',
            Opcode::Update => 'U',
            Opcode::Delete => 'D',
            Opcode::Other(c) => *c,
        }
    }

    pub fn from_char(c: char) -> Self {
        match c {
            'I' => Opcode::Insert,
            'U' => Opcode::Update,
            'D' => Opcode::Delete,
            other => Opcode::Other(other),
        }
    }

    /// Reads the opcode of a stored record, if it has one.
    pub fn of(record: &Record) -> Option<Self> {
        let mut chars = record.get(OPERATION_KEY)?.as_str()?.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Some(Self::from_char(c)),
            _ => None,
        }
    }
}

impl From<char> for Opcode {
    fn from(c: char) -> Self {
        Self::from_char(c)
    }
}

/// Serializes a record to its line payload (no trailing newline).
pub fn to_line(record: &Record) -> StoreResult<Vec<u8>> {
    Ok(serde_json::to_vec(record)?)
}

/// Serializes a record with the opcode as its first field.
///
/// An `$P` already present in `record` is replaced.
pub fn to_line_with_opcode(record: &Record, opcode: Opcode) -> StoreResult<Vec<u8>> {
    to_line(&with_opcode(record, opcode))
}

/// Copy of `record` with `$P` moved to the front and set to `opcode`.
pub fn with_opcode(record: &Record, opcode: Opcode) -> Record {
    let mut tagged = Record::with_capacity(record.len() + 1);
    tagged.insert(
        OPERATION_KEY.to_string(),
        Value::String(opcode.as_char().to_string()),
    );
    for (k, v) in record {
        if k != OPERATION_KEY {
            tagged.insert(k.clone(), v.clone());
        }
    }
    tagged
}

/// Parses one line payload. Anything but a JSON object is malformed.
pub fn parse_line(file: &str, line: &[u8]) -> StoreResult<Record> {
    match serde_json::from_slice::<Value>(line) {
        Ok(Value::Object(map)) => Ok(map),
        _ => Err(StoreError::malformed(file, line)),
    }
}

/// Removes every reserved meta key.
pub fn strip_meta(record: &mut Record) {
    for key in META_KEYS {
        record.shift_remove(key);
    }
}

/// Builds a record from `(key, value)` pairs, keeping their order.
pub fn record_of<K, V, I>(pairs: I) -> Record
where
    K: Into<String>,
    V: Into<Value>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_line_keeps_field_order() {
        let record = record_of([("zeta", json!(1)), ("alpha", json!("x")), ("mid", json!(null))]);
        assert_eq!(to_line(&record).unwrap(), br#"{"zeta":1,"alpha":"x","mid":null}"#);
    }

    #[test]
    fn test_opcode_is_first_field() {
        let record = record_of([("a", json!(1)), ("$P", json!("U")), ("b", json!([1, 2]))]);
        let line = to_line_with_opcode(&record, Opcode::Insert).unwrap();
        assert_eq!(line, br#"{"$P":"I","a":1,"b":[1,2]}"#);

        let parsed = parse_line("test", &line).unwrap();
        assert_eq!(Opcode::of(&parsed), Some(Opcode::Insert));
    }

    #[test]
    fn test_parse_rejects_non_objects() {
        assert!(parse_line("f", b"[1,2,3]").is_err());
        assert!(parse_line("f", b"\"text\"").is_err());
        assert!(parse_line("f", b"{\"a\":").is_err());
        let err = parse_line("own/x.txt", b"nope").unwrap_err();
        assert!(err.to_string().contains("own/x.txt"));
    }

    #[test]
    fn test_strip_meta() {
        let mut record = record_of([
            ("$P", json!("I")),
            ("name", json!("alice")),
            ("$D", json!("2026-01-01")),
            ("$U", json!("peer")),
        ]);
        strip_meta(&mut record);
        assert_eq!(record, record_of([("name", json!("alice"))]));
    }

    #[test]
    fn test_opcode_chars() {
        assert_eq!(Opcode::from('D'), Opcode::Delete);
        assert_eq!(Opcode::from_char('x').as_char(), 'x');
        let bad = record_of([("$P", json!("ID"))]);
        assert_eq!(Opcode::of(&bad), None);
    }
}
