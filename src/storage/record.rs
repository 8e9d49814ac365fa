//! Record Data Types
//!
//! The types a record store traffics in: record keys, the store-native
//! [`Value`] representation of a bin, and the record image returned by a load.
//!
//! ## Value Model
//!
//! ```text
//! Value
//!   ├── Str(String)        text payloads
//!   ├── Int(i64)           integer payloads
//!   ├── Bytes(Bytes)       opaque payloads
//!   ├── List(Vec<Value>)   composite payloads
//!   └── Map(BTreeMap)      composite payloads (also the expire-bin envelope)
//! ```

use bytes::Bytes;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

/// The bins of a record, keyed by bin name.
pub type BinMap = HashMap<String, Value>;

/// A set of bin names used to narrow scans and reclaims.
pub type BinFilter = BTreeSet<String>;

/// Identifies one record: the collection (set) it lives in plus its id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    /// The collection the record belongs to
    pub collection: String,
    /// The record id, unique within its collection
    pub id: String,
}

impl RecordKey {
    /// Creates a new record key.
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.collection, self.id)
    }
}

/// A store-native bin value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// UTF-8 text
    Str(String),
    /// 64-bit signed integer
    Int(i64),
    /// Opaque binary payload
    Bytes(Bytes),
    /// Ordered list of values
    List(Vec<Value>),
    /// String-keyed map of values
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Returns the inner string for `Str` values.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the inner integer for `Int` values.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the inner map for `Map` values.
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Value::Bytes(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(values: Vec<Value>) -> Self {
        Value::List(values)
    }
}

/// A record image as returned by [`RecordStore::load`](super::RecordStore::load).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredRecord {
    /// All bins of the record in their stored form
    pub bins: BinMap,
    /// Generation counter, incremented on every successful write
    pub generation: u32,
}

/// The precondition attached to an atomic write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    /// Write unconditionally
    Any,
    /// The record must not exist yet
    Absent,
    /// The record must still be at this generation
    Generation(u32),
}

impl Expect {
    /// Builds the precondition matching a previous load result.
    pub fn from_loaded(record: Option<&StoredRecord>) -> Self {
        match record {
            Some(r) => Expect::Generation(r.generation),
            None => Expect::Absent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_key_display() {
        let key = RecordKey::new("users", "eb1");
        assert_eq!(key.to_string(), "users:eb1");
    }

    #[test]
    fn test_value_accessors() {
        assert_eq!(Value::from("hello").as_str(), Some("hello"));
        assert_eq!(Value::from(42i64).as_int(), Some(42));
        assert_eq!(Value::from(42i64).as_str(), None);
        assert!(Value::Map(BTreeMap::new()).as_map().is_some());
    }

    #[test]
    fn test_expect_from_loaded() {
        assert_eq!(Expect::from_loaded(None), Expect::Absent);

        let record = StoredRecord {
            bins: BinMap::new(),
            generation: 7,
        };
        assert_eq!(Expect::from_loaded(Some(&record)), Expect::Generation(7));
    }
}
