//! Sharded In-Memory Record Store
//!
//! A [`RecordStore`] that keeps every record in process memory. It is the
//! reference store for the expire-bin core: the server binary runs on it and
//! the tests use it to exercise the read-modify-write protocol.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       MemoryStore                           │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │ Shard N │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ RwLock  │           │
//! │  │ HashMap │ │ HashMap │ │ HashMap │ │ HashMap │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Records are distributed across shards by key hash. A write checks its
//! [`Expect`] precondition and bumps the generation under the shard's write
//! lock, which is what makes load + conditional write a compare-and-swap.
//!
//! Scans walk the shards one at a time and snapshot only the matching keys of
//! the current shard, so a scan is lazy and not a point-in-time view.

use crate::storage::record::{BinFilter, BinMap, Expect, RecordKey, StoredRecord};
use crate::storage::store::{KeyScan, RecordStore, StoreError};
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Instant;
use tracing::trace;

/// Number of shards for the store.
const NUM_SHARDS: usize = 64;

/// A single shard containing a portion of the records.
#[derive(Debug, Default)]
struct Shard {
    records: RwLock<HashMap<RecordKey, StoredRecord>>,
}

/// Store statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Number of records currently stored
    pub records: u64,
    /// Total load calls
    pub loads: u64,
    /// Total successful writes
    pub writes: u64,
    /// Writes rejected by their precondition
    pub conflicts: u64,
}

/// The in-memory record store.
///
/// Designed to be wrapped in an `Arc` and shared by every accessor, command
/// handler and sweep worker.
///
/// # Example
///
/// ```
/// use binexpire::storage::{Expect, MemoryStore, RecordKey, RecordStore, Value};
/// use std::time::{Duration, Instant};
///
/// let store = MemoryStore::new();
/// let key = RecordKey::new("test", "eb1");
/// let deadline = Instant::now() + Duration::from_secs(1);
///
/// let mut bins = std::collections::HashMap::new();
/// bins.insert("name".to_string(), Value::from("Ariz"));
/// let generation = store.write(&key, bins, Expect::Absent, deadline).unwrap();
///
/// let record = store.load(&key, deadline).unwrap().unwrap();
/// assert_eq!(record.generation, generation);
/// ```
pub struct MemoryStore {
    shards: Vec<Shard>,
    record_count: AtomicU64,
    load_count: AtomicU64,
    write_count: AtomicU64,
    conflict_count: AtomicU64,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("shards", &self.shards.len())
            .field("records", &self.record_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            shards: (0..NUM_SHARDS).map(|_| Shard::default()).collect(),
            record_count: AtomicU64::new(0),
            load_count: AtomicU64::new(0),
            write_count: AtomicU64::new(0),
            conflict_count: AtomicU64::new(0),
        }
    }

    #[inline]
    fn shard_for(&self, key: &RecordKey) -> &Shard {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % NUM_SHARDS]
    }

    /// Returns store statistics.
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            records: self.record_count.load(Ordering::Relaxed),
            loads: self.load_count.load(Ordering::Relaxed),
            writes: self.write_count.load(Ordering::Relaxed),
            conflicts: self.conflict_count.load(Ordering::Relaxed),
        }
    }

    /// Matching keys of one shard, snapshotted under its read lock.
    fn shard_keys(&self, index: usize, collection: &str, filter: Option<&BinFilter>) -> Vec<RecordKey> {
        let records = self.shards[index]
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        records
            .iter()
            .filter(|(key, _)| key.collection == collection)
            .filter(|(_, record)| match filter {
                Some(names) => names.iter().any(|name| record.bins.contains_key(name)),
                None => true,
            })
            .map(|(key, _)| key.clone())
            .collect()
    }
}

fn check_deadline(deadline: Instant) -> Result<(), StoreError> {
    if Instant::now() >= deadline {
        Err(StoreError::Timeout)
    } else {
        Ok(())
    }
}

impl RecordStore for MemoryStore {
    fn load(&self, key: &RecordKey, deadline: Instant) -> Result<Option<StoredRecord>, StoreError> {
        check_deadline(deadline)?;
        self.load_count.fetch_add(1, Ordering::Relaxed);

        let records = self
            .shard_for(key)
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(records.get(key).cloned())
    }

    fn write(
        &self,
        key: &RecordKey,
        bins: BinMap,
        expect: Expect,
        deadline: Instant,
    ) -> Result<u32, StoreError> {
        check_deadline(deadline)?;

        let mut records = self
            .shard_for(key)
            .records
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let current = records.get(key).map(|r| r.generation);
        let allowed = match (expect, current) {
            (Expect::Any, _) => true,
            (Expect::Absent, None) => true,
            (Expect::Generation(want), Some(have)) => want == have,
            _ => false,
        };

        if !allowed {
            self.conflict_count.fetch_add(1, Ordering::Relaxed);
            trace!(%key, ?expect, ?current, "Write precondition failed");
            return Err(StoreError::Conflict);
        }

        let generation = current.map_or(1, |g| g.wrapping_add(1));
        if records
            .insert(key.clone(), StoredRecord { bins, generation })
            .is_none()
        {
            self.record_count.fetch_add(1, Ordering::Relaxed);
        }
        self.write_count.fetch_add(1, Ordering::Relaxed);

        Ok(generation)
    }

    fn scan<'a>(
        &'a self,
        collection: &'a str,
        filter: Option<&'a BinFilter>,
    ) -> Result<KeyScan<'a>, StoreError> {
        let keys = (0..NUM_SHARDS)
            .flat_map(move |index| self.shard_keys(index, collection, filter))
            .map(Ok);
        Ok(Box::new(keys))
    }

    fn record_count(&self) -> u64 {
        self.record_count.load(Ordering::Relaxed)
    }
}
