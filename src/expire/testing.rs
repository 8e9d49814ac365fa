//! Store wrappers that inject failures into tests.

use crate::storage::{
    BinFilter, BinMap, Expect, KeyScan, MemoryStore, RecordKey, RecordStore, StoreError,
    StoredRecord,
};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Reports a conflict for the first `conflicts` writes, then delegates.
#[derive(Debug)]
pub struct FlakyStore {
    inner: Arc<MemoryStore>,
    remaining: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryStore>, conflicts: usize) -> Self {
        Self {
            inner,
            remaining: AtomicUsize::new(conflicts),
        }
    }
}

impl RecordStore for FlakyStore {
    fn load(&self, key: &RecordKey, deadline: Instant) -> Result<Option<StoredRecord>, StoreError> {
        self.inner.load(key, deadline)
    }

    fn write(
        &self,
        key: &RecordKey,
        bins: BinMap,
        expect: Expect,
        deadline: Instant,
    ) -> Result<u32, StoreError> {
        let conflicted = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if conflicted {
            return Err(StoreError::Conflict);
        }
        self.inner.write(key, bins, expect, deadline)
    }

    fn scan<'a>(
        &'a self,
        collection: &'a str,
        filter: Option<&'a BinFilter>,
    ) -> Result<KeyScan<'a>, StoreError> {
        self.inner.scan(collection, filter)
    }

    fn record_count(&self) -> u64 {
        self.inner.record_count()
    }
}

/// Fails every write with `Unavailable`.
#[derive(Debug)]
pub struct FailingWrites {
    inner: Arc<MemoryStore>,
}

impl FailingWrites {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self { inner }
    }
}

impl RecordStore for FailingWrites {
    fn load(&self, key: &RecordKey, deadline: Instant) -> Result<Option<StoredRecord>, StoreError> {
        self.inner.load(key, deadline)
    }

    fn write(
        &self,
        _key: &RecordKey,
        _bins: BinMap,
        _expect: Expect,
        _deadline: Instant,
    ) -> Result<u32, StoreError> {
        Err(StoreError::Unavailable("injected write failure".into()))
    }

    fn scan<'a>(
        &'a self,
        collection: &'a str,
        filter: Option<&'a BinFilter>,
    ) -> Result<KeyScan<'a>, StoreError> {
        self.inner.scan(collection, filter)
    }

    fn record_count(&self) -> u64 {
        self.inner.record_count()
    }
}

/// Fails loads of selected record ids with `Unavailable`.
#[derive(Debug)]
pub struct PoisonedRecords {
    inner: Arc<MemoryStore>,
    poisoned: Mutex<BTreeSet<String>>,
}

impl PoisonedRecords {
    pub fn new(inner: Arc<MemoryStore>, ids: impl IntoIterator<Item = String>) -> Self {
        Self {
            inner,
            poisoned: Mutex::new(ids.into_iter().collect()),
        }
    }

    fn is_poisoned(&self, key: &RecordKey) -> bool {
        self.poisoned
            .lock()
            .map(|ids| ids.contains(&key.id))
            .unwrap_or(false)
    }
}

impl RecordStore for PoisonedRecords {
    fn load(&self, key: &RecordKey, deadline: Instant) -> Result<Option<StoredRecord>, StoreError> {
        if self.is_poisoned(key) {
            return Err(StoreError::Unavailable(format!("{} is poisoned", key)));
        }
        self.inner.load(key, deadline)
    }

    fn write(
        &self,
        key: &RecordKey,
        bins: BinMap,
        expect: Expect,
        deadline: Instant,
    ) -> Result<u32, StoreError> {
        self.inner.write(key, bins, expect, deadline)
    }

    fn scan<'a>(
        &'a self,
        collection: &'a str,
        filter: Option<&'a BinFilter>,
    ) -> Result<KeyScan<'a>, StoreError> {
        self.inner.scan(collection, filter)
    }

    fn record_count(&self) -> u64 {
        self.inner.record_count()
    }
}

/// Sleeps before every load.
#[derive(Debug)]
pub struct SlowLoads {
    inner: Arc<MemoryStore>,
    delay: Duration,
}

impl SlowLoads {
    pub fn new(inner: Arc<MemoryStore>, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

impl RecordStore for SlowLoads {
    fn load(&self, key: &RecordKey, deadline: Instant) -> Result<Option<StoredRecord>, StoreError> {
        std::thread::sleep(self.delay);
        self.inner.load(key, deadline)
    }

    fn write(
        &self,
        key: &RecordKey,
        bins: BinMap,
        expect: Expect,
        deadline: Instant,
    ) -> Result<u32, StoreError> {
        self.inner.write(key, bins, expect, deadline)
    }

    fn scan<'a>(
        &'a self,
        collection: &'a str,
        filter: Option<&'a BinFilter>,
    ) -> Result<KeyScan<'a>, StoreError> {
        self.inner.scan(collection, filter)
    }

    fn record_count(&self) -> u64 {
        self.inner.record_count()
    }
}
