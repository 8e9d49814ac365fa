//! Record Store Boundary
//!
//! The contract the expire-bin core needs from the underlying key-value store.
//! The store only knows whole records; it must offer:
//!
//! 1. **Load**: fetch a record image together with its generation.
//! 2. **Atomic write**: replace a record's bins, guarded by an [`Expect`]
//!    precondition (compare-and-swap on the generation).
//! 3. **Scan**: a lazy sequence of record keys over one collection.
//!
//! Every call carries an absolute deadline. A store must give up with
//! [`StoreError::Timeout`] instead of waiting past it.

use crate::storage::record::{BinFilter, BinMap, Expect, RecordKey, StoredRecord};
use std::fmt::Debug;
use std::time::Instant;
use thiserror::Error;

/// Errors reported by a record store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The write precondition no longer holds (concurrent modification)
    #[error("generation conflict")]
    Conflict,

    /// The call deadline passed before the store could serve it
    #[error("store call timed out")]
    Timeout,

    /// The store cannot be reached or failed internally
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// A lazy, finite sequence of record keys produced by a scan.
pub type KeyScan<'a> = Box<dyn Iterator<Item = Result<RecordKey, StoreError>> + Send + 'a>;

/// A key-value store with whole-record atomicity.
pub trait RecordStore: Send + Sync + Debug {
    /// Loads a record, or `None` if it doesn't exist.
    fn load(&self, key: &RecordKey, deadline: Instant) -> Result<Option<StoredRecord>, StoreError>;

    /// Atomically replaces the bins of a record, creating it if needed.
    ///
    /// Returns the generation of the written record.
    fn write(
        &self,
        key: &RecordKey,
        bins: BinMap,
        expect: Expect,
        deadline: Instant,
    ) -> Result<u32, StoreError>;

    /// Lazily iterates the keys of a collection.
    ///
    /// With a filter, only records holding at least one of the named bins
    /// are produced. Dropping the iterator ends the scan early.
    fn scan<'a>(
        &'a self,
        collection: &'a str,
        filter: Option<&'a BinFilter>,
    ) -> Result<KeyScan<'a>, StoreError>;

    /// Returns the approximate number of records in the store.
    fn record_count(&self) -> u64;
}
