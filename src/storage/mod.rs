//! Storage Module
//!
//! The boundary between the expire-bin core and the key-value store it runs
//! on, plus a sharded in-memory implementation of that boundary.
//!
//! ## Architecture
//!
//! ```text
//!   RecordAccessor / SweepCoordinator
//!                 │
//!                 ▼
//!   ┌───────────────────────────────┐
//!   │   RecordStore (trait)         │  load / write(expect) / scan
//!   └───────────────┬───────────────┘
//!                   │
//!                   ▼
//!   ┌───────────────────────────────┐
//!   │   MemoryStore                 │
//!   │   64 × RwLock<HashMap>        │
//!   └───────────────────────────────┘
//! ```
//!
//! The store never interprets bin values: expire-bin envelopes are ordinary
//! [`Value::Map`] values as far as it is concerned.

pub mod memory;
pub mod record;
pub mod store;

// Re-export commonly used types
pub use memory::{MemoryStore, StoreStats};
pub use record::{BinFilter, BinMap, Expect, RecordKey, StoredRecord, Value};
pub use store::{KeyScan, RecordStore, StoreError};
