//! # binexpire - Per-Bin Expiration for Record Stores
//!
//! Many key-value stores expire whole records only. binexpire lets each bin
//! (named field) of a record carry its own deadline, on top of any store that
//! offers load, conditional write and scan.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │  TCP Server ──► Connection ──► CommandHandler      (RESP surface)│
//! └─────────────────────────────────────┬────────────────────────────┘
//!                                       │
//! ┌─────────────────────────────────────▼────────────────────────────┐
//! │  RecordAccessor          get / put / touch / ttl / reclaim       │
//! │    put_many / touch_many                                         │
//! │  SweepCoordinator        cancellable background reclaim          │
//! │  SweepScheduler          adaptive periodic sweeps                │
//! │                                                                  │
//! │  codec: bin value ⇄ {"~eb.v": payload, "~eb.x": deadline}        │
//! └─────────────────────────────────────┬────────────────────────────┘
//!                                       │ load / write(expect) / scan
//! ┌─────────────────────────────────────▼────────────────────────────┐
//! │  RecordStore (trait)  ──  MemoryStore (64 sharded RwLocks)       │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```
//! use binexpire::expire::{DeadlineRequest, RecordAccessor, Ttl};
//! use binexpire::storage::{MemoryStore, RecordKey, Value};
//! use std::sync::Arc;
//!
//! let accessor = RecordAccessor::with_system_clock(Arc::new(MemoryStore::new()));
//! let key = RecordKey::new("users", "u1");
//!
//! accessor
//!     .put(&key, "token", Value::from("abc"), Some(DeadlineRequest::ExpireAfter(60)))
//!     .unwrap();
//! accessor
//!     .put(&key, "name", Value::from("Ada"), Some(DeadlineRequest::Permanent))
//!     .unwrap();
//!
//! assert_eq!(accessor.get_one(&key, "token").unwrap(), Some(Value::from("abc")));
//! assert_eq!(accessor.ttl(&key, "name").unwrap(), Ttl::Infinite);
//! ```
//!
//! ## Expiry
//!
//! A bin is live while its deadline is strictly in the future. Expired bins
//! read as absent right away and are physically removed lazily: on any write
//! to the record, by an explicit `reclaim`, or by a sweep.
//!
//! ## Module Overview
//!
//! - [`expire`]: deadlines, the bin codec, the record accessor and sweeps
//! - [`storage`]: the store boundary and an in-memory store
//! - [`protocol`]: RESP parser and types
//! - [`commands`]: RESP command dispatch
//! - [`connection`]: client connection management
//! - [`config`]: server flags

pub mod commands;
pub mod config;
pub mod connection;
pub mod expire;
pub mod protocol;
pub mod storage;

pub use commands::CommandHandler;
pub use config::Config;
pub use connection::{handle_connection, ConnectionStats};
pub use expire::{ExpireBinError, RecordAccessor, SweepCoordinator, SweepScheduler};
pub use protocol::{ParseError, RespParser, RespValue};
pub use storage::{MemoryStore, RecordStore};

/// The default port (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

/// The default bind host
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
