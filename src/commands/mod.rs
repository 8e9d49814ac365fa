//! Command Module
//!
//! Maps RESP commands onto the expire-bin operations.
//!
//! ```text
//!   RespValue ──► CommandHandler ──► RecordAccessor ──► RecordStore
//!                       │
//!                       └── EBCLEAN ──► SweepCoordinator (detached)
//! ```
//!
//! See [`handler`] for the command table.

pub mod handler;

pub use handler::CommandHandler;
