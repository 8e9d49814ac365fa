//! Expire-Bin Module
//!
//! Per-bin expiration on top of a store that only expires whole records.
//!
//! ## Architecture
//!
//! ```text
//!   ┌──────────────────────────────────────────────┐
//!   │ RecordAccessor  get / put / touch / ttl /    │
//!   │                 reclaim, put_many/touch_many │
//!   └───────┬──────────────────────────┬───────────┘
//!           │                          │
//!           ▼                          ▼
//!   ┌───────────────┐        ┌──────────────────┐
//!   │ Deadline Codec│        │ Expiry Evaluator │
//!   │ (envelope)    │        │ is_live / ttl    │
//!   └───────────────┘        └──────────────────┘
//!           │
//!           ▼
//!   RecordStore (load / conditional write / scan)
//!           ▲
//!           │
//!   SweepCoordinator ◄── SweepScheduler
//! ```
//!
//! An expired bin is hidden from every read as soon as its deadline passes and
//! physically removed later, by a write to the same record or by a sweep.

pub mod accessor;
pub mod batch;
pub mod codec;
pub mod deadline;
pub mod error;
pub mod sweep;

#[cfg(test)]
mod testing;

pub use accessor::{validate_bin_name, AccessPolicy, BinOutcome, RecordAccessor, Rejection};
pub use batch::{BinMutation, BinTouch};
pub use codec::CodecError;
pub use deadline::{
    is_live, remaining_ttl, Clock, Deadline, DeadlineRequest, ManualClock, SystemClock, Timestamp,
    Ttl,
};
pub use error::{ExpireBinError, Result};
pub use sweep::{
    SweepConfig, SweepCoordinator, SweepHandle, SweepProgress, SweepReport, SweepScheduler,
    SweepState, SweepStatus, RETAINED_JOBS,
};
