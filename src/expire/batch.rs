//! Batch Operation Engine
//!
//! Multi-bin puts and touches against one record. A batch is applied to a
//! single loaded image and persisted with a single conditional write, so the
//! store's record-level atomicity is the transaction boundary: readers see
//! either the whole batch or none of it.
//!
//! Descriptors apply in order. A later descriptor for the same bin sees the
//! effect of the earlier one (last write wins).

use crate::expire::accessor::{apply_put, apply_touch, BinOutcome, OnMissing, RecordAccessor};
use crate::expire::deadline::DeadlineRequest;
use crate::expire::error::Result;
use crate::storage::{RecordKey, Value};

/// One put inside a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinMutation {
    /// Bin to create or update
    pub bin: String,
    /// New payload
    pub payload: Value,
    /// New deadline, or `None` to keep the current one
    pub request: Option<DeadlineRequest>,
}

impl BinMutation {
    /// A put with an explicit deadline request.
    pub fn new(bin: impl Into<String>, payload: impl Into<Value>, request: DeadlineRequest) -> Self {
        Self {
            bin: bin.into(),
            payload: payload.into(),
            request: Some(request),
        }
    }

    /// A put that keeps the bin's current deadline.
    pub fn keep_deadline(bin: impl Into<String>, payload: impl Into<Value>) -> Self {
        Self {
            bin: bin.into(),
            payload: payload.into(),
            request: None,
        }
    }
}

/// One deadline refresh inside a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinTouch {
    /// Bin whose deadline changes
    pub bin: String,
    /// New deadline
    pub request: DeadlineRequest,
}

impl BinTouch {
    /// Creates a touch descriptor.
    pub fn new(bin: impl Into<String>, request: DeadlineRequest) -> Self {
        Self {
            bin: bin.into(),
            request,
        }
    }
}

impl RecordAccessor {
    /// Applies several puts to one record atomically.
    ///
    /// Returns one outcome per descriptor. Rejected descriptors are skipped;
    /// the rest land together or not at all. The record is created if needed.
    pub fn put_many(&self, key: &RecordKey, mutations: &[BinMutation]) -> Result<Vec<BinOutcome>> {
        self.read_modify_write(key, OnMissing::Create, |bins, now| {
            let outcomes: Vec<BinOutcome> = mutations
                .iter()
                .map(|mutation| apply_put(bins, mutation, now))
                .collect();

            let dirty = outcomes.iter().any(BinOutcome::is_applied);
            if dirty {
                self.compact_on_write(key, bins, now);
            }
            (outcomes, dirty)
        })
    }

    /// Refreshes the deadlines of several bins of one record atomically.
    ///
    /// Missing or expired bins report [`BinOutcome::NotFound`] without
    /// affecting the other descriptors. Nothing is written unless at least one
    /// touch applied.
    pub fn touch_many(&self, key: &RecordKey, touches: &[BinTouch]) -> Result<Vec<BinOutcome>> {
        self.read_modify_write(key, OnMissing::Fail, |bins, now| {
            let outcomes: Vec<BinOutcome> = touches
                .iter()
                .map(|touch| apply_touch(bins, touch, now))
                .collect();

            let dirty = outcomes.iter().any(BinOutcome::is_applied);
            if dirty {
                self.compact_on_write(key, bins, now);
            }
            (outcomes, dirty)
        })
    }
}
