//! Expire-bin error types.
//!
//! Absence is not an error here: a missing or expired bin is reported as
//! `None`, [`Ttl::Absent`](super::Ttl::Absent) or
//! [`BinOutcome::NotFound`](super::BinOutcome::NotFound).

use crate::expire::codec::CodecError;
use crate::storage::{RecordKey, StoreError};
use thiserror::Error;

/// Result type for expire-bin operations.
pub type Result<T> = std::result::Result<T, ExpireBinError>;

/// Errors surfaced by the record accessor, batch engine and sweeps.
#[derive(Debug, Error)]
pub enum ExpireBinError {
    /// The record itself doesn't exist
    #[error("record {0} not found")]
    RecordNotFound(RecordKey),

    /// Concurrent writers kept winning the compare-and-swap
    #[error("record {key} still conflicting after {attempts} attempts")]
    Conflict { key: RecordKey, attempts: u32 },

    /// A store call ran past its deadline
    #[error("store call timed out")]
    Timeout,

    /// The store failed or can't be reached
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// A single requested bin is corrupt
    #[error("bin '{bin}' is corrupt: {source}")]
    CorruptBin {
        bin: String,
        #[source]
        source: CodecError,
    },

    /// The payload can't be stored
    #[error("bin '{bin}' payload rejected: {source}")]
    InvalidPayload {
        bin: String,
        #[source]
        source: CodecError,
    },

    /// The bin name breaks the naming rules
    #[error("invalid bin name '{0}'")]
    InvalidBinName(String),

    /// An integer TTL with no meaning
    #[error("invalid ttl {0}")]
    InvalidTtl(i64),

    /// A sweep worker panicked or was aborted
    #[error("sweep worker failed: {0}")]
    SweepJoin(#[from] tokio::task::JoinError),
}

impl From<StoreError> for ExpireBinError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Timeout => ExpireBinError::Timeout,
            StoreError::Unavailable(msg) => ExpireBinError::StoreUnavailable(msg),
            // Conflicts are retried by the accessor and only reach callers
            // through `ExpireBinError::Conflict`.
            StoreError::Conflict => ExpireBinError::StoreUnavailable("unexpected conflict".into()),
        }
    }
}

impl ExpireBinError {
    /// Short error class used as the RESP error prefix.
    pub fn code(&self) -> &'static str {
        match self {
            ExpireBinError::RecordNotFound(_) => "NOTFOUND",
            ExpireBinError::Conflict { .. } => "CONFLICT",
            ExpireBinError::Timeout => "TIMEOUT",
            ExpireBinError::StoreUnavailable(_) | ExpireBinError::SweepJoin(_) => "UNAVAILABLE",
            ExpireBinError::CorruptBin { .. } => "CORRUPT",
            ExpireBinError::InvalidPayload { .. }
            | ExpireBinError::InvalidBinName(_)
            | ExpireBinError::InvalidTtl(_) => "ERR",
        }
    }
}
