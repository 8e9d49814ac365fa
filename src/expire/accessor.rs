//! Record Accessor
//!
//! All single-record expire-bin operations, and the only place that talks to
//! the store's atomic write primitive.
//!
//! ## Read-Modify-Write
//!
//! ```text
//!   ┌──────────────┐
//!   │ load(key)    │◄──────────────────────┐
//!   └──────┬───────┘                       │
//!          ▼                               │
//!   ┌──────────────┐                       │ Conflict
//!   │ apply(bins)  │  decode, evaluate,    │ (bounded retries)
//!   └──────┬───────┘  mutate, encode       │
//!          ▼                               │
//!   ┌──────────────────────────────┐       │
//!   │ write(key, bins, generation) │───────┘
//!   └──────────────────────────────┘
//! ```
//!
//! A mutation is never written without the generation observed by its load,
//! so concurrent accessors and sweeps on the same record serialize through the
//! store. Reads never write: expired bins are hidden until a write or a
//! reclaim removes them.

use crate::expire::codec::{self, CodecError, RESERVED_PREFIX};
use crate::expire::batch::{BinMutation, BinTouch};
use crate::expire::deadline::{
    remaining_ttl, Clock, Deadline, DeadlineRequest, SystemClock, Timestamp, Ttl,
};
use crate::expire::error::{ExpireBinError, Result};
use crate::storage::{BinFilter, BinMap, Expect, RecordKey, RecordStore, StoreError, Value};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Maximum length of a bin name in bytes.
pub const MAX_BIN_NAME_LEN: usize = 15;

/// Tunables shared by every operation of an accessor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPolicy {
    /// Time budget for one operation, propagated to every store call (default: 1s)
    pub timeout: Duration,

    /// Extra attempts after a write conflict (default: 8)
    pub max_retries: u32,

    /// Drop every expired bin of a record whenever it is written anyway (default: true)
    pub reclaim_on_write: bool,
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(1),
            max_retries: 8,
            reclaim_on_write: true,
        }
    }
}

impl AccessPolicy {
    /// Sets the per-operation timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the conflict retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Enables or disables opportunistic reclaim on writes.
    pub fn with_reclaim_on_write(mut self, enabled: bool) -> Self {
        self.reclaim_on_write = enabled;
        self
    }
}

/// Why a batch descriptor was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// The bin name breaks the naming rules
    BinName,
    /// The payload can't be encoded
    Payload(CodecError),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::BinName => write!(f, "invalid bin name"),
            Rejection::Payload(e) => write!(f, "{}", e),
        }
    }
}

/// Per-bin result of a put or touch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BinOutcome {
    /// The mutation was applied
    Applied,
    /// The bin is missing or already expired
    NotFound,
    /// The descriptor was refused before touching the record
    Rejected(Rejection),
    /// The stored bin can't be decoded
    Corrupt(CodecError),
}

impl BinOutcome {
    /// True if the mutation was applied.
    pub fn is_applied(&self) -> bool {
        matches!(self, BinOutcome::Applied)
    }
}

/// What a read-modify-write does when the record doesn't exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OnMissing {
    /// Start from an empty record
    Create,
    /// Fail with `RecordNotFound`
    Fail,
}

/// Checks a bin name against the naming rules.
pub fn validate_bin_name(name: &str) -> std::result::Result<(), Rejection> {
    if name.is_empty() || name.len() > MAX_BIN_NAME_LEN || name.starts_with(RESERVED_PREFIX) {
        Err(Rejection::BinName)
    } else {
        Ok(())
    }
}

/// Performs expire-bin operations against one record at a time.
///
/// # Example
///
/// ```
/// use binexpire::expire::{DeadlineRequest, RecordAccessor};
/// use binexpire::storage::{MemoryStore, RecordKey, Value};
/// use std::sync::Arc;
///
/// let accessor = RecordAccessor::with_system_clock(Arc::new(MemoryStore::new()));
/// let key = RecordKey::new("test", "eb1");
///
/// accessor
///     .put(&key, "TestBin", Value::from("Hello World"), Some(DeadlineRequest::ExpireAfter(60)))
///     .unwrap();
/// assert_eq!(
///     accessor.get_one(&key, "TestBin").unwrap(),
///     Some(Value::from("Hello World"))
/// );
/// ```
#[derive(Debug, Clone)]
pub struct RecordAccessor {
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    policy: AccessPolicy,
}

impl RecordAccessor {
    /// Creates an accessor over `store`, reading time from `clock`.
    pub fn new(store: Arc<dyn RecordStore>, clock: Arc<dyn Clock>, policy: AccessPolicy) -> Self {
        Self {
            store,
            clock,
            policy,
        }
    }

    /// Creates an accessor with the system clock and the default policy.
    pub fn with_system_clock(store: Arc<dyn RecordStore>) -> Self {
        Self::new(store, Arc::new(SystemClock), AccessPolicy::default())
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// The policy in effect.
    pub fn policy(&self) -> &AccessPolicy {
        &self.policy
    }

    /// The current time according to the injected clock.
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    fn call_deadline(&self) -> Instant {
        Instant::now() + self.policy.timeout
    }

    /// Reads bins from a record.
    ///
    /// Returns one entry per requested name, in order: `Ok(Some(payload))` for
    /// a live bin, `Ok(None)` for a missing or expired bin and `Err` for a bin
    /// that can't be decoded. Expired and missing bins are indistinguishable.
    pub fn get<S: AsRef<str>>(
        &self,
        key: &RecordKey,
        bins: &[S],
    ) -> Result<Vec<std::result::Result<Option<Value>, CodecError>>> {
        let record = self
            .store
            .load(key, self.call_deadline())?
            .ok_or_else(|| ExpireBinError::RecordNotFound(key.clone()))?;
        let now = self.clock.now();

        Ok(bins
            .iter()
            .map(|name| match record.bins.get(name.as_ref()) {
                None => Ok(None),
                Some(stored) => codec::decode(stored).map(|(payload, deadline)| {
                    deadline.is_live(now).then_some(payload)
                }),
            })
            .collect())
    }

    /// Reads a single bin.
    pub fn get_one(&self, key: &RecordKey, bin: &str) -> Result<Option<Value>> {
        let mut values = self.get(key, &[bin])?;
        values
            .pop()
            .unwrap_or(Ok(None))
            .map_err(|source| ExpireBinError::CorruptBin {
                bin: bin.to_string(),
                source,
            })
    }

    /// Creates or updates a bin, creating the record if needed.
    ///
    /// With `request == None` a live bin keeps its current deadline and a new
    /// bin is stored as a permanent bin. An expired bin is overwritten as if it
    /// didn't exist.
    pub fn put(
        &self,
        key: &RecordKey,
        bin: &str,
        payload: Value,
        request: Option<DeadlineRequest>,
    ) -> Result<()> {
        let mutation = BinMutation {
            bin: bin.to_string(),
            payload,
            request,
        };

        let outcome = self
            .put_many(key, std::slice::from_ref(&mutation))?
            .pop()
            .unwrap_or(BinOutcome::Applied);

        match outcome {
            BinOutcome::Rejected(Rejection::BinName) => {
                Err(ExpireBinError::InvalidBinName(bin.to_string()))
            }
            BinOutcome::Rejected(Rejection::Payload(source))
            | BinOutcome::Corrupt(source) => Err(ExpireBinError::InvalidPayload {
                bin: bin.to_string(),
                source,
            }),
            BinOutcome::Applied | BinOutcome::NotFound => Ok(()),
        }
    }

    /// Replaces the deadline of a live bin, keeping its payload.
    ///
    /// A missing or expired bin reports [`BinOutcome::NotFound`] and stays
    /// absent.
    pub fn touch(
        &self,
        key: &RecordKey,
        bin: &str,
        request: DeadlineRequest,
    ) -> Result<BinOutcome> {
        let touch = BinTouch {
            bin: bin.to_string(),
            request,
        };
        Ok(self
            .touch_many(key, std::slice::from_ref(&touch))?
            .pop()
            .unwrap_or(BinOutcome::NotFound))
    }

    /// Returns the remaining lifetime of a bin.
    pub fn ttl(&self, key: &RecordKey, bin: &str) -> Result<Ttl> {
        let record = self
            .store
            .load(key, self.call_deadline())?
            .ok_or_else(|| ExpireBinError::RecordNotFound(key.clone()))?;

        let Some(stored) = record.bins.get(bin) else {
            return Ok(Ttl::Absent);
        };
        let deadline = codec::decode_deadline(stored).map_err(|source| ExpireBinError::CorruptBin {
            bin: bin.to_string(),
            source,
        })?;

        Ok(remaining_ttl(deadline.at(), self.clock.now()))
    }

    /// Physically removes every expired bin of a record.
    ///
    /// Returns the number of bins removed. Nothing is written when nothing
    /// expired.
    pub fn reclaim(&self, key: &RecordKey) -> Result<usize> {
        self.reclaim_bins(key, None)
    }

    /// Physically removes expired bins, limited to `filter` when given.
    pub fn reclaim_bins(&self, key: &RecordKey, filter: Option<&BinFilter>) -> Result<usize> {
        let removed = self.read_modify_write(key, OnMissing::Fail, |bins, now| {
            let removed = remove_expired(key, bins, now, filter);
            (removed, removed > 0)
        })?;

        if removed > 0 {
            debug!(%key, removed, "Reclaimed expired bins");
        }
        Ok(removed)
    }

    /// Runs `apply` inside the store's compare-and-swap loop.
    ///
    /// `apply` returns its result and whether it changed the bins. It may run
    /// more than once when another writer wins the race.
    pub(crate) fn read_modify_write<T>(
        &self,
        key: &RecordKey,
        on_missing: OnMissing,
        mut apply: impl FnMut(&mut BinMap, Timestamp) -> (T, bool),
    ) -> Result<T> {
        let deadline = self.call_deadline();
        let attempts = self.policy.max_retries.saturating_add(1);

        for attempt in 1..=attempts {
            let loaded = self.store.load(key, deadline)?;
            let expect = Expect::from_loaded(loaded.as_ref());
            let mut bins = match (loaded, on_missing) {
                (Some(record), _) => record.bins,
                (None, OnMissing::Create) => BinMap::new(),
                (None, OnMissing::Fail) => return Err(ExpireBinError::RecordNotFound(key.clone())),
            };

            let (result, dirty) = apply(&mut bins, self.clock.now());
            if !dirty {
                return Ok(result);
            }

            match self.store.write(key, bins, expect, deadline) {
                Ok(generation) => {
                    trace!(%key, generation, attempt, "Record written");
                    return Ok(result);
                }
                Err(StoreError::Conflict) => {
                    debug!(%key, attempt, "Write conflict, reloading record");
                }
                Err(e) => return Err(e.into()),
            }
        }

        warn!(%key, attempts, "Giving up after repeated write conflicts");
        Err(ExpireBinError::Conflict {
            key: key.clone(),
            attempts,
        })
    }

    /// Drops all expired bins when the policy asks for it.
    pub(crate) fn compact_on_write(&self, key: &RecordKey, bins: &mut BinMap, now: Timestamp) {
        if self.policy.reclaim_on_write {
            let removed = remove_expired(key, bins, now, None);
            if removed > 0 {
                trace!(%key, removed, "Dropped expired bins while writing");
            }
        }
    }
}

/// The deadline a put or touch stores; a zero-second TTL means a permanent bin.
fn write_deadline(request: DeadlineRequest, now: Timestamp) -> Deadline {
    match request {
        DeadlineRequest::ExpireAfter(0) => Deadline::Permanent,
        other => other.resolve(now),
    }
}

/// Applies one put descriptor to a record image.
pub(crate) fn apply_put(bins: &mut BinMap, mutation: &BinMutation, now: Timestamp) -> BinOutcome {
    if let Err(rejection) = validate_bin_name(&mutation.bin) {
        return BinOutcome::Rejected(rejection);
    }

    let deadline = match mutation.request {
        Some(request) => write_deadline(request, now),
        None => match bins.get(&mutation.bin).map(codec::decode_deadline) {
            Some(Ok(current)) if current.is_live(now) => current,
            _ => Deadline::Permanent,
        },
    };

    match codec::encode(mutation.payload.clone(), deadline) {
        Ok(stored) => {
            bins.insert(mutation.bin.clone(), stored);
            BinOutcome::Applied
        }
        Err(e) => BinOutcome::Rejected(Rejection::Payload(e)),
    }
}

/// Applies one touch descriptor to a record image.
pub(crate) fn apply_touch(bins: &mut BinMap, touch: &BinTouch, now: Timestamp) -> BinOutcome {
    let Some(stored) = bins.get(&touch.bin) else {
        return BinOutcome::NotFound;
    };

    let (payload, current) = match codec::decode(stored) {
        Ok(decoded) => decoded,
        Err(e) => return BinOutcome::Corrupt(e),
    };
    if !current.is_live(now) {
        return BinOutcome::NotFound;
    }

    match codec::encode(payload, write_deadline(touch.request, now)) {
        Ok(stored) => {
            bins.insert(touch.bin.clone(), stored);
            BinOutcome::Applied
        }
        Err(e) => BinOutcome::Rejected(Rejection::Payload(e)),
    }
}

/// Removes expired bins from a record image and returns how many went.
///
/// Corrupt bins are kept.
pub(crate) fn remove_expired(
    key: &RecordKey,
    bins: &mut BinMap,
    now: Timestamp,
    filter: Option<&BinFilter>,
) -> usize {
    let before = bins.len();

    bins.retain(|name, stored| {
        if filter.is_some_and(|names| !names.contains(name)) {
            return true;
        }
        match codec::decode_deadline(stored) {
            Ok(deadline) => deadline.is_live(now),
            Err(e) => {
                warn!(%key, bin = %name, error = %e, "Skipping corrupt bin");
                true
            }
        }
    });

    before - bins.len()
}
