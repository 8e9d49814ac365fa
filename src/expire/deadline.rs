//! Deadlines and the Expiry Evaluator
//!
//! This module is the single source of truth for bin liveness. Both the read
//! path (lazy hide) and the reclaim path (physical delete) ask
//! [`is_live`], so the two can never disagree about whether a bin exists.
//!
//! ## Boundary
//!
//! A bin is live while `now < deadline`. At `now == deadline` it is already
//! expired.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Creates a timestamp from milliseconds since the epoch.
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Creates a timestamp from whole seconds since the epoch.
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(1000))
    }

    /// Milliseconds since the epoch.
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// Returns the timestamp `secs` seconds later, saturating.
    pub const fn plus_secs(self, secs: u64) -> Self {
        Self(self.0.saturating_add(secs.saturating_mul(1000)))
    }

    /// Returns the timestamp `d` later, saturating.
    pub fn plus(self, d: Duration) -> Self {
        let millis = u64::try_from(d.as_millis()).unwrap_or(u64::MAX);
        Self(self.0.saturating_add(millis))
    }

    /// Reads the system wall clock.
    pub fn now() -> Self {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        Self(u64::try_from(since_epoch.as_millis()).unwrap_or(u64::MAX))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// A source of the current time.
///
/// Injected into accessors and sweeps so tests can drive time explicitly.
pub trait Clock: Send + Sync + fmt::Debug {
    /// The current instant.
    fn now(&self) -> Timestamp;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    /// Creates a clock frozen at `start`.
    pub fn new(start: Timestamp) -> Self {
        Self {
            millis: AtomicU64::new(start.as_millis()),
        }
    }

    /// Moves the clock to `at`.
    pub fn set(&self, at: Timestamp) {
        self.millis.store(at.as_millis(), Ordering::SeqCst);
    }

    /// Moves the clock forward by `d`.
    pub fn advance(&self, d: Duration) {
        let millis = u64::try_from(d.as_millis()).unwrap_or(u64::MAX);
        self.millis.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.millis.load(Ordering::SeqCst))
    }
}

/// The deadline a client asks for when writing or touching a bin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeadlineRequest {
    /// Store as an ordinary bin with no deadline
    Permanent,
    /// Expire this many seconds after the write
    ExpireAfter(u64),
    /// Store as an expire bin that currently never expires
    ExpireNever,
}

impl DeadlineRequest {
    /// Converts the integer TTL used on the wire.
    ///
    /// `-1` never expires, `0` stores a permanent bin, `n > 0` expires after
    /// `n` seconds. Anything else is rejected.
    pub fn from_ttl(ttl: i64) -> Option<Self> {
        match ttl {
            -1 => Some(Self::ExpireNever),
            0 => Some(Self::Permanent),
            n if n > 0 => Some(Self::ExpireAfter(n.unsigned_abs())),
            _ => None,
        }
    }

    /// Resolves the request against the write time.
    pub fn resolve(self, now: Timestamp) -> Deadline {
        match self {
            Self::Permanent => Deadline::Permanent,
            Self::ExpireAfter(secs) => Deadline::At(now.plus_secs(secs)),
            Self::ExpireNever => Deadline::Never,
        }
    }
}

/// The stored deadline of a bin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Deadline {
    /// An ordinary bin
    Permanent,
    /// An expire bin without an expiration
    Never,
    /// An expire bin that expires at this instant
    At(Timestamp),
}

impl Deadline {
    /// The absolute expiration instant, if any.
    pub fn at(self) -> Option<Timestamp> {
        match self {
            Deadline::At(t) => Some(t),
            Deadline::Permanent | Deadline::Never => None,
        }
    }

    /// True for bins stored in the expire-bin envelope.
    pub fn is_expire_bin(self) -> bool {
        !matches!(self, Deadline::Permanent)
    }

    /// Liveness of a bin with this deadline.
    #[inline]
    pub fn is_live(self, now: Timestamp) -> bool {
        is_live(self.at(), now)
    }
}

/// Remaining lifetime of a bin as reported by a TTL query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// The bin exists and never expires
    Infinite,
    /// The bin expires in this many seconds (rounded up, at least 1)
    Seconds(u64),
    /// The bin is missing or already expired
    Absent,
}

impl Ttl {
    /// Integer form used on the wire: seconds, `-1` infinite, `-2` absent.
    pub fn as_wire(self) -> i64 {
        match self {
            Ttl::Infinite => -1,
            Ttl::Seconds(secs) => i64::try_from(secs).unwrap_or(i64::MAX),
            Ttl::Absent => -2,
        }
    }
}

/// Returns true if a bin with this deadline is live at `now`.
#[inline]
pub fn is_live(deadline: Option<Timestamp>, now: Timestamp) -> bool {
    match deadline {
        None => true,
        Some(d) => d > now,
    }
}

/// Returns the remaining TTL of a bin with this deadline at `now`.
pub fn remaining_ttl(deadline: Option<Timestamp>, now: Timestamp) -> Ttl {
    match deadline {
        None => Ttl::Infinite,
        Some(d) if is_live(Some(d), now) => {
            let millis = d.as_millis() - now.as_millis();
            Ttl::Seconds(millis.div_ceil(1000))
        }
        Some(_) => Ttl::Absent,
    }
}
