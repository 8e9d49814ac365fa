//! Deadline Codec
//!
//! Maps a bin's logical `(payload, deadline)` pair onto the store's native
//! [`Value`] and back.
//!
//! ## Stored Form
//!
//! ```text
//! Permanent      →  <payload>                          (bare value)
//! Never          →  { "~eb.v": <payload>, "~eb.x": -1 }
//! At(t)          →  { "~eb.v": <payload>, "~eb.x": t }  (t in epoch millis)
//! ```
//!
//! Ordinary bins written by other clients decode as permanent bins, so expire
//! bins and normal bins can live side by side in one record.

use crate::expire::deadline::{Deadline, DeadlineRequest, Timestamp};
use crate::storage::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Prefix reserved for envelope keys and forbidden in bin names.
pub const RESERVED_PREFIX: &str = "~eb.";

/// Envelope key holding the payload.
pub const PAYLOAD_KEY: &str = "~eb.v";

/// Envelope key holding the expiration.
pub const EXPIRY_KEY: &str = "~eb.x";

/// Expiration marker for expire bins that never expire.
const NEVER_MARKER: i64 = -1;

/// A stored bin that can't be decoded, or a payload that can't be encoded.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The envelope lacks its payload entry
    #[error("expire bin envelope has no payload")]
    MissingPayload,

    /// The expiration entry isn't a valid marker or timestamp
    #[error("invalid expiration marker: {0:?}")]
    InvalidExpiry(Value),

    /// The envelope carries unexpected entries
    #[error("unexpected envelope entry '{0}'")]
    UnexpectedEntry(String),

    /// A bare payload would be mistaken for an envelope
    #[error("payload map uses reserved key '{0}'")]
    ReservedKey(String),
}

/// Encodes a payload with its resolved deadline.
pub fn encode(payload: Value, deadline: Deadline) -> Result<Value, CodecError> {
    if !deadline.is_expire_bin() {
        if let Some(key) = reserved_key(&payload) {
            return Err(CodecError::ReservedKey(key.to_string()));
        }
        return Ok(payload);
    }

    let expiry = match deadline.at() {
        Some(t) => i64::try_from(t.as_millis()).unwrap_or(i64::MAX),
        None => NEVER_MARKER,
    };

    let mut envelope = BTreeMap::new();
    envelope.insert(PAYLOAD_KEY.to_string(), payload);
    envelope.insert(EXPIRY_KEY.to_string(), Value::Int(expiry));
    Ok(Value::Map(envelope))
}

/// Encodes a payload for a deadline request made at `now`.
pub fn encode_request(
    payload: Value,
    request: DeadlineRequest,
    now: Timestamp,
) -> Result<Value, CodecError> {
    encode(payload, request.resolve(now))
}

/// Decodes a stored bin into its payload and deadline.
pub fn decode(stored: &Value) -> Result<(Value, Deadline), CodecError> {
    let (map, expiry) = match stored {
        Value::Map(map) => match map.get(EXPIRY_KEY) {
            Some(expiry) => (map, expiry),
            None => return Ok((stored.clone(), Deadline::Permanent)),
        },
        other => return Ok((other.clone(), Deadline::Permanent)),
    };

    if let Some(extra) = map.keys().find(|k| *k != PAYLOAD_KEY && *k != EXPIRY_KEY) {
        return Err(CodecError::UnexpectedEntry(extra.clone()));
    }

    let payload = map.get(PAYLOAD_KEY).ok_or(CodecError::MissingPayload)?;
    let deadline = match expiry {
        Value::Int(NEVER_MARKER) => Deadline::Never,
        Value::Int(millis) if *millis >= 0 => {
            Deadline::At(Timestamp::from_millis(millis.unsigned_abs()))
        }
        other => return Err(CodecError::InvalidExpiry(other.clone())),
    };

    Ok((payload.clone(), deadline))
}

/// Decodes only the deadline of a stored bin.
pub fn decode_deadline(stored: &Value) -> Result<Deadline, CodecError> {
    decode(stored).map(|(_, deadline)| deadline)
}

fn reserved_key(payload: &Value) -> Option<&str> {
    payload
        .as_map()?
        .keys()
        .find(|k| k.starts_with(RESERVED_PREFIX))
        .map(String::as_str)
}
