//! Streaming RESP Decoder
//!
//! Decodes frames from the front of a connection's read buffer.
//!
//! ## Two Passes
//!
//! ```text
//!   BytesMut ──► frame_len() ──► None            (incomplete, read more)
//!                    │
//!                    ▼ Some(n)
//!              split_to(n).freeze() ──► read_frame() ──► RespValue
//! ```
//!
//! The first pass only measures and validates the frame, so a partial frame
//! never allocates. The second pass slices bulk strings out of the frozen
//! frame without copying them.
//!
//! Lines that don't start with a type prefix are inline commands
//! (`EBTTL test eb1 A\r\n`) and decode as an array of bulk strings.

use crate::protocol::types::{prefix, RespValue, CRLF};
use bytes::{Bytes, BytesMut};
use thiserror::Error;

/// Errors produced while decoding a frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// A length or integer field isn't a number
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// A text field isn't valid UTF-8
    #[error("invalid UTF-8 in frame")]
    InvalidUtf8,

    /// A negative length other than the nil marker
    #[error("invalid length: {0}")]
    InvalidLength(i64),

    /// A bulk string exceeds the size limit
    #[error("bulk string too large: {size} bytes (max: {max})")]
    TooLarge { size: usize, max: usize },

    /// Arrays nested deeper than the limit
    #[error("arrays nested deeper than {0}")]
    TooDeep(usize),

    /// Any other framing violation
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Result type for decoding.
pub type ParseResult<T> = Result<T, ParseError>;

/// Largest accepted bulk string (512 MB)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Deepest accepted array nesting
pub const MAX_NESTING_DEPTH: usize = 32;

/// A stateless RESP decoder with size limits.
#[derive(Debug, Clone)]
pub struct RespParser {
    max_bulk: usize,
    max_depth: usize,
}

impl Default for RespParser {
    fn default() -> Self {
        Self::new()
    }
}

impl RespParser {
    /// Creates a decoder with the default limits.
    pub fn new() -> Self {
        Self {
            max_bulk: MAX_BULK_SIZE,
            max_depth: MAX_NESTING_DEPTH,
        }
    }

    /// Creates a decoder with custom limits.
    pub fn with_limits(max_bulk: usize, max_depth: usize) -> Self {
        Self {
            max_bulk,
            max_depth,
        }
    }

    /// Decodes one frame from the front of `buf`.
    ///
    /// On success the frame's bytes are removed from `buf`. Returns `Ok(None)`
    /// and leaves `buf` untouched when the frame is incomplete.
    pub fn decode(&self, buf: &mut BytesMut) -> ParseResult<Option<RespValue>> {
        let Some(len) = self.frame_len(buf, 0, 0)? else {
            return Ok(None);
        };

        let frame = buf.split_to(len).freeze();
        let (value, _) = read_frame(&frame, 0)?;
        Ok(Some(value))
    }

    /// Length of the complete frame starting at `pos`, or `None` if more
    /// bytes are needed.
    fn frame_len(&self, buf: &[u8], pos: usize, depth: usize) -> ParseResult<Option<usize>> {
        let Some(&first) = buf.get(pos) else {
            return Ok(None);
        };
        let Some((line, next)) = read_line(buf, pos) else {
            return Ok(None);
        };

        match first {
            prefix::SIMPLE_STRING | prefix::ERROR => {
                std::str::from_utf8(&line[1..]).map_err(|_| ParseError::InvalidUtf8)?;
                Ok(Some(next - pos))
            }
            prefix::INTEGER => {
                parse_int(&line[1..])?;
                Ok(Some(next - pos))
            }
            prefix::BULK_STRING => {
                let Some(size) = parse_len(&line[1..])? else {
                    return Ok(Some(next - pos));
                };
                if size > self.max_bulk {
                    return Err(ParseError::TooLarge {
                        size,
                        max: self.max_bulk,
                    });
                }
                let end = next + size + CRLF.len();
                if buf.len() < end {
                    return Ok(None);
                }
                if &buf[next + size..end] != CRLF {
                    return Err(ParseError::Protocol(
                        "bulk string missing trailing CRLF".to_string(),
                    ));
                }
                Ok(Some(end - pos))
            }
            prefix::ARRAY => {
                let Some(count) = parse_len(&line[1..])? else {
                    return Ok(Some(next - pos));
                };
                if depth >= self.max_depth {
                    return Err(ParseError::TooDeep(self.max_depth));
                }
                let mut cursor = next;
                for _ in 0..count {
                    match self.frame_len(buf, cursor, depth + 1)? {
                        Some(n) => cursor += n,
                        None => return Ok(None),
                    }
                }
                Ok(Some(cursor - pos))
            }
            _ => {
                let text = std::str::from_utf8(line).map_err(|_| ParseError::InvalidUtf8)?;
                if text.split_whitespace().next().is_none() {
                    return Err(ParseError::Protocol("empty inline command".to_string()));
                }
                Ok(Some(next - pos))
            }
        }
    }
}

/// Builds the value of a frame already validated by `frame_len`.
fn read_frame(frame: &Bytes, pos: usize) -> ParseResult<(RespValue, usize)> {
    let (line, next) = read_line(frame, pos)
        .ok_or_else(|| ParseError::Protocol("truncated frame".to_string()))?;
    let Some(&first) = line.first() else {
        return Err(ParseError::Protocol("empty line".to_string()));
    };
    let text = || std::str::from_utf8(&line[1..]).map_err(|_| ParseError::InvalidUtf8);

    match first {
        prefix::SIMPLE_STRING => Ok((RespValue::SimpleString(text()?.to_string()), next)),
        prefix::ERROR => Ok((RespValue::Error(text()?.to_string()), next)),
        prefix::INTEGER => Ok((RespValue::Integer(parse_int(&line[1..])?), next)),
        prefix::BULK_STRING => match parse_len(&line[1..])? {
            None => Ok((RespValue::Null, next)),
            Some(size) => Ok((
                RespValue::BulkString(frame.slice(next..next + size)),
                next + size + CRLF.len(),
            )),
        },
        prefix::ARRAY => match parse_len(&line[1..])? {
            None => Ok((RespValue::Null, next)),
            Some(count) => {
                let mut values = Vec::with_capacity(count);
                let mut cursor = next;
                for _ in 0..count {
                    let (value, after) = read_frame(frame, cursor)?;
                    values.push(value);
                    cursor = after;
                }
                Ok((RespValue::Array(values), cursor))
            }
        },
        _ => {
            let start = pos;
            let words = std::str::from_utf8(line)
                .map_err(|_| ParseError::InvalidUtf8)?
                .split_whitespace()
                .map(|word| {
                    let offset = start + (word.as_ptr() as usize - line.as_ptr() as usize);
                    RespValue::BulkString(frame.slice(offset..offset + word.len()))
                })
                .collect();
            Ok((RespValue::Array(words), next))
        }
    }
}

/// The line starting at `pos` without its CRLF, and the offset after the CRLF.
#[inline]
fn read_line(buf: &[u8], pos: usize) -> Option<(&[u8], usize)> {
    let rest = buf.get(pos..)?;
    let end = rest.windows(2).position(|w| w == CRLF)?;
    Some((&rest[..end], pos + end + CRLF.len()))
}

fn parse_int(digits: &[u8]) -> ParseResult<i64> {
    let text = std::str::from_utf8(digits).map_err(|_| ParseError::InvalidUtf8)?;
    text.parse()
        .map_err(|_| ParseError::InvalidInteger(text.to_string()))
}

/// Parses a length field; `-1` is nil.
fn parse_len(digits: &[u8]) -> ParseResult<Option<usize>> {
    match parse_int(digits)? {
        -1 => Ok(None),
        n if n < 0 => Err(ParseError::InvalidLength(n)),
        n => usize::try_from(n)
            .map(Some)
            .map_err(|_| ParseError::InvalidLength(n)),
    }
}

/// Decodes a single frame from a byte slice.
///
/// Returns the value and the number of bytes it occupied.
pub fn parse_message(input: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    let mut buf = BytesMut::from(input);
    let value = RespParser::new().decode(&mut buf)?;
    Ok(value.map(|v| (v, input.len() - buf.len())))
}
