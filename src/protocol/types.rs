//! RESP Values
//!
//! The reply and request frames spoken on the wire, and their mapping onto the
//! store's [`Value`] model.
//!
//! ## Wire Format
//!
//! ```text
//! +OK\r\n                     simple string
//! -NOTFOUND record ...\r\n    error (first word is the error class)
//! :42\r\n                     integer
//! $5\r\nhello\r\n             bulk string      ($-1\r\n is nil)
//! *2\r\n:1\r\n:0\r\n          array
//! ```
//!
//! ## Value Mapping
//!
//! | RESP          | Value                       |
//! |---------------|-----------------------------|
//! | integer       | `Int`                       |
//! | bulk string   | `Str` if UTF-8, else `Bytes`|
//! | array         | `List`                      |
//! | (outgoing)    | `Map` → flat key/value array|

use crate::storage::Value;
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// The CRLF terminator
pub const CRLF: &[u8] = b"\r\n";

/// Type prefix bytes
pub mod prefix {
    pub const SIMPLE_STRING: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// One RESP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// `+<text>`; must not contain CRLF
    SimpleString(String),
    /// `-<CLASS> <message>`
    Error(String),
    /// `:<n>`
    Integer(i64),
    /// `$<len>` followed by binary-safe data
    BulkString(Bytes),
    /// Nil bulk string or nil array
    Null,
    /// `*<count>` followed by the elements
    Array(Vec<RespValue>),
}

impl RespValue {
    /// `+OK`
    pub fn ok() -> Self {
        RespValue::SimpleString("OK".to_string())
    }

    /// `+PONG`
    pub fn pong() -> Self {
        RespValue::SimpleString("PONG".to_string())
    }

    /// A simple string reply.
    pub fn simple_string(s: impl Into<String>) -> Self {
        RespValue::SimpleString(s.into())
    }

    /// A bulk string reply.
    pub fn bulk_string(data: impl Into<Bytes>) -> Self {
        RespValue::BulkString(data.into())
    }

    /// An error reply of the generic `ERR` class.
    pub fn error(message: impl fmt::Display) -> Self {
        Self::error_with_code("ERR", message)
    }

    /// An error reply whose first word is `code`.
    ///
    /// ```
    /// use binexpire::protocol::RespValue;
    ///
    /// let reply = RespValue::error_with_code("NOTFOUND", "record test:eb1 not found");
    /// assert_eq!(reply.serialize(), b"-NOTFOUND record test:eb1 not found\r\n");
    /// ```
    pub fn error_with_code(code: &str, message: impl fmt::Display) -> Self {
        RespValue::Error(format!("{} {}", code, message))
    }

    /// The error class of an error reply.
    pub fn error_code(&self) -> Option<&str> {
        match self {
            RespValue::Error(s) => s.split_whitespace().next(),
            _ => None,
        }
    }

    /// Serializes the frame into a fresh buffer.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        self.write_to(&mut buf);
        buf.to_vec()
    }

    /// Appends the wire form of the frame to `buf`.
    pub fn write_to(&self, buf: &mut BytesMut) {
        match self {
            RespValue::SimpleString(s) => write_line(buf, prefix::SIMPLE_STRING, s.as_bytes()),
            RespValue::Error(s) => write_line(buf, prefix::ERROR, s.as_bytes()),
            RespValue::Integer(n) => write_line(buf, prefix::INTEGER, n.to_string().as_bytes()),
            RespValue::BulkString(data) => {
                write_line(buf, prefix::BULK_STRING, data.len().to_string().as_bytes());
                buf.put_slice(data);
                buf.put_slice(CRLF);
            }
            RespValue::Null => write_line(buf, prefix::BULK_STRING, b"-1"),
            RespValue::Array(values) => {
                write_line(buf, prefix::ARRAY, values.len().to_string().as_bytes());
                for value in values {
                    value.write_to(buf);
                }
            }
        }
    }

    /// Text of a simple or UTF-8 bulk string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RespValue::SimpleString(s) => Some(s),
            RespValue::BulkString(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Parses a simple or bulk string as an integer, or returns an integer.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            RespValue::Integer(n) => Some(*n),
            other => other.as_str()?.parse().ok(),
        }
    }

    /// Consumes an array frame into its elements.
    pub fn into_array(self) -> Option<Vec<RespValue>> {
        match self {
            RespValue::Array(values) => Some(values),
            _ => None,
        }
    }

    /// Converts an incoming argument into a store value.
    ///
    /// Errors and nil have no store form.
    pub fn into_value(self) -> Option<Value> {
        match self {
            RespValue::Integer(n) => Some(Value::Int(n)),
            RespValue::SimpleString(s) => Some(Value::Str(s)),
            RespValue::BulkString(data) => Some(match std::str::from_utf8(&data) {
                Ok(s) => Value::Str(s.to_string()),
                Err(_) => Value::Bytes(data),
            }),
            RespValue::Array(values) => values
                .into_iter()
                .map(RespValue::into_value)
                .collect::<Option<Vec<_>>>()
                .map(Value::List),
            RespValue::Error(_) | RespValue::Null => None,
        }
    }
}

fn write_line(buf: &mut BytesMut, prefix: u8, content: &[u8]) {
    buf.reserve(content.len() + 3);
    buf.put_u8(prefix);
    buf.put_slice(content);
    buf.put_slice(CRLF);
}

impl From<Value> for RespValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Str(s) => RespValue::BulkString(Bytes::from(s)),
            Value::Int(n) => RespValue::Integer(n),
            Value::Bytes(b) => RespValue::BulkString(b),
            Value::List(values) => {
                RespValue::Array(values.into_iter().map(RespValue::from).collect())
            }
            Value::Map(map) => RespValue::Array(
                map.into_iter()
                    .flat_map(|(k, v)| [RespValue::BulkString(Bytes::from(k)), RespValue::from(v)])
                    .collect(),
            ),
        }
    }
}

impl From<Option<Value>> for RespValue {
    fn from(value: Option<Value>) -> Self {
        value.map_or(RespValue::Null, RespValue::from)
    }
}

impl fmt::Display for RespValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RespValue::SimpleString(s) => write!(f, "{}", s),
            RespValue::Error(s) => write!(f, "(error) {}", s),
            RespValue::Integer(n) => write!(f, "(integer) {}", n),
            RespValue::BulkString(data) => match std::str::from_utf8(data) {
                Ok(s) => write!(f, "\"{}\"", s),
                Err(_) => write!(f, "({} bytes)", data.len()),
            },
            RespValue::Null => write!(f, "(nil)"),
            RespValue::Array(values) if values.is_empty() => write!(f, "(empty array)"),
            RespValue::Array(values) => {
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{}) {}", i + 1, v)?;
                }
                Ok(())
            }
        }
    }
}
