//! RESP Protocol
//!
//! The wire format of the expire-bin server: Redis Serialization Protocol
//! frames, decoded incrementally from a connection buffer.
//!
//! ## Example
//!
//! ```
//! use binexpire::protocol::{RespParser, RespValue};
//! use bytes::BytesMut;
//!
//! let mut buf = BytesMut::from(&b"*2\r\n$4\r\nECHO\r\n$2\r\nhi\r\n"[..]);
//! let frame = RespParser::new().decode(&mut buf).unwrap().unwrap();
//! assert_eq!(frame.into_array().map(|args| args.len()), Some(2));
//!
//! assert_eq!(RespValue::Integer(-2).serialize(), b":-2\r\n");
//! ```

pub mod parser;
pub mod types;

pub use parser::{parse_message, ParseError, ParseResult, RespParser};
pub use types::RespValue;
