//! RESP value type and serialization.
//!
//! Each RESP frame starts with a type byte and ends with CRLF:
//!
//! ```text
//! +OK\r\n                    simple string
//! -NOTFOUND no such key\r\n  error
//! :1\r\n                     integer
//! $3\r\n{"a"\r\n             bulk string (length-prefixed)
//! $-1\r\n                    null
//! *2\r\n$3\r\nGET\r\n$1\r\na\r\n   array
//! ```

use bytes::Bytes;
use std::fmt;

/// The CRLF terminator used in RESP protocol
pub const CRLF: &[u8] = b"\r\n";

/// RESP protocol type prefixes
pub mod prefix {
    pub const SIMPLE_STRING: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// A value in the RESP protocol, used for both requests and replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// `+<string>\r\n`
    SimpleString(String),
    /// `-<CODE> <message>\r\n`
    Error(String),
    /// `:<integer>\r\n`
    Integer(i64),
    /// `$<length>\r\n<data>\r\n`
    BulkString(Bytes),
    /// `$-1\r\n`
    Null,
    /// `*<count>\r\n<elements...>`
    Array(Vec<RespValue>),
}

impl RespValue {
    pub fn simple_string(s: impl Into<String>) -> Self {
        RespValue::SimpleString(s.into())
    }

    /// Creates an error reply. The first word is the error code.
    pub fn error(s: impl Into<String>) -> Self {
        RespValue::Error(s.into())
    }

    pub fn integer(n: i64) -> Self {
        RespValue::Integer(n)
    }

    pub fn bulk_string(data: impl Into<Bytes>) -> Self {
        RespValue::BulkString(data.into())
    }

    pub fn null() -> Self {
        RespValue::Null
    }

    pub fn array(values: Vec<RespValue>) -> Self {
        RespValue::Array(values)
    }

    pub fn ok() -> Self {
        RespValue::SimpleString("OK".to_string())
    }

    pub fn pong() -> Self {
        RespValue::SimpleString("PONG".to_string())
    }

    /// Serializes the value to its wire format.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.serialize_into(&mut buf);
        buf
    }

    /// Serializes the value into an existing buffer.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        match self {
            RespValue::SimpleString(s) => write_line(buf, prefix::SIMPLE_STRING, s.as_bytes()),
            RespValue::Error(s) => write_line(buf, prefix::ERROR, s.as_bytes()),
            RespValue::Integer(n) => write_line(buf, prefix::INTEGER, n.to_string().as_bytes()),
            RespValue::BulkString(data) => {
                write_line(buf, prefix::BULK_STRING, data.len().to_string().as_bytes());
                buf.extend_from_slice(data);
                buf.extend_from_slice(CRLF);
            }
            RespValue::Null => write_line(buf, prefix::BULK_STRING, b"-1"),
            RespValue::Array(values) => {
                write_line(buf, prefix::ARRAY, values.len().to_string().as_bytes());
                for value in values {
                    value.serialize_into(buf);
                }
            }
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, RespValue::Null)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, RespValue::Error(_))
    }

    /// Returns the text of a simple or bulk string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RespValue::SimpleString(s) => Some(s),
            RespValue::BulkString(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }
}

fn write_line(buf: &mut Vec<u8>, prefix: u8, content: &[u8]) {
    buf.push(prefix);
    buf.extend_from_slice(content);
    buf.extend_from_slice(CRLF);
}

impl fmt::Display for RespValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RespValue::SimpleString(s) => write!(f, "{}", s),
            RespValue::Error(s) => write!(f, "(error) {}", s),
            RespValue::Integer(n) => write!(f, "(integer) {}", n),
            RespValue::BulkString(data) => match std::str::from_utf8(data) {
                Ok(s) => write!(f, "\"{}\"", s),
                Err(_) => write!(f, "(binary data, {} bytes)", data.len()),
            },
            RespValue::Null => write!(f, "(nil)"),
            RespValue::Array(values) if values.is_empty() => write!(f, "(empty array)"),
            RespValue::Array(values) => {
                for (i, v) in values.iter().enumerate() {
                    writeln!(f, "{}) {}", i + 1, v)?;
                }
                Ok(())
            }
        }
    }
}
