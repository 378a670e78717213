//! Incremental RESP request parser.
//!
//! [`RespParser::parse`] looks at the front of a receive buffer and returns:
//!
//! - `Ok(Some((value, consumed)))` when a whole frame is present,
//! - `Ok(None)` when more bytes are needed,
//! - `Err(ParseError)` when the bytes can never form a valid frame.
//!
//! Besides RESP arrays, plain text lines (`GET key\r\n`) are accepted as
//! inline commands so the server can be driven from `nc` or `telnet`.

use crate::protocol::types::{prefix, RespValue, CRLF};
use bytes::Bytes;
use thiserror::Error;

/// Errors that can occur during RESP parsing.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    #[error("invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),

    #[error("invalid length: {0}")]
    InvalidLength(i64),

    #[error("protocol error: {0}")]
    ProtocolError(String),

    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum size of a single bulk string (16 MB)
pub const MAX_BULK_SIZE: usize = 16 * 1024 * 1024;

/// Maximum array nesting depth
pub const MAX_NESTING_DEPTH: usize = 8;

/// Maximum number of elements in one array
pub const MAX_ARRAY_LEN: usize = 1024 * 1024;

/// Stateless between calls; holds only the nesting depth of the frame being read.
#[derive(Debug, Default)]
pub struct RespParser {
    depth: usize,
}

impl RespParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts to parse one frame from the front of `buf`.
    pub fn parse(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        self.depth = 0;
        self.parse_value(buf)
    }

    fn parse_value(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        let Some(&first) = buf.first() else {
            return Ok(None);
        };

        match first {
            prefix::ARRAY => self.parse_array(buf),
            prefix::BULK_STRING => parse_bulk_string(buf),
            prefix::SIMPLE_STRING => Ok(read_line(&buf[1..]).map(|(line, used)| {
                let text = String::from_utf8_lossy(line).into_owned();
                (RespValue::SimpleString(text), used + 1)
            })),
            prefix::INTEGER => match read_line(&buf[1..]) {
                Some((line, used)) => Ok(Some((RespValue::Integer(parse_int(line)?), used + 1))),
                None => Ok(None),
            },
            prefix::ERROR => Err(ParseError::ProtocolError(
                "error frames are not valid requests".into(),
            )),
            _ => parse_inline(buf),
        }
    }

    /// `*<count>\r\n<elements...>`
    fn parse_array(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        let Some((header, mut consumed)) = read_line(&buf[1..]) else {
            return Ok(None);
        };
        consumed += 1;

        let count = parse_int(header)?;
        if count == -1 {
            return Ok(Some((RespValue::Null, consumed)));
        }
        if count < 0 {
            return Err(ParseError::InvalidLength(count));
        }
        let count = count as usize;
        if count > MAX_ARRAY_LEN {
            return Err(ParseError::MessageTooLarge {
                size: count,
                max: MAX_ARRAY_LEN,
            });
        }

        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            return Err(ParseError::ProtocolError(format!(
                "maximum nesting depth exceeded: {}",
                MAX_NESTING_DEPTH
            )));
        }

        let mut elements = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            match self.parse_value(&buf[consumed..])? {
                Some((value, used)) => {
                    elements.push(value);
                    consumed += used;
                }
                None => return Ok(None),
            }
        }

        self.depth -= 1;
        Ok(Some((RespValue::Array(elements), consumed)))
    }
}

/// `$<length>\r\n<data>\r\n`
fn parse_bulk_string(buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    let Some((header, header_len)) = read_line(&buf[1..]) else {
        return Ok(None);
    };

    let length = parse_int(header)?;
    if length == -1 {
        return Ok(Some((RespValue::Null, 1 + header_len)));
    }
    if length < 0 {
        return Err(ParseError::InvalidLength(length));
    }
    let length = length as usize;
    if length > MAX_BULK_SIZE {
        return Err(ParseError::MessageTooLarge {
            size: length,
            max: MAX_BULK_SIZE,
        });
    }

    let start = 1 + header_len;
    let end = start + length;
    if buf.len() < end + CRLF.len() {
        return Ok(None);
    }
    if &buf[end..end + CRLF.len()] != CRLF {
        return Err(ParseError::ProtocolError(
            "bulk string missing trailing CRLF".into(),
        ));
    }

    let data = Bytes::copy_from_slice(&buf[start..end]);
    Ok(Some((RespValue::BulkString(data), end + CRLF.len())))
}

/// A whitespace-separated text line, turned into an array of bulk strings.
///
/// Everything after the second word is kept as one argument, so
/// `PUT key {"a": 1}` carries its JSON value intact.
fn parse_inline(buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    let Some((line, consumed)) = read_line(buf) else {
        return Ok(None);
    };

    let line = std::str::from_utf8(line).map_err(|_| ParseError::InvalidUtf8("inline command"))?;
    let line = line.trim();
    if line.is_empty() {
        return Err(ParseError::ProtocolError("empty inline command".into()));
    }

    let mut args = Vec::new();
    let mut rest = line;
    for _ in 0..2 {
        if rest.is_empty() {
            break;
        }
        let (word, tail) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
        args.push(RespValue::BulkString(Bytes::copy_from_slice(word.as_bytes())));
        rest = tail.trim_start();
    }
    if !rest.is_empty() {
        args.push(RespValue::BulkString(Bytes::copy_from_slice(rest.as_bytes())));
    }

    Ok(Some((RespValue::Array(args), consumed)))
}

/// Splits off one CRLF-terminated line. Returns the line and the bytes used,
/// including the terminator.
fn read_line(buf: &[u8]) -> Option<(&[u8], usize)> {
    buf.windows(2)
        .position(|w| w == CRLF)
        .map(|pos| (&buf[..pos], pos + CRLF.len()))
}

fn parse_int(raw: &[u8]) -> ParseResult<i64> {
    let text = std::str::from_utf8(raw).map_err(|_| ParseError::InvalidUtf8("length"))?;
    text.parse()
        .map_err(|_| ParseError::InvalidInteger(text.to_string()))
}

/// Parses a single frame with a fresh parser.
pub fn parse_message(buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    RespParser::new().parse(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulk(s: &str) -> RespValue {
        RespValue::BulkString(Bytes::copy_from_slice(s.as_bytes()))
    }

    #[test]
    fn test_parse_command_array() {
        let data = b"*3\r\n$3\r\nPUT\r\n$1\r\na\r\n$7\r\n{\"b\":1}\r\n";
        let (value, consumed) = parse_message(data).unwrap().unwrap();

        assert_eq!(value, RespValue::Array(vec![bulk("PUT"), bulk("a"), bulk("{\"b\":1}")]));
        assert_eq!(consumed, data.len());
    }

    #[test]
    fn test_bulk_string_may_contain_crlf() {
        let data = b"$4\r\na\r\nb\r\n";
        let (value, consumed) = parse_message(data).unwrap().unwrap();
        assert_eq!(value, bulk("a\r\nb"));
        assert_eq!(consumed, data.len());
    }

    #[test]
    fn test_incomplete_frames() {
        assert_eq!(parse_message(b"").unwrap(), None);
        assert_eq!(parse_message(b"*2\r\n$3\r\nGET\r\n").unwrap(), None);
        assert_eq!(parse_message(b"$5\r\nhel").unwrap(), None);
        assert_eq!(parse_message(b"*1").unwrap(), None);
        assert_eq!(parse_message(b"GET key").unwrap(), None);
    }

    #[test]
    fn test_pipelined_frames() {
        let data = b"*1\r\n$4\r\nPING\r\n*2\r\n$3\r\nGET\r\n$1\r\nk\r\n";
        let mut parser = RespParser::new();

        let (first, used) = parser.parse(data).unwrap().unwrap();
        assert_eq!(first, RespValue::Array(vec![bulk("PING")]));

        let (second, rest) = parser.parse(&data[used..]).unwrap().unwrap();
        assert_eq!(second, RespValue::Array(vec![bulk("GET"), bulk("k")]));
        assert_eq!(used + rest, data.len());
    }

    #[test]
    fn test_inline_command_keeps_json_value() {
        let data = b"PUT user {\"name\": \"a b\"}\r\n";
        let (value, consumed) = parse_message(data).unwrap().unwrap();

        assert_eq!(
            value,
            RespValue::Array(vec![bulk("PUT"), bulk("user"), bulk("{\"name\": \"a b\"}")])
        );
        assert_eq!(consumed, data.len());
    }

    #[test]
    fn test_inline_short_command() {
        let (value, _) = parse_message(b"GETALL\r\n").unwrap().unwrap();
        assert_eq!(value, RespValue::Array(vec![bulk("GETALL")]));
    }

    #[test]
    fn test_null_frames() {
        assert_eq!(
            parse_message(b"$-1\r\n").unwrap(),
            Some((RespValue::Null, 5))
        );
        assert_eq!(
            parse_message(b"*-1\r\n").unwrap(),
            Some((RespValue::Null, 5))
        );
    }

    #[test]
    fn test_invalid_frames() {
        assert!(matches!(
            parse_message(b"$abc\r\n"),
            Err(ParseError::InvalidInteger(_))
        ));
        assert!(matches!(
            parse_message(b"$-5\r\n"),
            Err(ParseError::InvalidLength(-5))
        ));
        assert!(matches!(
            parse_message(b"$3\r\nabcXY"),
            Err(ParseError::ProtocolError(_))
        ));
        assert!(matches!(
            parse_message(b"-ERR nope\r\n"),
            Err(ParseError::ProtocolError(_))
        ));
        assert!(matches!(
            parse_message(b"   \r\n"),
            Err(ParseError::ProtocolError(_))
        ));
    }

    #[test]
    fn test_oversized_bulk_rejected() {
        let data = format!("${}\r\n", MAX_BULK_SIZE + 1);
        assert!(matches!(
            parse_message(data.as_bytes()),
            Err(ParseError::MessageTooLarge { .. })
        ));
    }

    #[test]
    fn test_nesting_limit() {
        let data = "*1\r\n".repeat(MAX_NESTING_DEPTH + 1);
        assert!(matches!(
            parse_message(data.as_bytes()),
            Err(ParseError::ProtocolError(_))
        ));
    }
}
