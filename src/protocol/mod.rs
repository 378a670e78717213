//! RESP Protocol Implementation
//!
//! The wire format spoken by the TideKV server: RESP arrays of bulk strings
//! for requests, and RESP replies. Stored values travel as JSON text inside
//! bulk strings.
//!
//! ## Example
//!
//! ```
//! use tidekv::protocol::{parse_message, RespValue};
//!
//! let data = b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n";
//! let (value, consumed) = parse_message(data).unwrap().unwrap();
//! assert_eq!(consumed, data.len());
//! assert!(matches!(value, RespValue::Array(_)));
//!
//! assert_eq!(RespValue::ok().serialize(), b"+OK\r\n");
//! ```

pub mod parser;
pub mod types;

pub use parser::{parse_message, ParseError, ParseResult, RespParser};
pub use types::RespValue;
