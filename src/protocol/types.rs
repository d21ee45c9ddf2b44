//! RESP2 value types
//!
//! Replies produced by the core and frames handed to it by the connection layer.

use bytes::Bytes;
use std::fmt;

/// RESP2 value types
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    /// Simple strings: +OK\r\n
    SimpleString(String),

    /// Errors: -Error message\r\n
    Error(String),

    /// Integers: :1000\r\n
    Integer(i64),

    /// Bulk strings: $6\r\nfoobar\r\n
    BulkString(Bytes),

    /// Null bulk string: $-1\r\n
    Null,

    /// Arrays: *2\r\n$3\r\nfoo\r\n$3\r\nbar\r\n
    Array(Vec<RespValue>),
}

impl RespValue {
    /// Create a simple string
    pub fn simple_string(s: impl Into<String>) -> Self {
        RespValue::SimpleString(s.into())
    }

    /// The canonical `+OK` reply
    pub fn ok() -> Self {
        RespValue::SimpleString("OK".to_string())
    }

    /// Create an error
    pub fn error(s: impl Into<String>) -> Self {
        RespValue::Error(s.into())
    }

    /// Create an integer
    pub fn integer(i: i64) -> Self {
        RespValue::Integer(i)
    }

    /// Create a bulk string from bytes
    pub fn bulk_string(b: impl Into<Bytes>) -> Self {
        RespValue::BulkString(b.into())
    }

    /// Create a null value
    pub fn null() -> Self {
        RespValue::Null
    }

    /// Create an array
    pub fn array(v: Vec<RespValue>) -> Self {
        RespValue::Array(v)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, RespValue::Error(_))
    }

    /// Try to extract array elements
    pub fn as_array(&self) -> Option<&Vec<RespValue>> {
        match self {
            RespValue::Array(arr) => Some(arr),
            _ => None,
        }
    }

    /// Try to extract bulk string bytes
    pub fn as_bulk_string(&self) -> Option<&Bytes> {
        match self {
            RespValue::BulkString(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Try to extract integer value
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            RespValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Convert a client frame into a command argument list.
    ///
    /// Commands arrive as arrays of bulk strings; integers are accepted and
    /// rendered in decimal so hand-written frames still work.
    pub fn into_command_args(self) -> Result<Vec<Bytes>, RespError> {
        let parts = match self {
            RespValue::Array(parts) if !parts.is_empty() => parts,
            RespValue::Array(_) => {
                return Err(RespError::InvalidProtocol("empty command array".to_string()))
            }
            _ => return Err(RespError::InvalidProtocol("expected array".to_string())),
        };

        parts
            .into_iter()
            .map(|part| match part {
                RespValue::BulkString(b) => Ok(b),
                RespValue::SimpleString(s) => Ok(Bytes::from(s)),
                RespValue::Integer(i) => Ok(Bytes::from(i.to_string())),
                other => Err(RespError::InvalidProtocol(format!(
                    "unexpected {} inside command",
                    other
                ))),
            })
            .collect()
    }
}

impl fmt::Display for RespValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RespValue::SimpleString(s) => write!(f, "SimpleString({})", s),
            RespValue::Error(e) => write!(f, "Error({})", e),
            RespValue::Integer(i) => write!(f, "Integer({})", i),
            RespValue::BulkString(b) => write!(f, "BulkString({} bytes)", b.len()),
            RespValue::Null => write!(f, "Null"),
            RespValue::Array(arr) => write!(f, "Array({} elements)", arr.len()),
        }
    }
}

/// RESP parsing errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RespError {
    /// Incomplete data, need more bytes
    #[error("Incomplete data")]
    Incomplete,

    /// Invalid protocol format
    #[error("{0}")]
    InvalidProtocol(String),

    /// Invalid UTF-8 in a textual field
    #[error("invalid UTF-8")]
    InvalidUtf8,

    /// Length or integer field could not be parsed
    #[error("invalid integer")]
    IntegerOverflow,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_command_args() {
        let frame = RespValue::array(vec![
            RespValue::bulk_string("SET"),
            RespValue::bulk_string("k"),
            RespValue::integer(5),
        ]);

        let args = frame.into_command_args().unwrap();
        assert_eq!(args, vec![Bytes::from("SET"), Bytes::from("k"), Bytes::from("5")]);
    }

    #[test]
    fn test_into_command_args_rejects_non_array() {
        assert!(RespValue::bulk_string("GET").into_command_args().is_err());
        assert!(RespValue::array(vec![]).into_command_args().is_err());
    }
}
