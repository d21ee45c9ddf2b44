//! RESP2 parser and encoder
//!
//! The parser works on a borrowed slice and only consumes from the read
//! buffer once a whole frame is available.

use super::types::{RespError, RespValue};
use bytes::{Buf, BufMut, Bytes, BytesMut};

const CRLF: &[u8] = b"\r\n";

/// Nested arrays deeper than this are rejected as malformed.
const MAX_DEPTH: usize = 8;

/// RESP2 Parser
pub struct RespParser;

impl RespParser {
    /// Parse one frame from the buffer.
    ///
    /// Returns `Ok(None)` if more data is needed; nothing is consumed then.
    pub fn parse(buf: &mut BytesMut) -> Result<Option<RespValue>, RespError> {
        match Self::parse_at(&buf[..], 0, 0) {
            Ok((value, consumed)) => {
                buf.advance(consumed);
                Ok(Some(value))
            }
            Err(RespError::Incomplete) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Parse one command frame into its argument list.
    pub fn parse_command(buf: &mut BytesMut) -> Result<Option<Vec<Bytes>>, RespError> {
        match Self::parse(buf)? {
            Some(frame) => frame.into_command_args().map(Some),
            None => Ok(None),
        }
    }

    fn parse_at(src: &[u8], pos: usize, depth: usize) -> Result<(RespValue, usize), RespError> {
        if pos >= src.len() {
            return Err(RespError::Incomplete);
        }
        if depth > MAX_DEPTH {
            return Err(RespError::InvalidProtocol("nesting too deep".to_string()));
        }

        let (line, next) = Self::line_at(src, pos + 1)?;

        match src[pos] {
            b'+' => {
                let s = std::str::from_utf8(line).map_err(|_| RespError::InvalidUtf8)?;
                Ok((RespValue::SimpleString(s.to_string()), next))
            }
            b'-' => {
                let s = std::str::from_utf8(line).map_err(|_| RespError::InvalidUtf8)?;
                Ok((RespValue::Error(s.to_string()), next))
            }
            b':' => Ok((RespValue::Integer(Self::number(line)?), next)),
            b'$' => {
                let len = Self::number(line)?;
                if len == -1 {
                    return Ok((RespValue::Null, next));
                }
                if len < 0 {
                    return Err(RespError::InvalidProtocol(format!(
                        "invalid bulk length {}",
                        len
                    )));
                }

                let end = next + len as usize;
                if src.len() < end + 2 {
                    return Err(RespError::Incomplete);
                }
                if &src[end..end + 2] != CRLF {
                    return Err(RespError::InvalidProtocol(
                        "missing CRLF after bulk string data".to_string(),
                    ));
                }
                Ok((
                    RespValue::BulkString(Bytes::copy_from_slice(&src[next..end])),
                    end + 2,
                ))
            }
            b'*' => {
                let count = Self::number(line)?;
                if count == -1 {
                    return Ok((RespValue::Null, next));
                }
                if count < 0 {
                    return Err(RespError::InvalidProtocol(format!(
                        "invalid multibulk length {}",
                        count
                    )));
                }

                let mut elements = Vec::with_capacity(count.min(1024) as usize);
                let mut cursor = next;
                for _ in 0..count {
                    let (value, after) = Self::parse_at(src, cursor, depth + 1)?;
                    elements.push(value);
                    cursor = after;
                }
                Ok((RespValue::Array(elements), cursor))
            }
            other => Err(RespError::InvalidProtocol(format!(
                "unknown type prefix '{}'",
                other as char
            ))),
        }
    }

    /// Returns the line starting at `start` (without CRLF) and the offset after it.
    fn line_at(src: &[u8], start: usize) -> Result<(&[u8], usize), RespError> {
        let rest = src.get(start..).ok_or(RespError::Incomplete)?;
        match rest.windows(2).position(|w| w == CRLF) {
            Some(i) => Ok((&rest[..i], start + i + 2)),
            None => Err(RespError::Incomplete),
        }
    }

    fn number(line: &[u8]) -> Result<i64, RespError> {
        std::str::from_utf8(line)
            .map_err(|_| RespError::InvalidUtf8)?
            .parse::<i64>()
            .map_err(|_| RespError::IntegerOverflow)
    }
}

/// RESP2 Encoder
pub struct RespEncoder;

impl RespEncoder {
    /// Encode a RESP value to bytes
    pub fn encode(value: &RespValue) -> Bytes {
        let mut buf = BytesMut::new();
        Self::encode_to(&mut buf, value);
        buf.freeze()
    }

    /// Encode a RESP value into an existing buffer
    pub fn encode_to(buf: &mut BytesMut, value: &RespValue) {
        match value {
            RespValue::SimpleString(s) => {
                buf.put_u8(b'+');
                buf.put_slice(s.as_bytes());
                buf.put_slice(CRLF);
            }
            RespValue::Error(e) => {
                buf.put_u8(b'-');
                buf.put_slice(e.as_bytes());
                buf.put_slice(CRLF);
            }
            RespValue::Integer(i) => {
                buf.put_u8(b':');
                buf.put_slice(i.to_string().as_bytes());
                buf.put_slice(CRLF);
            }
            RespValue::BulkString(bytes) => {
                buf.put_u8(b'$');
                buf.put_slice(bytes.len().to_string().as_bytes());
                buf.put_slice(CRLF);
                buf.put_slice(bytes);
                buf.put_slice(CRLF);
            }
            RespValue::Null => {
                buf.put_slice(b"$-1\r\n");
            }
            RespValue::Array(arr) => {
                buf.put_u8(b'*');
                buf.put_slice(arr.len().to_string().as_bytes());
                buf.put_slice(CRLF);
                for elem in arr {
                    Self::encode_to(buf, elem);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command() {
        let mut buf = BytesMut::from("*3\r\n$3\r\nSET\r\n$1\r\na\r\n$1\r\n1\r\n");
        let args = RespParser::parse_command(&mut buf).unwrap().unwrap();
        assert_eq!(args, vec![Bytes::from("SET"), Bytes::from("a"), Bytes::from("1")]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_frame_consumes_nothing() {
        let mut buf = BytesMut::from("*2\r\n$3\r\nGET\r\n$3\r\nfo");
        assert_eq!(RespParser::parse(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), 19);

        buf.extend_from_slice(b"o\r\n");
        let value = RespParser::parse(&mut buf).unwrap();
        assert_eq!(
            value,
            Some(RespValue::Array(vec![
                RespValue::bulk_string("GET"),
                RespValue::bulk_string("foo"),
            ]))
        );
    }

    #[test]
    fn test_pipelined_frames() {
        let mut buf = BytesMut::from("+OK\r\n:42\r\n$-1\r\n");
        assert_eq!(RespParser::parse(&mut buf).unwrap(), Some(RespValue::ok()));
        assert_eq!(RespParser::parse(&mut buf).unwrap(), Some(RespValue::Integer(42)));
        assert_eq!(RespParser::parse(&mut buf).unwrap(), Some(RespValue::Null));
        assert_eq!(RespParser::parse(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_invalid_prefix() {
        let mut buf = BytesMut::from("?what\r\n");
        assert!(matches!(
            RespParser::parse(&mut buf),
            Err(RespError::InvalidProtocol(_))
        ));
    }

    #[test]
    fn test_encode_array() {
        let value = RespValue::array(vec![RespValue::ok(), RespValue::integer(2), RespValue::Null]);
        assert_eq!(RespEncoder::encode(&value), Bytes::from("*3\r\n+OK\r\n:2\r\n$-1\r\n"));
    }
}
