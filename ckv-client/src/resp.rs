//! # RESP2 Encoding and Parsing
//!
//! Purpose: Frame client commands and parse server replies, then narrow each
//! reply to the shape a command expects.
//!
//! ## Design Principles
//! 1. **State-Free Parsing**: Replies are parsed top-down with minimal state.
//! 2. **Buffer Reuse**: Caller provides buffers to avoid per-call allocations.
//! 3. **Binary-Safe**: Bulk strings are treated as raw bytes.
//! 4. **Fail Fast**: Invalid framing returns protocol errors immediately; a
//!    reply of the wrong shape is `UnexpectedResponse`, never coerced.

use std::io::{self, BufRead, Write};

use ckv_common::ScriptReply;

use crate::client::{ClientError, ClientResult};

/// Largest bulk payload accepted from the server (Redis `proto-max-bulk-len`).
const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Elements reserved up front for an array reply; larger arrays grow as read.
const MAX_ARRAY_PREALLOC: usize = 1024;

/// RESP2 reply value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// +OK or +PONG style replies.
    Simple(Vec<u8>),
    /// -ERR ... replies.
    Error(Vec<u8>),
    /// :123 replies.
    Integer(i64),
    /// $... bulk strings, with None for null.
    Bulk(Option<Vec<u8>>),
    /// *... arrays, with None for the null array.
    Array(Option<Vec<RespValue>>),
}

impl RespValue {
    /// Server error replies become `ClientError::Server`; everything else
    /// passes through.
    fn check(self) -> ClientResult<RespValue> {
        match self {
            RespValue::Error(message) => Err(ClientError::Server { message }),
            other => Ok(other),
        }
    }

    /// Expects `:n`.
    pub fn into_integer(self) -> ClientResult<i64> {
        match self.check()? {
            RespValue::Integer(value) => Ok(value),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Expects `:0` or `:1`-style flags; any positive count is true.
    pub fn into_flag(self) -> ClientResult<bool> {
        self.into_integer().map(|value| value > 0)
    }

    /// Expects `+OK` (true) or a null bulk (false), as returned by
    /// conditional SET.
    pub fn into_ok_or_nil(self) -> ClientResult<bool> {
        match self.check()? {
            RespValue::Simple(_) => Ok(true),
            RespValue::Bulk(None) | RespValue::Array(None) => Ok(false),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Expects a bulk string or null.
    pub fn into_optional_bulk(self) -> ClientResult<Option<Vec<u8>>> {
        match self.check()? {
            RespValue::Bulk(data) => Ok(data),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Expects `:n` or a null bulk, as returned by ZRANK.
    pub fn into_optional_integer(self) -> ClientResult<Option<i64>> {
        match self.check()? {
            RespValue::Integer(value) => Ok(Some(value)),
            RespValue::Bulk(None) => Ok(None),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Expects a bulk string holding a decimal float, as returned by ZINCRBY.
    pub fn into_float(self) -> ClientResult<f64> {
        let data = self
            .into_optional_bulk()?
            .ok_or(ClientError::UnexpectedResponse)?;
        parse_float(&data)
    }

    /// Expects an array of bulk strings, preserving server order.
    pub fn into_bulk_list(self) -> ClientResult<Vec<Vec<u8>>> {
        match self.check()? {
            RespValue::Array(None) => Ok(Vec::new()),
            RespValue::Array(Some(items)) => items
                .into_iter()
                .map(|item| match item {
                    RespValue::Bulk(Some(data)) => Ok(data),
                    _ => Err(ClientError::UnexpectedResponse),
                })
                .collect(),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Converts any non-error reply into a script result.
    pub fn into_script_reply(self) -> ClientResult<ScriptReply> {
        Ok(match self {
            RespValue::Error(message) => return Err(ClientError::Server { message }),
            RespValue::Simple(text) => ScriptReply::Status(String::from_utf8_lossy(&text).into_owned()),
            RespValue::Integer(value) => ScriptReply::Integer(value),
            RespValue::Bulk(None) | RespValue::Array(None) => ScriptReply::Nil,
            RespValue::Bulk(Some(data)) => ScriptReply::Bulk(data),
            RespValue::Array(Some(items)) => ScriptReply::Array(
                items
                    .into_iter()
                    .map(RespValue::into_script_reply)
                    .collect::<ClientResult<_>>()?,
            ),
        })
    }
}

/// Encodes a RESP2 array command into the provided buffer.
pub fn encode_command(args: &[&[u8]], out: &mut Vec<u8>) {
    // Writing into a Vec cannot fail.
    let _ = write!(out, "*{}\r\n", args.len());
    for arg in args {
        let _ = write!(out, "${}\r\n", arg.len());
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
}

/// Reads one RESP value from the buffered reader.
pub fn read_response<R: BufRead>(reader: &mut R, line_buf: &mut Vec<u8>) -> ClientResult<RespValue> {
    read_line(reader, line_buf)?;
    let (&tag, rest) = line_buf.split_first().ok_or(ClientError::Protocol)?;

    match tag {
        b'+' => Ok(RespValue::Simple(rest.to_vec())),
        b'-' => Ok(RespValue::Error(rest.to_vec())),
        b':' => Ok(RespValue::Integer(parse_i64(rest)?)),
        b'$' => {
            let len = parse_i64(rest)?;
            read_bulk(reader, len)
        }
        b'*' => {
            let len = parse_i64(rest)?;
            read_array(reader, len, line_buf)
        }
        _ => Err(ClientError::Protocol),
    }
}

fn read_bulk<R: BufRead>(reader: &mut R, len: i64) -> ClientResult<RespValue> {
    let Ok(len) = usize::try_from(len) else {
        return Ok(RespValue::Bulk(None));
    };
    if len > MAX_BULK_LEN {
        return Err(ClientError::Protocol);
    }
    // Payload plus trailing CRLF in one read.
    let mut data = vec![0u8; len + 2];
    reader.read_exact(&mut data)?;
    if !data.ends_with(b"\r\n") {
        return Err(ClientError::Protocol);
    }
    data.truncate(len);
    Ok(RespValue::Bulk(Some(data)))
}

fn read_array<R: BufRead>(
    reader: &mut R,
    len: i64,
    line_buf: &mut Vec<u8>,
) -> ClientResult<RespValue> {
    let Ok(len) = usize::try_from(len) else {
        return Ok(RespValue::Array(None));
    };
    let mut items = Vec::with_capacity(len.min(MAX_ARRAY_PREALLOC));
    for _ in 0..len {
        items.push(read_response(reader, line_buf)?);
    }
    Ok(RespValue::Array(Some(items)))
}

fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> ClientResult<()> {
    buf.clear();
    if reader.read_until(b'\n', buf)? == 0 {
        return Err(ClientError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed by server",
        )));
    }
    if !buf.ends_with(b"\r\n") {
        return Err(ClientError::Protocol);
    }
    buf.truncate(buf.len() - 2);
    Ok(())
}

fn parse_i64(data: &[u8]) -> ClientResult<i64> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or(ClientError::Protocol)
}

fn parse_float(data: &[u8]) -> ClientResult<f64> {
    let text = std::str::from_utf8(data).map_err(|_| ClientError::UnexpectedResponse)?;
    match text {
        "inf" | "+inf" => Ok(f64::INFINITY),
        "-inf" => Ok(f64::NEG_INFINITY),
        _ => text.parse().map_err(|_| ClientError::UnexpectedResponse),
    }
}

/// Formats a score the way Redis accepts it on the wire.
pub fn format_score(score: f64) -> String {
    if score == f64::INFINITY {
        "+inf".to_string()
    } else if score == f64::NEG_INFINITY {
        "-inf".to_string()
    } else {
        score.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn parse(bytes: &[u8]) -> ClientResult<RespValue> {
        let mut reader = Cursor::new(bytes.to_vec());
        let mut line = Vec::new();
        read_response(&mut reader, &mut line)
    }

    #[test]
    fn encodes_command() {
        let mut buf = Vec::new();
        encode_command(&[b"GET", b"key"], &mut buf);
        assert_eq!(&buf, b"*2\r\n$3\r\nGET\r\n$3\r\nkey\r\n");
    }

    #[test]
    fn encodes_empty_argument() {
        let mut buf = Vec::new();
        encode_command(&[b"SET", b"k", b""], &mut buf);
        assert_eq!(&buf, b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$0\r\n\r\n");
    }

    #[test]
    fn parses_scalars() {
        assert_eq!(parse(b"+OK\r\n").unwrap(), RespValue::Simple(b"OK".to_vec()));
        assert_eq!(parse(b":-42\r\n").unwrap(), RespValue::Integer(-42));
        assert_eq!(parse(b"$5\r\nhello\r\n").unwrap(), RespValue::Bulk(Some(b"hello".to_vec())));
        assert_eq!(parse(b"$-1\r\n").unwrap(), RespValue::Bulk(None));
        assert_eq!(parse(b"-ERR bad\r\n").unwrap(), RespValue::Error(b"ERR bad".to_vec()));
    }

    #[test]
    fn parses_nested_array_in_order() {
        let resp = parse(b"*3\r\n$1\r\na\r\n:2\r\n*-1\r\n").unwrap();
        assert_eq!(
            resp,
            RespValue::Array(Some(vec![
                RespValue::Bulk(Some(b"a".to_vec())),
                RespValue::Integer(2),
                RespValue::Array(None),
            ]))
        );
    }

    #[test]
    fn rejects_bad_framing() {
        assert!(matches!(parse(b"+OK\n"), Err(ClientError::Protocol)));
        assert!(matches!(parse(b"?what\r\n"), Err(ClientError::Protocol)));
        assert!(matches!(parse(b":12x\r\n"), Err(ClientError::Protocol)));
        assert!(matches!(parse(b"$3\r\nabcXY"), Err(ClientError::Protocol)));
    }

    #[test]
    fn closed_stream_is_io_error() {
        assert!(matches!(
            parse(b""),
            Err(ClientError::Io(err)) if err.kind() == io::ErrorKind::UnexpectedEof
        ));
        assert!(matches!(parse(b"$5\r\nab"), Err(ClientError::Io(_))));
    }

    #[test]
    fn oversized_lengths_are_bounded() {
        assert!(matches!(parse(b"$9999999999\r\n"), Err(ClientError::Protocol)));
        assert!(matches!(parse(b"*4294967295\r\n:1\r\n"), Err(ClientError::Io(_))));
    }

    #[test]
    fn narrows_reply_shapes() {
        assert!(RespValue::Simple(b"OK".to_vec()).into_ok_or_nil().unwrap());
        assert!(!RespValue::Bulk(None).into_ok_or_nil().unwrap());
        assert_eq!(RespValue::Bulk(None).into_optional_integer().unwrap(), None);
        assert_eq!(RespValue::Bulk(Some(b"6.5".to_vec())).into_float().unwrap(), 6.5);
        assert!(matches!(
            RespValue::Integer(1).into_optional_bulk(),
            Err(ClientError::UnexpectedResponse)
        ));
        assert!(matches!(
            RespValue::Error(b"WRONGTYPE".to_vec()).into_integer(),
            Err(ClientError::Server { .. })
        ));
    }

    #[test]
    fn script_reply_conversion() {
        let reply = RespValue::Array(Some(vec![RespValue::Integer(1), RespValue::Bulk(None)]))
            .into_script_reply()
            .unwrap();
        assert_eq!(reply, ScriptReply::Array(vec![ScriptReply::Integer(1), ScriptReply::Nil]));
    }

    #[test]
    fn formats_scores() {
        assert_eq!(format_score(1.0), "1");
        assert_eq!(format_score(-2.5), "-2.5");
        assert_eq!(format_score(f64::INFINITY), "+inf");
        assert_eq!(format_score(f64::NEG_INFINITY), "-inf");
    }
}
