use crate::error::{Error, Result};
use bytes::{Bytes, BytesMut};
use memchr::memchr2;
use std::str;

/// One parsed RESP reply unit
#[derive(Debug, Clone)]
pub enum RespValue {
    SimpleString(Bytes),
    Error(String),
    Integer(i64),
    BulkString(Option<Bytes>),
    Array(Option<Vec<RespValue>>),
}

/// Incremental RESP reply parser
///
/// Bytes read off the socket are appended with `feed`; `parse_next` yields
/// each complete reply and `None` once the remaining bytes form only a
/// partial one.
pub struct RespParser {
    buffer: BytesMut,
    position: usize,
}

impl RespParser {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(16 * 1024),
            position: 0,
        }
    }

    /// Feed data into the parser
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Discard all buffered and partially parsed data
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.position = 0;
    }

    /// Parse next complete RESP value
    pub fn parse_next(&mut self) -> Result<Option<RespValue>> {
        if self.position >= self.buffer.len() {
            return Ok(None);
        }

        let remaining = &self.buffer[self.position..];

        match parse_value(remaining)? {
            Some((value, consumed)) => {
                self.position += consumed;

                // Compact buffer if needed
                if self.position > self.buffer.len() / 2 {
                    let _ = self.buffer.split_to(self.position);
                    self.position = 0;
                }

                Ok(Some(value))
            }
            None => Ok(None), // Need more data
        }
    }
}

/// Parse a RESP value from the front of the buffer
fn parse_value(buf: &[u8]) -> Result<Option<(RespValue, usize)>> {
    if buf.is_empty() {
        return Ok(None);
    }

    match buf[0] {
        b'+' => parse_simple_string(buf),
        b'-' => parse_error(buf),
        b':' => parse_integer(buf),
        b'$' => parse_bulk_string(buf),
        b'*' => parse_array(buf),
        other => Err(Error::Protocol(format!(
            "invalid RESP type byte: {}",
            other as char
        ))),
    }
}

/// Parse simple string: +OK\r\n
fn parse_simple_string(buf: &[u8]) -> Result<Option<(RespValue, usize)>> {
    if let Some(end) = find_crlf(buf) {
        let data = Bytes::copy_from_slice(&buf[1..end]);
        Ok(Some((RespValue::SimpleString(data), end + 2)))
    } else {
        Ok(None)
    }
}

/// Parse error: -ERR message\r\n
fn parse_error(buf: &[u8]) -> Result<Option<(RespValue, usize)>> {
    if let Some(end) = find_crlf(buf) {
        let msg = str::from_utf8(&buf[1..end])
            .map_err(|_| Error::Protocol("invalid UTF-8 in error reply".to_string()))?
            .to_string();
        Ok(Some((RespValue::Error(msg), end + 2)))
    } else {
        Ok(None)
    }
}

/// Parse integer: :123\r\n
fn parse_integer(buf: &[u8]) -> Result<Option<(RespValue, usize)>> {
    if let Some(end) = find_crlf(buf) {
        let num_str = str::from_utf8(&buf[1..end])
            .map_err(|_| Error::Protocol("invalid UTF-8 in integer reply".to_string()))?;
        let num = num_str
            .parse::<i64>()
            .map_err(|_| Error::Protocol(format!("invalid integer: {}", num_str)))?;
        Ok(Some((RespValue::Integer(num), end + 2)))
    } else {
        Ok(None)
    }
}

/// Parse bulk string: $6\r\nfoobar\r\n or $-1\r\n (null)
fn parse_bulk_string(buf: &[u8]) -> Result<Option<(RespValue, usize)>> {
    let len_end = match find_crlf(buf) {
        Some(pos) => pos,
        None => return Ok(None),
    };

    let len_str = str::from_utf8(&buf[1..len_end])
        .map_err(|_| Error::Protocol("invalid UTF-8 in bulk string length".to_string()))?;
    let len = len_str
        .parse::<i64>()
        .map_err(|_| Error::Protocol(format!("invalid bulk string length: {}", len_str)))?;

    if len < 0 {
        // Null bulk string
        return Ok(Some((RespValue::BulkString(None), len_end + 2)));
    }

    let len = len as usize;
    let data_start = len_end + 2;
    let data_end = data_start + len;

    // Check if we have enough data
    if buf.len() < data_end + 2 {
        return Ok(None);
    }

    // Verify CRLF after data
    if buf[data_end] != b'\r' || buf[data_end + 1] != b'\n' {
        return Err(Error::Protocol(
            "missing CRLF after bulk string".to_string(),
        ));
    }

    let data = Bytes::copy_from_slice(&buf[data_start..data_end]);
    Ok(Some((RespValue::BulkString(Some(data)), data_end + 2)))
}

/// Parse array: *2\r\n$3\r\nfoo\r\n$3\r\nbar\r\n
fn parse_array(buf: &[u8]) -> Result<Option<(RespValue, usize)>> {
    let len_end = match find_crlf(buf) {
        Some(pos) => pos,
        None => return Ok(None),
    };

    let len_str = str::from_utf8(&buf[1..len_end])
        .map_err(|_| Error::Protocol("invalid UTF-8 in array length".to_string()))?;
    let len = len_str
        .parse::<i64>()
        .map_err(|_| Error::Protocol(format!("invalid array length: {}", len_str)))?;

    if len < 0 {
        // Null array
        return Ok(Some((RespValue::Array(None), len_end + 2)));
    }

    let len = len as usize;
    let mut elements = Vec::with_capacity(len);
    let mut pos = len_end + 2;

    for _ in 0..len {
        match parse_value(&buf[pos..])? {
            Some((value, consumed)) => {
                elements.push(value);
                pos += consumed;
            }
            None => return Ok(None), // Need more data
        }
    }

    Ok(Some((RespValue::Array(Some(elements)), pos)))
}

/// Find CRLF in buffer
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    if buf.is_empty() {
        return None;
    }
    let mut pos = 0;
    while pos < buf.len() - 1 {
        if let Some(cr_pos) = memchr2(b'\r', b'\n', &buf[pos..]) {
            let cr_pos = pos + cr_pos;
            if cr_pos < buf.len() - 1 && buf[cr_pos] == b'\r' && buf[cr_pos + 1] == b'\n' {
                return Some(cr_pos);
            }
            pos = cr_pos + 1;
        } else {
            break;
        }
    }
    None
}

/// Encode a plain-text command as a RESP multibulk request
///
/// The command is split on ASCII whitespace, one bulk string per word,
/// matching what hiredis produces for format-free command text.
pub fn encode_command(command: &str) -> Result<Vec<u8>> {
    let args: Vec<&str> = command.split_ascii_whitespace().collect();
    if args.is_empty() {
        return Err(Error::EmptyCommand);
    }

    let mut out = Vec::with_capacity(command.len() + 16 * args.len());
    let mut num_buf = itoa::Buffer::new();

    out.push(b'*');
    out.extend_from_slice(num_buf.format(args.len()).as_bytes());
    out.extend_from_slice(b"\r\n");

    for arg in args {
        out.push(b'$');
        out.extend_from_slice(num_buf.format(arg.len()).as_bytes());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(arg.as_bytes());
        out.extend_from_slice(b"\r\n");
    }

    Ok(out)
}

impl Default for RespParser {
    fn default() -> Self {
        Self::new()
    }
}
