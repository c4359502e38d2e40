/*!
 * RESP Framer
 *
 * Pure, I/O-free translation between command arguments and RESP wire bytes,
 * and between wire bytes and `Reply` values. The decoder never blocks: given
 * a prefix of a reply it reports `NeedMoreBytes` and the caller is expected
 * to come back with a longer buffer.
 */

use crate::error::FrameError;
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// Largest bulk payload accepted by default (the server's own proto-max-bulk-len).
pub const DEFAULT_MAX_BULK_LEN: usize = 512 * 1024 * 1024;
/// Largest array element count accepted by default.
pub const DEFAULT_MAX_ARRAY_LEN: usize = 1024 * 1024;
/// Deepest array nesting accepted by default.
pub const DEFAULT_MAX_DEPTH: usize = 32;
/// Longest simple string or error line accepted by default (the server's inline request limit).
pub const DEFAULT_MAX_LINE_LEN: usize = 64 * 1024;

/// Sign plus the 19 digits of `i64::MIN`.
const MAX_NUMBER_LEN: usize = 20;

const CRLF: &[u8] = b"\r\n";

/// Bounds applied while decoding a reply
///
/// A length prefix is attacker/corruption controlled, so it is checked
/// against these limits before anything is allocated for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLimits {
    /// Maximum bulk string payload in bytes
    pub max_bulk_len: usize,
    /// Maximum number of elements in a single array
    pub max_array_len: usize,
    /// Maximum array nesting depth
    pub max_depth: usize,
    /// Maximum simple string or error line length, excluding marker and CRLF
    pub max_line_len: usize,
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameLimits {
    pub const fn new() -> Self {
        Self {
            max_bulk_len: DEFAULT_MAX_BULK_LEN,
            max_array_len: DEFAULT_MAX_ARRAY_LEN,
            max_depth: DEFAULT_MAX_DEPTH,
            max_line_len: DEFAULT_MAX_LINE_LEN,
        }
    }

    pub const fn max_bulk_len(mut self, len: usize) -> Self {
        self.max_bulk_len = len;
        self
    }

    pub const fn max_array_len(mut self, len: usize) -> Self {
        self.max_array_len = len;
        self
    }

    pub const fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub const fn max_line_len(mut self, len: usize) -> Self {
        self.max_line_len = len;
        self
    }
}

/// A decoded server reply
///
/// Null bulk strings and null arrays are their own variants: `$-1` is never
/// confused with `$0` and `*-1` is never confused with `*0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `+OK\r\n`
    SimpleString(Bytes),
    /// `-ERR message\r\n`
    Error(Bytes),
    /// `:1000\r\n`
    Integer(i64),
    /// `$6\r\nfoobar\r\n`
    BulkString(Bytes),
    /// `$-1\r\n`
    Null,
    /// `*2\r\n...`
    Array(Vec<Reply>),
    /// `*-1\r\n`
    NullArray,
}

/// Outcome of one decode attempt over a buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseResult {
    /// The buffer holds only a prefix of a reply; keep it and read more.
    NeedMoreBytes,
    /// A complete reply and the number of leading bytes it occupied.
    Parsed(Reply, usize),
    /// The buffer can never become a valid reply.
    Malformed(FrameError),
}

//
// Command Encoding
//

/// Encode a command as a RESP array of bulk strings
///
/// Each element of `parts` becomes one length-prefixed argument, so spaces,
/// CRLF or any other bytes inside an argument are carried verbatim.
///
/// # Example
/// `["SET", "k", "v"]` encodes to `*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n`
pub fn encode<P: AsRef<[u8]>>(parts: &[P]) -> Bytes {
    let mut buf = BytesMut::with_capacity(encoded_len(parts));
    encode_into(parts, &mut buf);
    buf.freeze()
}

/// Append the encoding of `parts` to `buf`
pub fn encode_into<P: AsRef<[u8]>>(parts: &[P], buf: &mut BytesMut) {
    buf.reserve(encoded_len(parts));
    write_header(b'*', parts.len() as i64, buf);
    for part in parts {
        let part = part.as_ref();
        write_header(b'$', part.len() as i64, buf);
        buf.put_slice(part);
        buf.put_slice(CRLF);
    }
}

fn encoded_len<P: AsRef<[u8]>>(parts: &[P]) -> usize {
    // marker + digits + CRLF, digits rounded up to 20
    let header = 1 + MAX_NUMBER_LEN + 2;
    header + parts.iter().map(|p| header + p.as_ref().len() + 2).sum::<usize>()
}

/// Write `<marker><n>\r\n`
fn write_header(marker: u8, n: i64, buf: &mut BytesMut) {
    buf.put_u8(marker);
    buf.put_slice(n.to_string().as_bytes());
    buf.put_slice(CRLF);
}

//
// Reply Decoding
//

/// Try to decode one reply from the front of `data` using default limits
pub fn try_parse(data: &[u8]) -> ParseResult {
    try_parse_with(data, &FrameLimits::default())
}

/// Try to decode one reply from the front of `data`
///
/// Bytes after the first complete reply are not inspected; the returned
/// count tells the caller how much to drop from its buffer.
///
/// # Returns
/// * `Parsed(reply, consumed)` - a complete reply occupies `data[..consumed]`
/// * `NeedMoreBytes` - `data` is a valid but incomplete prefix (or empty)
/// * `Malformed(reason)` - no amount of further input can fix `data`
pub fn try_parse_with(data: &[u8], limits: &FrameLimits) -> ParseResult {
    match parse_reply(data, limits, 0) {
        Ok(Some((reply, consumed))) => ParseResult::Parsed(reply, consumed),
        Ok(None) => ParseResult::NeedMoreBytes,
        Err(e) => ParseResult::Malformed(e),
    }
}

/// `Ok(None)` means the buffer ends before the reply does.
fn parse_reply(
    data: &[u8],
    limits: &FrameLimits,
    depth: usize,
) -> Result<Option<(Reply, usize)>, FrameError> {
    let Some(&marker) = data.first() else {
        return Ok(None);
    };

    match marker {
        b'+' => Ok(line_end(data, 1, limits)?
            .map(|end| (Reply::SimpleString(Bytes::copy_from_slice(&data[1..end])), end + 2))),
        b'-' => Ok(line_end(data, 1, limits)?
            .map(|end| (Reply::Error(Bytes::copy_from_slice(&data[1..end])), end + 2))),
        b':' => Ok(read_number(data)?.map(|(n, used)| (Reply::Integer(n), used))),
        b'$' => Ok(bulk_extent(data, limits)?.map(|bulk| match bulk {
            Bulk::Null(used) => (Reply::Null, used),
            Bulk::Payload { start, end } => (
                Reply::BulkString(Bytes::copy_from_slice(&data[start..end])),
                end + 2,
            ),
        })),
        b'*' => parse_array(data, limits, depth),
        other => Err(FrameError::InvalidMarker(other)),
    }
}

/// Index of the CR of the first CRLF after the marker byte
///
/// The search starts at `from`, so a caller that already looked at part of
/// the line does not look at it again. A line longer than `max_line_len` is
/// rejected whether or not its CRLF has arrived.
fn line_end(data: &[u8], from: usize, limits: &FrameLimits) -> Result<Option<usize>, FrameError> {
    let from = from.max(1);
    let found = data
        .get(from..)
        .and_then(|rest| rest.windows(2).position(|w| w == CRLF))
        .map(|pos| pos + from);

    // Without a CRLF the last byte may be a pending CR
    let line_len = match found {
        Some(end) => end - 1,
        None => data.len().saturating_sub(2),
    };
    if line_len > limits.max_line_len {
        return Err(FrameError::LineTooLong {
            max: limits.max_line_len,
        });
    }
    Ok(found)
}

/// Read `<marker><decimal>\r\n`
///
/// Rejects a bad byte as soon as it is seen instead of waiting for a CRLF
/// that a garbage stream might never send.
///
/// # Returns
/// * `Ok(Some((value, bytes_consumed)))` including marker and CRLF
/// * `Ok(None)` if the line is not terminated yet
fn read_number(data: &[u8]) -> Result<Option<(i64, usize)>, FrameError> {
    let invalid = |upto: usize| {
        FrameError::InvalidInteger(String::from_utf8_lossy(&data[1..upto]).into_owned())
    };

    let negative = data.get(1) == Some(&b'-');
    let digits_start = if negative { 2 } else { 1 };
    let mut i = digits_start;
    let mut n: i64 = 0;

    while i < data.len() {
        let c = data[i];
        if c == b'\r' {
            break;
        }
        if !c.is_ascii_digit() || i > MAX_NUMBER_LEN {
            return Err(invalid(i + 1));
        }
        // `-0` is not a value any server writes, and `$-0` must not read as `$0`
        if negative && i == digits_start && c == b'0' {
            return Err(invalid(i + 1));
        }
        let d = (c - b'0') as i64;
        n = n
            .checked_mul(10)
            .and_then(|n| if negative { n.checked_sub(d) } else { n.checked_add(d) })
            .ok_or_else(|| invalid(i + 1))?;
        i += 1;
    }

    if i == data.len() {
        return Ok(None);
    }
    if i == digits_start {
        return Err(invalid(i));
    }
    match data.get(i + 1).copied() {
        None => Ok(None),
        Some(b'\n') => Ok(Some((n, i + 2))),
        Some(_) => Err(invalid(i + 2)),
    }
}

/// Where a bulk string sits in the buffer
enum Bulk {
    /// `$-1\r\n`, with its length
    Null(usize),
    /// Payload is `data[start..end]`; the trailing CRLF follows `end`
    Payload { start: usize, end: usize },
}

/// Locate `$<len>\r\n<payload>\r\n` or `$-1\r\n` without copying the payload
fn bulk_extent(data: &[u8], limits: &FrameLimits) -> Result<Option<Bulk>, FrameError> {
    let Some((len, header)) = read_number(data)? else {
        return Ok(None);
    };

    if len == -1 {
        return Ok(Some(Bulk::Null(header)));
    }
    let len = usize::try_from(len).map_err(|_| FrameError::InvalidLength(len))?;
    if len > limits.max_bulk_len {
        return Err(FrameError::BulkTooLong {
            len,
            max: limits.max_bulk_len,
        });
    }

    let end = header
        .checked_add(len)
        .filter(|end| end.checked_add(2).is_some())
        .ok_or(FrameError::BulkTooLong {
            len,
            max: limits.max_bulk_len,
        })?;
    // Fail early if the byte after the payload is already known to be wrong
    if data.len() > end && data[end] != b'\r' {
        return Err(FrameError::MissingCrlf);
    }
    if data.len() < end + 2 {
        return Ok(None);
    }
    if &data[end..end + 2] != CRLF {
        return Err(FrameError::MissingCrlf);
    }

    Ok(Some(Bulk::Payload { start: header, end }))
}

/// Read `*<count>\r\n`; the count is `None` for the null array `*-1\r\n`
fn array_header(
    data: &[u8],
    limits: &FrameLimits,
    depth: usize,
) -> Result<Option<(Option<usize>, usize)>, FrameError> {
    if depth >= limits.max_depth {
        return Err(FrameError::NestingTooDeep(depth + 1));
    }

    let Some((count, header)) = read_number(data)? else {
        return Ok(None);
    };

    if count == -1 {
        return Ok(Some((None, header)));
    }
    let count = usize::try_from(count).map_err(|_| FrameError::InvalidLength(count))?;
    if count > limits.max_array_len {
        return Err(FrameError::ArrayTooLarge {
            len: count,
            max: limits.max_array_len,
        });
    }
    Ok(Some((Some(count), header)))
}

/// Parse `*<count>\r\n` followed by `count` nested replies, or `*-1\r\n`
fn parse_array(
    data: &[u8],
    limits: &FrameLimits,
    depth: usize,
) -> Result<Option<(Reply, usize)>, FrameError> {
    let Some((count, mut cursor)) = array_header(data, limits, depth)? else {
        return Ok(None);
    };
    let Some(count) = count else {
        return Ok(Some((Reply::NullArray, cursor)));
    };

    // Do not trust the declared count for the allocation size
    let mut items = Vec::with_capacity(count.min(64));
    for _ in 0..count {
        match parse_reply(&data[cursor..], limits, depth + 1)? {
            Some((item, used)) => {
                items.push(item);
                cursor += used;
            }
            None => return Ok(None),
        }
    }

    Ok(Some((Reply::Array(items), cursor)))
}

//
// Completeness Scanning
//

/// Incremental "is there a whole reply yet" check
///
/// Walks the buffer element by element without building any `Reply` and
/// keeps its place between calls, so a reply that arrives over many reads
/// is walked once in total instead of once per read. It applies the same
/// checks as `try_parse_with`: a prefix it accepts always parses.
///
/// The buffer passed to `scan` must be the one passed last time, possibly
/// extended at the end. Call `reset` after consuming from its front.
#[derive(Debug, Default, Clone)]
pub struct FrameScanner {
    /// Start of the first element not yet known to be complete
    pos: usize,
    /// Offset into that element where a CRLF search resumes
    line_from: usize,
    /// Elements still missing from each open array, innermost last
    open: Vec<usize>,
}

enum Element {
    Leaf(usize),
    /// Header length and declared element count
    Array(usize, usize),
}

impl FrameScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.pos = 0;
        self.line_from = 0;
        self.open.clear();
    }

    /// # Returns
    /// * `Ok(Some(len))` - `data[..len]` is exactly one complete reply; the
    ///   scanner has reset itself
    /// * `Ok(None)` - more bytes are needed
    /// * `Err(reason)` - `data` can never become a valid reply
    pub fn scan(&mut self, data: &[u8], limits: &FrameLimits) -> Result<Option<usize>, FrameError> {
        if self.pos > data.len() {
            self.reset();
        }

        loop {
            let Some(element) = self.element(&data[self.pos..], limits)? else {
                return Ok(None);
            };
            self.line_from = 0;
            match element {
                Element::Array(used, count) if count > 0 => {
                    self.pos += used;
                    self.open.push(count);
                    continue;
                }
                Element::Array(used, _) | Element::Leaf(used) => self.pos += used,
            }

            // A value just finished; close every array it completes
            loop {
                match self.open.last_mut() {
                    None => {
                        let len = self.pos;
                        self.reset();
                        return Ok(Some(len));
                    }
                    Some(remaining) => {
                        *remaining -= 1;
                        if *remaining > 0 {
                            break;
                        }
                        self.open.pop();
                    }
                }
            }
        }
    }

    fn element(&mut self, data: &[u8], limits: &FrameLimits) -> Result<Option<Element>, FrameError> {
        let Some(&marker) = data.first() else {
            return Ok(None);
        };

        match marker {
            b'+' | b'-' => match line_end(data, self.line_from, limits)? {
                Some(end) => Ok(Some(Element::Leaf(end + 2))),
                None => {
                    // Last byte may be the CR of a split CRLF
                    self.line_from = data.len().saturating_sub(1);
                    Ok(None)
                }
            },
            b':' => Ok(read_number(data)?.map(|(_, used)| Element::Leaf(used))),
            b'$' => Ok(bulk_extent(data, limits)?.map(|bulk| match bulk {
                Bulk::Null(used) => Element::Leaf(used),
                Bulk::Payload { end, .. } => Element::Leaf(end + 2),
            })),
            b'*' => Ok(array_header(data, limits, self.open.len())?
                .map(|(count, used)| Element::Array(used, count.unwrap_or(0)))),
            other => Err(FrameError::InvalidMarker(other)),
        }
    }
}

//
// Reply Encoding and Accessors
//

impl Reply {
    /// Append the wire form of this reply to `buf`
    ///
    /// This is what a server would send; the client uses it for test peers.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        match self {
            Reply::SimpleString(s) => {
                buf.put_u8(b'+');
                buf.put_slice(s);
                buf.put_slice(CRLF);
            }
            Reply::Error(s) => {
                buf.put_u8(b'-');
                buf.put_slice(s);
                buf.put_slice(CRLF);
            }
            Reply::Integer(n) => write_header(b':', *n, buf),
            Reply::BulkString(b) => {
                write_header(b'$', b.len() as i64, buf);
                buf.put_slice(b);
                buf.put_slice(CRLF);
            }
            Reply::Null => buf.put_slice(b"$-1\r\n"),
            Reply::Array(items) => {
                write_header(b'*', items.len() as i64, buf);
                for item in items {
                    item.encode_into(buf);
                }
            }
            Reply::NullArray => buf.put_slice(b"*-1\r\n"),
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode_into(&mut buf);
        buf.freeze()
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    /// True for both the null bulk string and the null array
    pub fn is_null(&self) -> bool {
        matches!(self, Reply::Null | Reply::NullArray)
    }

    /// Payload of a simple string, error or bulk string
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Reply::SimpleString(b) | Reply::Error(b) | Reply::BulkString(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Reply::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Reply]> {
        match self {
            Reply::Array(items) => Some(items),
            _ => None,
        }
    }

    fn fmt_indented(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        match self {
            Reply::SimpleString(s) => write!(f, "{}", String::from_utf8_lossy(s)),
            Reply::Error(s) => write!(f, "(error) {}", String::from_utf8_lossy(s)),
            Reply::Integer(n) => write!(f, "(integer) {}", n),
            Reply::BulkString(b) => write!(f, "\"{}\"", b.escape_ascii()),
            Reply::Null | Reply::NullArray => f.write_str("(nil)"),
            Reply::Array(items) if items.is_empty() => f.write_str("(empty array)"),
            Reply::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, "\n{:indent$}", "", indent = indent)?;
                    }
                    let label = format!("{}) ", i + 1);
                    f.write_str(&label)?;
                    item.fmt_indented(f, indent + label.len())?;
                }
                Ok(())
            }
        }
    }
}

/// Renders like the store's command-line client, e.g. `(integer) 1`
impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_indented(f, 0)
    }
}
