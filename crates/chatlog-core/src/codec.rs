//! Binary codec: the on-disk cache format for a [`Log`].
//!
//! Every offset and size field is `W` bytes wide, where `W` is picked by the
//! [`FormatMode`] (2, 4 or 8). Integers are written in the byte order named
//! by the endianness tag; the decoder only accepts files whose tag matches
//! the host.
//!
//! # Layout
//!
//! ```text
//! 0    u8      format mode tag
//! 1    u8      endianness tag
//! 2    [u8;6]  padding
//! 8    W x 9   line count, then section offsets:
//!              channel, user, name blob, message blob, name table,
//!              timestamps, author indices, message table   (0 = absent)
//!      i64 x 2 period begin / end (epoch ms)
//! ---- sections (W length prefix) ----
//!      channel | user | name blob | message blob | name table (W count, (W off, W size)*)
//! ---- per-line arrays (line count entries) ----
//!      timestamps i64 | author index W | message (W off, W size)
//! ```
//!
//! Author names are stored once: the name table is the log's sorted set of
//! distinct names and each line stores an index into it.

use crate::model::{LineView, Log, LogIdentifier, Span};
use crate::time::{millis_to_time, TimeError, TimePeriod};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

const PREAMBLE_LEN: usize = 8;
const HEADER_FIELDS: usize = 9;

/// Errors from encoding or decoding a log file.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot encode an invalid log")]
    InvalidLog,
    #[error("value {value} does not fit format mode {mode}")]
    Overflow { value: u64, mode: FormatMode },
    #[error("author {0:?} missing from the name table")]
    UnknownAuthor(String),
    #[error("unknown format mode tag {0}")]
    UnknownFormat(u8),
    #[error("unknown endianness tag {0}")]
    UnknownEndian(u8),
    #[error("file written with {0} byte order")]
    ForeignEndian(Endian),
    #[error("file truncated reading {0}")]
    Truncated(&'static str),
    #[error("missing required section {0}")]
    MissingSection(&'static str),
    #[error("author index {index} out of range ({names} names)")]
    AuthorIndex { index: u64, names: usize },
    #[error("span out of bounds in {0}")]
    OutOfBounds(&'static str),
    #[error("name table is not sorted and unique")]
    UnsortedNames,
    #[error("text is not valid UTF-8")]
    Utf8,
    #[error(transparent)]
    Time(#[from] TimeError),
}

// ---------------------------------------------------------------------------
// Format mode / endianness
// ---------------------------------------------------------------------------

/// Width of every offset and size field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatMode {
    U16,
    U32,
    U64,
}

impl FormatMode {
    pub const ALL: [FormatMode; 3] = [FormatMode::U16, FormatMode::U32, FormatMode::U64];

    pub fn tag(self) -> u8 {
        match self {
            FormatMode::U16 => 0,
            FormatMode::U32 => 1,
            FormatMode::U64 => 2,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(FormatMode::U16),
            1 => Some(FormatMode::U32),
            2 => Some(FormatMode::U64),
            _ => None,
        }
    }

    /// Field width in bytes.
    pub fn width(self) -> usize {
        match self {
            FormatMode::U16 => 2,
            FormatMode::U32 => 4,
            FormatMode::U64 => 8,
        }
    }

    pub fn max(self) -> u64 {
        match self {
            FormatMode::U16 => u16::MAX as u64,
            FormatMode::U32 => u32::MAX as u64,
            FormatMode::U64 => u64::MAX,
        }
    }

    fn header_len(self) -> usize {
        PREAMBLE_LEN + HEADER_FIELDS * self.width() + 16
    }

    /// The narrowest mode that can hold `log`.
    pub fn smallest_for(log: &Log) -> Self {
        FormatMode::ALL
            .into_iter()
            .find(|mode| encoded_len_bound(log, *mode) <= mode.max())
            .unwrap_or(FormatMode::U64)
    }
}

impl std::fmt::Display for FormatMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FormatMode::U16 => write!(f, "u16"),
            FormatMode::U32 => write!(f, "u32"),
            FormatMode::U64 => write!(f, "u64"),
        }
    }
}

/// Byte order tag stored in the file preamble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

impl Endian {
    #[cfg(target_endian = "little")]
    pub const NATIVE: Endian = Endian::Little;
    #[cfg(target_endian = "big")]
    pub const NATIVE: Endian = Endian::Big;

    pub fn tag(self) -> u8 {
        match self {
            Endian::Little => 0,
            Endian::Big => 1,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Endian::Little),
            1 => Some(Endian::Big),
            _ => None,
        }
    }
}

impl std::fmt::Display for Endian {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Endian::Little => write!(f, "little-endian"),
            Endian::Big => write!(f, "big-endian"),
        }
    }
}

/// Upper bound of the encoded size, assuming every section is present.
fn encoded_len_bound(log: &Log, mode: FormatMode) -> u64 {
    let w = mode.width() as u64;
    let id = log.id();
    let names: u64 = log.names().map(|n| n.len() as u64).sum();
    let messages: u64 = log.lines().iter().map(|l| l.message.len as u64).sum();
    let names_count = log.name_spans().len() as u64;
    let lines = log.len() as u64;

    mode.header_len() as u64
        + (w + id.channel.len() as u64)
        + (w + id.user.len() as u64)
        + (w + names)
        + (w + messages)
        + (w + 2 * w * names_count)
        + lines * (8 + 3 * w)
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

struct Encoder {
    buf: BytesMut,
    mode: FormatMode,
    endian: Endian,
}

impl Encoder {
    fn new(mode: FormatMode, endian: Endian) -> Self {
        Self {
            buf: BytesMut::new(),
            mode,
            endian,
        }
    }

    fn put_uint(&mut self, value: u64) -> Result<(), CodecError> {
        if value > self.mode.max() {
            return Err(CodecError::Overflow {
                value,
                mode: self.mode,
            });
        }
        let width = self.mode.width();
        match self.endian {
            Endian::Little => self.buf.put_uint_le(value, width),
            Endian::Big => self.buf.put_uint(value, width),
        }
        Ok(())
    }

    fn put_usize(&mut self, value: usize) -> Result<(), CodecError> {
        self.put_uint(value as u64)
    }

    fn put_i64(&mut self, value: i64) {
        match self.endian {
            Endian::Little => self.buf.put_i64_le(value),
            Endian::Big => self.buf.put_i64(value),
        }
    }

    fn put_section(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        self.put_usize(bytes.len())?;
        self.buf.put_slice(bytes);
        Ok(())
    }
}

/// Encode `log` into a standalone buffer.
pub fn encode(log: &Log, mode: FormatMode, endian: Endian) -> Result<Bytes, CodecError> {
    if !log.is_valid() {
        return Err(CodecError::InvalidLog);
    }
    let id = log.id();
    let base = mode.header_len();
    let mut body = Encoder::new(mode, endian);
    let here = |body: &Encoder| base + body.buf.len();

    let channel_off = here(&body);
    body.put_section(id.channel.as_bytes())?;

    let user_off = if id.user.is_empty() {
        0
    } else {
        let off = here(&body);
        body.put_section(id.user.as_bytes())?;
        off
    };

    let mut name_blob = String::new();
    let mut name_table = Vec::with_capacity(log.name_spans().len());
    for name in log.names() {
        name_table.push((name_blob.len(), name.len()));
        name_blob.push_str(name);
    }

    let mut message_blob = String::new();
    let mut message_table = Vec::with_capacity(log.len());
    let mut author_index = Vec::with_capacity(log.len());
    for line in log.lines() {
        let name = log.name(line);
        let index = log
            .name_index(name)
            .ok_or_else(|| CodecError::UnknownAuthor(name.to_string()))?;
        author_index.push(index);
        let message = log.message(line);
        message_table.push((message_blob.len(), message.len()));
        message_blob.push_str(message);
    }

    let has_names = !name_table.is_empty();
    let has_lines = !log.is_empty();

    let names_off = if has_names {
        let off = here(&body);
        body.put_section(name_blob.as_bytes())?;
        off
    } else {
        0
    };

    let messages_off = if has_lines {
        let off = here(&body);
        body.put_section(message_blob.as_bytes())?;
        off
    } else {
        0
    };

    let name_table_off = if has_names {
        let off = here(&body);
        body.put_usize(name_table.len())?;
        for (offset, size) in &name_table {
            body.put_usize(*offset)?;
            body.put_usize(*size)?;
        }
        off
    } else {
        0
    };

    let (timestamps_off, authors_off, message_table_off) = if has_lines {
        let timestamps_off = here(&body);
        for line in log.lines() {
            body.put_i64(line.time.timestamp_millis());
        }
        let authors_off = here(&body);
        for index in &author_index {
            body.put_usize(*index)?;
        }
        let message_table_off = here(&body);
        for (offset, size) in &message_table {
            body.put_usize(*offset)?;
            body.put_usize(*size)?;
        }
        (timestamps_off, authors_off, message_table_off)
    } else {
        (0, 0, 0)
    };

    // The last byte's offset must be representable too.
    let total = here(&body);
    if total as u64 > mode.max() {
        return Err(CodecError::Overflow {
            value: total as u64,
            mode,
        });
    }

    let mut out = Encoder::new(mode, endian);
    out.buf.reserve(total);
    out.buf.put_u8(mode.tag());
    out.buf.put_u8(endian.tag());
    out.buf.put_bytes(0, PREAMBLE_LEN - 2);
    for field in [
        log.len(),
        channel_off,
        user_off,
        names_off,
        messages_off,
        name_table_off,
        timestamps_off,
        authors_off,
        message_table_off,
    ] {
        out.put_usize(field)?;
    }
    out.put_i64(id.period.begin().timestamp_millis());
    out.put_i64(id.period.end().timestamp_millis());
    debug_assert_eq!(out.buf.len(), base);
    out.buf.unsplit(body.buf);
    Ok(out.buf.freeze())
}

/// Encode `log` and write it to `writer`.
pub fn serialize<W: Write>(
    writer: &mut W,
    log: &Log,
    mode: FormatMode,
    endian: Endian,
) -> Result<(), CodecError> {
    let bytes = encode(log, mode, endian)?;
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Parsed header of an encoded log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub mode: FormatMode,
    pub endian: Endian,
    pub line_count: u64,
    pub channel: u64,
    pub user: u64,
    pub names: u64,
    pub messages: u64,
    pub name_table: u64,
    pub timestamps: u64,
    pub authors: u64,
    pub message_table: u64,
    pub period: TimePeriod,
}

struct Reader<'a> {
    buf: &'a [u8],
    mode: FormatMode,
    endian: Endian,
}

impl<'a> Reader<'a> {
    fn bytes(&self, pos: usize, len: usize, what: &'static str) -> Result<&'a [u8], CodecError> {
        pos.checked_add(len)
            .and_then(|end| self.buf.get(pos..end))
            .ok_or(CodecError::Truncated(what))
    }

    fn uint(&self, pos: usize, what: &'static str) -> Result<u64, CodecError> {
        let width = self.mode.width();
        let mut field = self.bytes(pos, width, what)?;
        Ok(match self.endian {
            Endian::Little => field.get_uint_le(width),
            Endian::Big => field.get_uint(width),
        })
    }

    fn i64(&self, pos: usize, what: &'static str) -> Result<i64, CodecError> {
        let mut field = self.bytes(pos, 8, what)?;
        Ok(match self.endian {
            Endian::Little => field.get_i64_le(),
            Endian::Big => field.get_i64(),
        })
    }

    fn section(&self, offset: u64, what: &'static str) -> Result<&'a [u8], CodecError> {
        let pos = to_usize(offset, what)?;
        let len = to_usize(self.uint(pos, what)?, what)?;
        self.bytes(pos + self.mode.width(), len, what)
    }

    /// `count` fixed-size records starting at `offset`, bounds-checked up front.
    fn array(
        &self,
        offset: u64,
        count: usize,
        stride: usize,
        what: &'static str,
    ) -> Result<usize, CodecError> {
        let pos = to_usize(offset, what)?;
        let len = count
            .checked_mul(stride)
            .ok_or(CodecError::Truncated(what))?;
        self.bytes(pos, len, what)?;
        Ok(pos)
    }
}

fn to_usize(value: u64, what: &'static str) -> Result<usize, CodecError> {
    usize::try_from(value).map_err(|_| CodecError::OutOfBounds(what))
}

/// Read and validate the header of an encoded log.
pub fn read_header(buf: &[u8]) -> Result<Header, CodecError> {
    if buf.len() < PREAMBLE_LEN {
        return Err(CodecError::Truncated("preamble"));
    }
    let mode = FormatMode::from_tag(buf[0]).ok_or(CodecError::UnknownFormat(buf[0]))?;
    let endian = Endian::from_tag(buf[1]).ok_or(CodecError::UnknownEndian(buf[1]))?;
    if endian != Endian::NATIVE {
        return Err(CodecError::ForeignEndian(endian));
    }
    let r = Reader { buf, mode, endian };
    let w = mode.width();
    let field = |i: usize| r.uint(PREAMBLE_LEN + i * w, "header");
    let period_pos = PREAMBLE_LEN + HEADER_FIELDS * w;
    let begin = r.i64(period_pos, "header")?;
    let end = r.i64(period_pos + 8, "header")?;

    Ok(Header {
        mode,
        endian,
        line_count: field(0)?,
        channel: field(1)?,
        user: field(2)?,
        names: field(3)?,
        messages: field(4)?,
        name_table: field(5)?,
        timestamps: field(6)?,
        authors: field(7)?,
        message_table: field(8)?,
        period: TimePeriod::from_millis(begin, end)?,
    })
}

/// Decode a log from an in-memory buffer. Never returns a partial log.
pub fn decode(buf: &[u8]) -> Result<Log, CodecError> {
    let header = read_header(buf)?;
    let r = Reader {
        buf,
        mode: header.mode,
        endian: header.endian,
    };
    let w = header.mode.width();
    let utf8 = |bytes: &[u8]| std::str::from_utf8(bytes).map(str::to_owned).map_err(|_| CodecError::Utf8);

    if header.channel == 0 {
        return Err(CodecError::MissingSection("channel"));
    }
    let channel = utf8(r.section(header.channel, "channel")?)?;
    let user = match header.user {
        0 => String::new(),
        off => utf8(r.section(off, "user")?)?,
    };
    let name_blob = match header.names {
        0 => &[][..],
        off => r.section(off, "name blob")?,
    };
    let message_blob = match header.messages {
        0 => &[][..],
        off => r.section(off, "message blob")?,
    };

    let mut data = Vec::with_capacity(name_blob.len() + message_blob.len());
    data.extend_from_slice(name_blob);
    data.extend_from_slice(message_blob);
    let data = String::from_utf8(data).map_err(|_| CodecError::Utf8)?;
    let message_base = name_blob.len();

    let names = match header.name_table {
        0 => Vec::new(),
        off => {
            let count = to_usize(r.uint(to_usize(off, "name table")?, "name table")?, "name table")?;
            let start = r.array(off.saturating_add(w as u64), count, 2 * w, "name table")?;
            let mut names = Vec::with_capacity(count);
            for i in 0..count {
                let pos = start + i * 2 * w;
                let span = Span::new(
                    to_usize(r.uint(pos, "name table")?, "name table")?,
                    to_usize(r.uint(pos + w, "name table")?, "name table")?,
                );
                if span.end() > name_blob.len() || !span.fits(&data) {
                    return Err(CodecError::OutOfBounds("name table"));
                }
                names.push(span);
            }
            names
        }
    };
    if names
        .windows(2)
        .any(|pair| data[pair[0].range()] >= data[pair[1].range()])
    {
        return Err(CodecError::UnsortedNames);
    }

    let count = to_usize(header.line_count, "line count")?;
    let mut lines = Vec::new();
    if count > 0 {
        if header.timestamps == 0 || header.authors == 0 || header.message_table == 0 {
            return Err(CodecError::MissingSection("line arrays"));
        }
        let timestamps = r.array(header.timestamps, count, 8, "timestamps")?;
        let authors = r.array(header.authors, count, w, "author indices")?;
        let messages = r.array(header.message_table, count, 2 * w, "message table")?;
        lines.reserve(count);
        for i in 0..count {
            let time = millis_to_time(r.i64(timestamps + i * 8, "timestamps")?)?;
            let index = r.uint(authors + i * w, "author indices")?;
            let name = usize::try_from(index)
                .ok()
                .and_then(|i| names.get(i))
                .copied()
                .ok_or(CodecError::AuthorIndex {
                    index,
                    names: names.len(),
                })?;
            let pos = messages + i * 2 * w;
            let offset = to_usize(r.uint(pos, "message table")?, "message table")?;
            let len = to_usize(r.uint(pos + w, "message table")?, "message table")?;
            if offset.checked_add(len).map_or(true, |end| end > message_blob.len()) {
                return Err(CodecError::OutOfBounds("message table"));
            }
            let message = Span::new(message_base + offset, len);
            if !message.fits(&data) {
                return Err(CodecError::OutOfBounds("message table"));
            }
            lines.push(LineView {
                time,
                name,
                message,
            });
        }
    }

    let id = LogIdentifier {
        channel,
        period: header.period,
        user,
    };
    Ok(Log::from_parts(id, data, names, lines))
}

/// Read a whole stream and decode it.
pub fn try_deserialize<R: Read>(reader: &mut R) -> Result<Log, CodecError> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf)?;
    decode(&buf)
}

/// Read a whole stream and decode it, discarding the failure reason.
pub fn deserialize<R: Read>(reader: &mut R) -> Option<Log> {
    try_deserialize(reader)
        .map_err(|e| tracing::warn!(error = %e, "failed to decode log"))
        .ok()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::LogService;
    use crate::time::YearMonth;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn id(user: &str) -> LogIdentifier {
        LogIdentifier::user_log("foo", user, TimePeriod::month(YearMonth::new(2020, 1).unwrap()))
    }

    fn sample() -> Log {
        LogService::Gempir.parse(
            id(""),
            "[2020-01-01 00:00:01] #foo alice: hello world\n\
             [2020-01-01 00:00:02] #foo bob: hello again\n\
             [2020-01-01 00:00:03] #foo alice: ünïcode ✓\n"
                .to_string(),
        )
    }

    #[rstest]
    #[case::u16(FormatMode::U16)]
    #[case::u32(FormatMode::U32)]
    #[case::u64(FormatMode::U64)]
    fn round_trip(#[case] mode: FormatMode) {
        let log = sample();
        let bytes = encode(&log, mode, Endian::NATIVE).unwrap();
        let back = decode(&bytes).unwrap();
        assert_eq!(back, log);
        assert_eq!(back.names().collect::<Vec<_>>(), vec!["alice", "bob"]);
    }

    #[test]
    fn user_section_is_optional() {
        let log = LogService::Gempir.parse(id("alice"), "[2020-01-01 00:00:01] #foo alice: hi\n".into());
        let bytes = encode(&log, FormatMode::U32, Endian::NATIVE).unwrap();
        assert_ne!(read_header(&bytes).unwrap().user, 0);
        assert_eq!(decode(&bytes).unwrap().id().user, "alice");

        let bytes = encode(&sample(), FormatMode::U32, Endian::NATIVE).unwrap();
        assert_eq!(read_header(&bytes).unwrap().user, 0);
    }

    #[test]
    fn empty_log_round_trips() {
        let log = LogService::Gempir.parse(id(""), String::new());
        let bytes = encode(&log, FormatMode::U16, Endian::NATIVE).unwrap();
        let header = read_header(&bytes).unwrap();
        assert_eq!((header.names, header.timestamps), (0, 0));
        assert_eq!(decode(&bytes).unwrap(), log);
    }

    #[test]
    fn invalid_log_is_not_encoded() {
        let log = LogService::Gempir.parse(id(""), r#"{"message":"Failure reading log"}"#.into());
        assert!(matches!(
            encode(&log, FormatMode::U32, Endian::NATIVE),
            Err(CodecError::InvalidLog)
        ));
    }

    #[test]
    fn u16_overflow_is_reported() {
        let body: String = (0..2_000)
            .map(|i| format!("[2020-01-01 00:00:01] #foo user{i}: message number {i}\n"))
            .collect();
        let log = LogService::Gempir.parse(id(""), body);
        assert!(matches!(
            encode(&log, FormatMode::U16, Endian::NATIVE),
            Err(CodecError::Overflow { .. })
        ));
        assert_eq!(FormatMode::smallest_for(&log), FormatMode::U32);
        assert_eq!(FormatMode::smallest_for(&sample()), FormatMode::U16);
    }

    #[test]
    fn out_of_range_author_index_fails_whole_decode() {
        let log = sample();
        let mode = FormatMode::U32;
        let mut bytes = encode(&log, mode, Endian::NATIVE).unwrap().to_vec();
        let authors = read_header(&bytes).unwrap().authors as usize;
        let bad = 99u32;
        let raw = match Endian::NATIVE {
            Endian::Little => bad.to_le_bytes(),
            Endian::Big => bad.to_be_bytes(),
        };
        bytes[authors..authors + 4].copy_from_slice(&raw);
        assert!(matches!(
            decode(&bytes),
            Err(CodecError::AuthorIndex { index: 99, names: 2 })
        ));
    }

    #[test]
    fn every_truncation_fails() {
        let bytes = encode(&sample(), FormatMode::U16, Endian::NATIVE).unwrap();
        for len in 0..bytes.len() {
            assert!(decode(&bytes[..len]).is_err(), "decoded {len}-byte prefix");
        }
    }

    #[test]
    fn foreign_endianness_is_rejected() {
        let foreign = match Endian::NATIVE {
            Endian::Little => Endian::Big,
            Endian::Big => Endian::Little,
        };
        let bytes = encode(&sample(), FormatMode::U32, foreign).unwrap();
        assert!(matches!(decode(&bytes), Err(CodecError::ForeignEndian(_))));
    }

    #[test]
    fn unknown_mode_tag_is_rejected() {
        let mut bytes = encode(&sample(), FormatMode::U32, Endian::NATIVE).unwrap().to_vec();
        bytes[0] = 7;
        assert!(matches!(decode(&bytes), Err(CodecError::UnknownFormat(7))));
    }

    #[test]
    fn stream_helpers() {
        let log = sample();
        let mut file = Vec::new();
        serialize(&mut file, &log, FormatMode::U64, Endian::NATIVE).unwrap();
        assert_eq!(deserialize(&mut file.as_slice()), Some(log));
        assert!(deserialize(&mut &file[..10]).is_none());
    }
}
