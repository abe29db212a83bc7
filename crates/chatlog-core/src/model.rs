//! Record model: a downloaded or decoded log and the views into it.
//!
//! A [`Log`] owns one text buffer. Every author name and message of every
//! line is a [`Span`] (`offset`, `len`) into that buffer, so moving a `Log`
//! never invalidates its views.
//!
//! ```text
//! data:  "[2020-01-01 00:00:01] #foo alice: hello world\n..."
//!                                    ^^^^^  ^^^^^^^^^^^
//!                                    name   message      (Span each)
//! ```

use crate::time::{TimePeriod, TimePoint};
use serde::{Deserialize, Serialize};
use std::ops::Range;

// ---------------------------------------------------------------------------
// LogIdentifier
// ---------------------------------------------------------------------------

/// Names one cached log unit: a channel, a period, and optionally a user.
///
/// An empty `user` means the whole-channel log.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogIdentifier {
    pub channel: String,
    pub period: TimePeriod,
    #[serde(default)]
    pub user: String,
}

impl LogIdentifier {
    pub fn channel_log(channel: impl Into<String>, period: TimePeriod) -> Self {
        Self {
            channel: channel.into(),
            period,
            user: String::new(),
        }
    }

    pub fn user_log(channel: impl Into<String>, user: impl Into<String>, period: TimePeriod) -> Self {
        Self {
            channel: channel.into(),
            period,
            user: user.into(),
        }
    }

    pub fn is_user_log(&self) -> bool {
        !self.user.is_empty()
    }
}

impl std::fmt::Display for LogIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{} {}", self.channel, self.period)?;
        if self.is_user_log() {
            write!(f, " user={}", self.user)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Span / LineView / Line
// ---------------------------------------------------------------------------

/// A byte range into a backing buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    pub offset: usize,
    pub len: usize,
}

impl Span {
    pub fn new(offset: usize, len: usize) -> Self {
        Self { offset, len }
    }

    /// The span of `part` inside `base`. `part` must be a subslice of `base`.
    pub fn of(base: &str, part: &str) -> Self {
        let offset = part.as_ptr() as usize - base.as_ptr() as usize;
        debug_assert!(offset + part.len() <= base.len());
        Self::new(offset, part.len())
    }

    pub fn end(&self) -> usize {
        self.offset + self.len
    }

    pub fn range(&self) -> Range<usize> {
        self.offset..self.end()
    }

    /// `true` when the span lies inside `text` on character boundaries.
    pub fn fits(&self, text: &str) -> bool {
        self.offset
            .checked_add(self.len)
            .is_some_and(|end| text.get(self.offset..end).is_some())
    }
}

/// A parsed chat line: timestamp plus author and message spans into the
/// owning [`Log`]'s buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineView {
    pub time: TimePoint,
    pub name: Span,
    pub message: Span,
}

/// An owned chat line that can outlive the [`Log`] it was copied from.
///
/// The author name and the message share one buffer, name first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    buf: String,
    time: TimePoint,
    name: Span,
    message: Span,
}

impl Line {
    pub fn new(time: TimePoint, name: &str, message: &str) -> Self {
        let mut buf = String::with_capacity(name.len() + message.len());
        buf.push_str(name);
        buf.push_str(message);
        Self {
            buf,
            time,
            name: Span::new(0, name.len()),
            message: Span::new(name.len(), message.len()),
        }
    }

    pub fn time(&self) -> TimePoint {
        self.time
    }

    pub fn name(&self) -> &str {
        &self.buf[self.name.range()]
    }

    pub fn message(&self) -> &str {
        &self.buf[self.message.range()]
    }
}

impl std::fmt::Display for Line {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}: {}",
            self.time.format("%Y-%m-%d %H:%M:%S"),
            self.name(),
            self.message()
        )
    }
}

// ---------------------------------------------------------------------------
// Log
// ---------------------------------------------------------------------------

/// A line parser turns a raw body into line views over that body.
///
/// Returns `None` when the body is the service's "no such log" payload.
pub type LineParser = fn(&str) -> Option<Vec<LineView>>;

/// A parsed log. Move-only: the buffer is never duplicated.
#[derive(Debug)]
pub struct Log {
    data: String,
    id: LogIdentifier,
    valid: bool,
    names: Vec<Span>,
    lines: Vec<LineView>,
}

impl Log {
    /// Parse `data` with `parser`. A `None` from the parser yields an
    /// invalid log with no lines.
    pub fn parse(id: LogIdentifier, data: String, parser: LineParser) -> Self {
        match parser(&data) {
            Some(lines) => {
                let names = unique_names(&data, &lines);
                Self {
                    data,
                    id,
                    valid: true,
                    names,
                    lines,
                }
            }
            None => Self::invalid(id, data),
        }
    }

    /// A log standing for a "no such log" response.
    pub fn invalid(id: LogIdentifier, data: String) -> Self {
        Self {
            data,
            id,
            valid: false,
            names: Vec::new(),
            lines: Vec::new(),
        }
    }

    /// Assemble a log from already validated parts. Used by the decoder.
    ///
    /// `names` must be sorted by text without duplicates and every span must
    /// fit `data`.
    pub(crate) fn from_parts(
        id: LogIdentifier,
        data: String,
        names: Vec<Span>,
        lines: Vec<LineView>,
    ) -> Self {
        Self {
            data,
            id,
            valid: true,
            names,
            lines,
        }
    }

    pub fn id(&self) -> &LogIdentifier {
        &self.id
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn data(&self) -> &str {
        &self.data
    }

    pub fn lines(&self) -> &[LineView] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Sorted, distinct author-name spans.
    pub fn name_spans(&self) -> &[Span] {
        &self.names
    }

    /// Sorted, distinct author names.
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.names.iter().map(|s| self.text(*s))
    }

    pub fn text(&self, span: Span) -> &str {
        &self.data[span.range()]
    }

    pub fn name(&self, line: &LineView) -> &str {
        self.text(line.name)
    }

    pub fn message(&self, line: &LineView) -> &str {
        self.text(line.message)
    }

    /// Index of `name` in the sorted name set.
    pub fn name_index(&self, name: &str) -> Option<usize> {
        self.names
            .binary_search_by(|s| self.text(*s).cmp(name))
            .ok()
    }

    /// Copy a line out of this log.
    pub fn to_line(&self, line: &LineView) -> Line {
        Line::new(line.time, self.name(line), self.message(line))
    }
}

impl PartialEq for Log {
    /// Semantic equality: identifier, validity, names and each line's
    /// content. Buffer layout is ignored.
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.valid == other.valid
            && self.names().eq(other.names())
            && self.lines.len() == other.lines.len()
            && self.lines.iter().zip(&other.lines).all(|(a, b)| {
                a.time == b.time
                    && self.name(a) == other.name(b)
                    && self.message(a) == other.message(b)
            })
    }
}

fn unique_names(data: &str, lines: &[LineView]) -> Vec<Span> {
    let mut names: Vec<Span> = lines.iter().map(|l| l.name).collect();
    names.sort_by(|a, b| data[a.range()].cmp(&data[b.range()]));
    names.dedup_by(|a, b| data[a.range()] == data[b.range()]);
    names
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
