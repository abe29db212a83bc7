//! Test builders: ergonomic constructors for logs, stores and paste sinks.
//!
//! These builders are designed for readability in test assertions, not for
//! production use. They panic on invalid input rather than returning `Result`.

use chatlog_core::{Log, LogIdentifier, LogService, LogStore, TimePeriod};
use chatlog_fetch::paste::{PasteCallback, PasteError, PasteUpload};
use std::sync::{Arc, Mutex};

use super::fixtures::jan_2020;

// ---------------------------------------------------------------------------
// LogBuilder
// ---------------------------------------------------------------------------

/// Fluent builder for gempir-format [`Log`] fixtures.
///
/// # Example
///
/// ```rust
/// let log = LogBuilder::new("foo")
///     .line("2020-01-01 00:00:01", "alice", "hello world")
///     .build();
/// ```
pub struct LogBuilder {
    channel: String,
    user: String,
    period: TimePeriod,
    body: String,
}

impl LogBuilder {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            user: String::new(),
            period: jan_2020(),
            body: String::new(),
        }
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    pub fn period(mut self, period: TimePeriod) -> Self {
        self.period = period;
        self
    }

    /// Append one `[time] #channel name: message` line.
    pub fn line(mut self, time: &str, name: &str, message: &str) -> Self {
        self.body
            .push_str(&format!("[{time}] #{} {name}: {message}\n", self.channel));
        self
    }

    /// Append `count` lines by `name`, one second apart.
    pub fn lines(mut self, name: &str, count: usize, message: &str) -> Self {
        for i in 0..count {
            let time = format!("2020-01-01 {:02}:{:02}:{:02}", i / 3600 % 24, i / 60 % 60, i % 60);
            self = self.line(&time, name, message);
        }
        self
    }

    pub fn id(&self) -> LogIdentifier {
        LogIdentifier::user_log(self.channel.clone(), self.user.clone(), self.period)
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn build(self) -> Log {
        let id = self.id();
        LogService::Gempir.parse(id, self.body)
    }
}

// ---------------------------------------------------------------------------
// Stores
// ---------------------------------------------------------------------------

/// A store in a fresh temp dir. Keep the `TempDir` alive for the test.
pub fn temp_store(capacity: usize) -> (tempfile::TempDir, LogStore) {
    let dir = tempfile::tempdir().expect("temp dir");
    let store = LogStore::open(dir.path(), capacity).expect("open store");
    (dir, store)
}

pub fn shared(store: LogStore) -> Arc<Mutex<LogStore>> {
    Arc::new(Mutex::new(store))
}

// ---------------------------------------------------------------------------
// RecordingPaste
// ---------------------------------------------------------------------------

/// Paste sink that keeps every body and answers `paste://<n>`.
#[derive(Default)]
pub struct RecordingPaste {
    bodies: Mutex<Vec<String>>,
    reject: bool,
}

impl RecordingPaste {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A sink that rejects every upload.
    pub fn rejecting() -> Arc<Self> {
        Arc::new(Self {
            bodies: Mutex::new(Vec::new()),
            reject: true,
        })
    }

    pub fn bodies(&self) -> Vec<String> {
        self.bodies.lock().unwrap().clone()
    }
}

impl PasteUpload for RecordingPaste {
    fn upload(&self, body: Vec<u8>, done: PasteCallback) {
        if self.reject {
            done(Err(PasteError::Rejected("quota exceeded".into())));
            return;
        }
        let mut bodies = self.bodies.lock().unwrap();
        bodies.push(String::from_utf8(body).expect("utf-8 transcript"));
        let location = format!("paste://{}", bodies.len());
        drop(bodies);
        done(Ok(location));
    }
}
