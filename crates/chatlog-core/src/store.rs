//! Log store: the recency cache in front of the on-disk codec files.
//!
//! ```text
//!            put(log)                      load(id)
//!               │                             │
//!               ▼                             ▼
//!   LruCache<LogIdentifier, LogTracker> ── miss ──► index.json ──► <id>.bin
//!               │                                                     ▲
//!               └──────────── save_in_storage (codec) ────────────────┘
//! ```
//!
//! A [`LogTracker`] tracks the in-memory and on-disk states separately:
//! freeing one never touches the other.

use crate::cache::LruCache;
use crate::codec::{self, CodecError, Endian, FormatMode};
use crate::model::{Log, LogIdentifier};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const INDEX_FILE: &str = "index.json";

/// Errors from the log store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("refusing to store invalid log {0}")]
    InvalidLog(LogIdentifier),
    #[error("log {0} is not loaded")]
    NotLoaded(LogIdentifier),
    #[error("{path} holds log {found}, expected {expected}")]
    Mismatch {
        path: PathBuf,
        expected: LogIdentifier,
        found: LogIdentifier,
    },
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("bookkeeping error: {0}")]
    Index(#[from] serde_json::Error),
    #[error("codec error on {path}: {source}")]
    Codec {
        path: PathBuf,
        #[source]
        source: CodecError,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

// ---------------------------------------------------------------------------
// LogTracker
// ---------------------------------------------------------------------------

/// One cached log: its file path plus whichever of the in-memory and on-disk
/// copies currently exist.
#[derive(Debug)]
pub struct LogTracker {
    id: LogIdentifier,
    path: PathBuf,
    log: Option<Arc<Log>>,
    on_disk: bool,
}

impl LogTracker {
    pub fn new(id: LogIdentifier, path: PathBuf) -> Self {
        let on_disk = path.is_file();
        Self {
            id,
            path,
            log: None,
            on_disk,
        }
    }

    /// A tracker holding an already parsed log.
    pub fn with_log(log: Log, path: PathBuf) -> Self {
        let mut tracker = Self::new(log.id().clone(), path);
        tracker.log = Some(Arc::new(log));
        tracker
    }

    pub fn id(&self) -> &LogIdentifier {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn log(&self) -> Option<Arc<Log>> {
        self.log.clone()
    }

    pub fn is_in_memory(&self) -> bool {
        self.log.is_some()
    }

    pub fn is_in_storage(&self) -> bool {
        self.on_disk
    }

    /// Decode the file into memory. A no-op when already loaded.
    pub fn load_in_memory(&mut self) -> Result<Arc<Log>, StoreError> {
        if let Some(log) = &self.log {
            return Ok(Arc::clone(log));
        }
        let file = fs::File::open(&self.path).map_err(io_err(&self.path))?;
        let log = codec::try_deserialize(&mut BufReader::new(file)).map_err(|source| {
            tracing::warn!(path = %self.path.display(), error = %source, "cached log unreadable");
            StoreError::Codec {
                path: self.path.clone(),
                source,
            }
        })?;
        if *log.id() != self.id {
            return Err(StoreError::Mismatch {
                path: self.path.clone(),
                expected: self.id.clone(),
                found: log.id().clone(),
            });
        }
        self.on_disk = true;
        let log = Arc::new(log);
        self.log = Some(Arc::clone(&log));
        Ok(log)
    }

    /// Drop the in-memory copy. Readers holding the `Arc` keep theirs.
    pub fn free_in_memory(&mut self) {
        self.log = None;
    }

    /// Encode the in-memory log to the tracker's path.
    ///
    /// `mode == None` picks the narrowest mode that fits.
    pub fn save_in_storage(&mut self, mode: Option<FormatMode>) -> Result<(), StoreError> {
        let log = self
            .log
            .as_ref()
            .ok_or_else(|| StoreError::NotLoaded(self.id.clone()))?;
        let mode = mode.unwrap_or_else(|| FormatMode::smallest_for(log));
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }
        let file = fs::File::create(&self.path).map_err(io_err(&self.path))?;
        codec::serialize(&mut BufWriter::new(file), log, mode, Endian::NATIVE).map_err(
            |source| StoreError::Codec {
                path: self.path.clone(),
                source,
            },
        )?;
        self.on_disk = true;
        tracing::debug!(id = %self.id, %mode, path = %self.path.display(), "log saved");
        Ok(())
    }

    /// Delete the file. The in-memory copy is kept.
    pub fn free_in_storage(&mut self) -> Result<(), StoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(io_err(&self.path)(e)),
        }
        self.on_disk = false;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// LogStore
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize)]
struct IndexEntry {
    id: LogIdentifier,
    path: PathBuf,
}

/// Capacity-bounded set of resident logs backed by codec files in `dir`.
#[derive(Debug)]
pub struct LogStore {
    dir: PathBuf,
    cache: LruCache<LogIdentifier, LogTracker>,
    index: HashMap<LogIdentifier, PathBuf>,
    format: Option<FormatMode>,
}

impl LogStore {
    /// Open a store rooted at `dir`, reading `index.json` when present.
    pub fn open(dir: impl Into<PathBuf>, capacity: usize) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(io_err(&dir))?;
        let mut store = Self {
            dir,
            cache: LruCache::new(capacity),
            index: HashMap::new(),
            format: None,
        };
        store.load_bookkeeping()?;
        Ok(store)
    }

    /// Force a format mode for every file written from now on.
    pub fn with_format(mut self, format: Option<FormatMode>) -> Self {
        self.format = format;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn capacity(&self) -> usize {
        self.cache.capacity()
    }

    /// Number of resident logs.
    pub fn resident(&self) -> usize {
        self.cache.len()
    }

    /// `true` when `id` is resident or recorded on disk.
    pub fn contains(&self, id: &LogIdentifier) -> bool {
        self.cache.contains(id) || self.index.contains_key(id)
    }

    /// Persist `log` and make it the most recent resident entry.
    pub fn put(&mut self, log: Log) -> Result<Arc<Log>, StoreError> {
        let shared = self.insert(log)?;
        self.save_bookkeeping()?;
        Ok(shared)
    }

    /// Persist every log, then write `index.json` once. Logs that cannot be
    /// stored are skipped with a warning. Returns how many were stored.
    pub fn put_all(&mut self, logs: impl IntoIterator<Item = Log>) -> Result<usize, StoreError> {
        let mut stored = 0;
        for log in logs {
            match self.insert(log) {
                Ok(_) => stored += 1,
                Err(e) => tracing::warn!(error = %e, "log not stored"),
            }
        }
        if stored > 0 {
            self.save_bookkeeping()?;
        }
        Ok(stored)
    }

    /// Write the file and update memory and the in-memory bookkeeping.
    fn insert(&mut self, log: Log) -> Result<Arc<Log>, StoreError> {
        if !log.is_valid() {
            return Err(StoreError::InvalidLog(log.id().clone()));
        }
        let id = log.id().clone();
        let path = self.path_for(&id);
        let mut tracker = LogTracker::with_log(log, path.clone());
        tracker.save_in_storage(self.format)?;
        let shared = tracker
            .log()
            .ok_or_else(|| StoreError::NotLoaded(id.clone()))?;

        self.index.insert(id.clone(), path);
        if let Some((evicted, _)) = self.cache.put(id, tracker) {
            tracing::debug!(id = %evicted, "log evicted from memory");
        }
        Ok(shared)
    }

    /// The resident log for `id`, promoting it. Never reads the disk.
    pub fn get(&mut self, id: &LogIdentifier) -> Option<Arc<Log>> {
        self.cache.get(id).and_then(LogTracker::log)
    }

    /// The log for `id` from memory, or decoded from disk when recorded in
    /// the bookkeeping. `Ok(None)` when the store has never seen `id`.
    pub fn load(&mut self, id: &LogIdentifier) -> Result<Option<Arc<Log>>, StoreError> {
        if let Some(log) = self.get(id) {
            return Ok(Some(log));
        }
        let Some(path) = self.index.get(id).cloned() else {
            return Ok(None);
        };
        let mut tracker = LogTracker::new(id.clone(), path);
        let log = tracker.load_in_memory()?;
        if let Some((evicted, _)) = self.cache.put(id.clone(), tracker) {
            tracing::debug!(id = %evicted, "log evicted from memory");
        }
        Ok(Some(log))
    }

    /// Forget `id` in memory, on disk and in the bookkeeping.
    pub fn remove(&mut self, id: &LogIdentifier) -> Result<bool, StoreError> {
        let resident = self.cache.remove(id);
        let Some(path) = self.index.remove(id) else {
            return Ok(resident.is_some());
        };
        let mut tracker = resident.unwrap_or_else(|| LogTracker::new(id.clone(), path));
        tracker.free_in_storage()?;
        self.save_bookkeeping()?;
        Ok(true)
    }

    /// Shrink or grow the resident set.
    pub fn resize(&mut self, capacity: usize) {
        for (id, _) in self.cache.resize(capacity) {
            tracing::debug!(%id, "log evicted from memory");
        }
    }

    /// Resident identifiers, most recent first.
    pub fn resident_ids(&self) -> impl Iterator<Item = &LogIdentifier> + '_ {
        self.cache.iter().map(|(id, _)| id)
    }

    /// Write `index.json`.
    pub fn save_bookkeeping(&self) -> Result<(), StoreError> {
        let mut entries: Vec<IndexEntry> = self
            .index
            .iter()
            .map(|(id, path)| IndexEntry {
                id: id.clone(),
                path: path.clone(),
            })
            .collect();
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        let path = self.dir.join(INDEX_FILE);
        let json = serde_json::to_vec_pretty(&entries)?;
        fs::write(&path, json).map_err(io_err(&path))
    }

    /// Read `index.json`, replacing the in-memory bookkeeping. A missing
    /// file means an empty store.
    pub fn load_bookkeeping(&mut self) -> Result<(), StoreError> {
        let path = self.dir.join(INDEX_FILE);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.index.clear();
                return Ok(());
            }
            Err(e) => return Err(io_err(&path)(e)),
        };
        let entries: Vec<IndexEntry> = serde_json::from_slice(&bytes)?;
        self.index = entries.into_iter().map(|e| (e.id, e.path)).collect();
        tracing::debug!(entries = self.index.len(), "bookkeeping loaded");
        Ok(())
    }

    /// File path for `id`: `<channel>_<begin ms>_<end ms>[_<user>].bin`.
    ///
    /// Channel and user are escaped so that distinct identifiers never share
    /// a file, even on case-insensitive filesystems.
    pub fn path_for(&self, id: &LogIdentifier) -> PathBuf {
        let mut name = format!(
            "{}_{}_{}",
            sanitize(&id.channel),
            id.period.begin().timestamp_millis(),
            id.period.end().timestamp_millis()
        );
        if id.is_user_log() {
            name.push('_');
            name.push_str(&sanitize(&id.user));
        }
        name.push_str(".bin");
        self.dir.join(name)
    }
}

/// Keep `[a-z0-9-]`; every other byte becomes `%XX` (upper-case hex).
fn sanitize(part: &str) -> String {
    let mut out = String::with_capacity(part.len());
    for byte in part.bytes() {
        match byte {
            b'a'..=b'z' | b'0'..=b'9' | b'-' => out.push(byte as char),
            _ => {
                let _ = write!(out, "%{byte:02X}");
            }
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
