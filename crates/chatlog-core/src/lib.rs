//! chatlog-core: records, codec and cache for historical chat logs.
//!
//! # Architecture
//!
//! ```text
//! service body ──► model::Log ──► codec ──► <id>.bin
//!                      │                       ▲
//!                      └──► store (LruCache) ──┘
//! ```
//!
//! Everything here is synchronous; the network side lives in `chatlog-fetch`.

pub mod cache;
pub mod codec;
pub mod config;
pub mod model;
pub mod search;
pub mod service;
pub mod store;
pub mod time;

pub use cache::LruCache;
pub use codec::{CodecError, Endian, FormatMode};
pub use config::Config;
pub use model::{Line, LineView, Log, LogIdentifier, Span};
pub use search::Matcher;
pub use service::LogService;
pub use store::{LogStore, LogTracker, StoreError};
pub use time::{TimeError, TimePeriod, TimePoint, YearMonth};
