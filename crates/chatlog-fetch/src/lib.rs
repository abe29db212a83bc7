//! chatlog-fetch: the network half of chatlog.
//!
//! # Architecture
//!
//! ```text
//! Commands ──► LogRequest ──► Downloader ──(per log)──► FanIn ──► Answer
//!     │                                                   ▲
//!     └──────────────── LogStore (cached logs) ───────────┘
//! ```
//!
//! One [`Downloader`] run is strictly sequential over a single connection;
//! several runs may complete concurrently, so the aggregator is mutex-guarded.

pub mod aggregate;
pub mod command;
pub mod downloader;
pub mod error;
pub mod paste;
pub mod request;

pub use aggregate::{CountGather, FanIn, FindGather, Gather, Outcome};
pub use command::{Answer, Commands, Query, MAX_TARGETS};
pub use downloader::{Downloader, Handshake, PlainHandshake, Stage, TlsHandshake};
pub use error::DownloadError;
pub use paste::{FilePaste, PasteError, PasteUpload};
pub use request::{target_count, LogRequest, Target, UserSelection};
