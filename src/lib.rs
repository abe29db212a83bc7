//! chatlog: fetch, cache and search historical chat logs.
//!
//! The binary is a thin shell over the library crates; this crate exposes
//! its command-line layer so integration tests can drive it directly.
//!
//! # Architecture
//!
//! ```text
//! cli ──► chatlog_fetch::Commands ──► Downloader ──► log service
//!               │
//!               └──► chatlog_core::LogStore ──► codec files
//! ```

pub mod cli;

pub use chatlog_core as core;
pub use chatlog_fetch as fetch;
