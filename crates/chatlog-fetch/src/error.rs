//! Transport errors, one variant family per pipeline stage.

use crate::downloader::Stage;
use std::io;

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("resolving {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: io::Error,
    },
    #[error("no addresses found for {0}")]
    NoAddress(String),
    #[error("connecting to {host}: {source}")]
    Connect {
        host: String,
        #[source]
        source: io::Error,
    },
    #[error("tls handshake with {host}: {source}")]
    Tls {
        host: String,
        #[source]
        source: io::Error,
    },
    #[error("http handshake: {0}")]
    Http(#[source] hyper::Error),
    #[error("building request {index}: {source}")]
    Request {
        index: usize,
        #[source]
        source: hyper::http::Error,
    },
    #[error("writing request {index}: {source}")]
    Write {
        index: usize,
        #[source]
        source: hyper::Error,
    },
    #[error("reading response {index}: {source}")]
    Read {
        index: usize,
        #[source]
        source: hyper::Error,
    },
    #[error("connection failed during shutdown: {0}")]
    Connection(#[source] hyper::Error),
    #[error("connection task panicked: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("shutting down: {0}")]
    Shutdown(#[source] io::Error),
}

impl DownloadError {
    /// The pipeline stage that failed.
    pub fn stage(&self) -> Stage {
        match self {
            DownloadError::Resolve { .. } | DownloadError::NoAddress(_) => Stage::Resolving,
            DownloadError::Connect { .. } => Stage::Connecting,
            DownloadError::Tls { .. } | DownloadError::Http(_) => Stage::Handshaking,
            DownloadError::Request { index, .. } | DownloadError::Write { index, .. } => {
                Stage::Writing(*index)
            }
            DownloadError::Read { index, .. } => Stage::Reading(*index),
            DownloadError::Connection(_) | DownloadError::Task(_) | DownloadError::Shutdown(_) => {
                Stage::ShuttingDown
            }
        }
    }
}
