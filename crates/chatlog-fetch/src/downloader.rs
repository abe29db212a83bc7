//! Downloader pipeline: fetch every target of a [`LogRequest`] over one
//! persistent HTTP/1.1 connection.
//!
//! # Stages
//!
//! ```text
//! Resolving ──► Connecting ──► Handshaking ──► Writing[0] ──► Reading[0]
//!                                                  ▲              │
//!                                                  └── i + 1 ◄────┤
//!                                                                 ▼
//!                                                ShuttingDown ──► Closed
//! ```
//!
//! Each response body is collected whole, parsed with the request's service
//! grammar and handed to the per-target callback before the next request is
//! written. Any failure ends the run and fires the error callback once.
//! There is no retry.

use crate::error::DownloadError;
use crate::request::LogRequest;
use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper::client::conn::http1;
use hyper::header::{HOST, USER_AGENT};
use hyper::Request;
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use std::future::Future;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

const USER_AGENT_VALUE: &str = concat!("chatlog/", env!("CARGO_PKG_VERSION"));

/// Where a pipeline run is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Resolving,
    Connecting,
    Handshaking,
    Writing(usize),
    Reading(usize),
    ShuttingDown,
    Closed,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Resolving => write!(f, "resolving"),
            Stage::Connecting => write!(f, "connecting"),
            Stage::Handshaking => write!(f, "handshaking"),
            Stage::Writing(i) => write!(f, "writing[{i}]"),
            Stage::Reading(i) => write!(f, "reading[{i}]"),
            Stage::ShuttingDown => write!(f, "shutting down"),
            Stage::Closed => write!(f, "closed"),
        }
    }
}

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

/// Turns a connected TCP stream into the stream HTTP is spoken over.
pub trait Handshake: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    fn handshake(
        &self,
        host: &str,
        tcp: TcpStream,
    ) -> impl Future<Output = io::Result<Self::Stream>> + Send;
}

/// rustls client with the platform's native roots. SNI is the request host.
#[derive(Clone)]
pub struct TlsHandshake {
    connector: TlsConnector,
}

impl TlsHandshake {
    /// Build a client trusting the platform's root certificates.
    pub fn native() -> io::Result<Self> {
        let mut roots = rustls::RootCertStore::empty();
        let native = rustls_native_certs::load_native_certs();
        for err in &native.errors {
            tracing::debug!(error = %err, "failed to load a native certificate");
        }
        let (added, ignored) = roots.add_parsable_certificates(native.certs);
        tracing::debug!(added, ignored, "native root certificates loaded");
        if roots.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                "no valid certificates found in native root store",
            ));
        }
        Ok(Self::with_roots(roots))
    }

    pub fn with_roots(roots: rustls::RootCertStore) -> Self {
        let config = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        Self {
            connector: TlsConnector::from(Arc::new(config)),
        }
    }
}

impl Handshake for TlsHandshake {
    type Stream = tokio_rustls::client::TlsStream<TcpStream>;

    async fn handshake(&self, host: &str, tcp: TcpStream) -> io::Result<Self::Stream> {
        let name = ServerName::try_from(host.to_string())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        self.connector.connect(name, tcp).await
    }
}

/// No encryption. For plaintext mirrors and local test servers.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainHandshake;

impl Handshake for PlainHandshake {
    type Stream = TcpStream;

    async fn handshake(&self, _host: &str, tcp: TcpStream) -> io::Result<Self::Stream> {
        Ok(tcp)
    }
}

// ---------------------------------------------------------------------------
// Downloader
// ---------------------------------------------------------------------------

/// Runs [`LogRequest`]s. Cheap to clone when the handshake is.
#[derive(Clone)]
pub struct Downloader<H = TlsHandshake> {
    handshake: H,
}

impl<H: Handshake> Downloader<H> {
    pub fn new(handshake: H) -> Self {
        Self { handshake }
    }

    /// Fetch every target in order.
    ///
    /// On failure the request's error callback has already fired when this
    /// returns `Err`; no further logs are delivered.
    pub async fn run(&self, mut request: LogRequest) -> Result<(), DownloadError> {
        if request.is_empty() {
            return Ok(());
        }
        let mut stage = Stage::Resolving;
        match self.pipeline(&mut request, &mut stage).await {
            Ok(()) => {
                stage = Stage::Closed;
                tracing::debug!(host = %request.host, %stage, "download finished");
                Ok(())
            }
            Err(err) => {
                tracing::warn!(host = %request.host, %stage, error = %err, "download failed");
                request.fail(&err);
                Err(err)
            }
        }
    }

    /// Run `request` on its own task.
    pub fn spawn(&self, request: LogRequest) -> tokio::task::JoinHandle<Result<(), DownloadError>>
    where
        H: Clone + 'static,
    {
        let downloader = self.clone();
        tokio::spawn(async move { downloader.run(request).await })
    }

    async fn pipeline(
        &self,
        request: &mut LogRequest,
        stage: &mut Stage,
    ) -> Result<(), DownloadError> {
        let host = request.host.clone();
        let port = request.port;

        enter(stage, Stage::Resolving, &host);
        let addrs: Vec<_> = tokio::net::lookup_host((host.as_str(), port))
            .await
            .map_err(|source| DownloadError::Resolve {
                host: host.clone(),
                source,
            })?
            .collect();
        if addrs.is_empty() {
            return Err(DownloadError::NoAddress(host));
        }

        enter(stage, Stage::Connecting, &host);
        let mut last_err = None;
        let mut tcp = None;
        for addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    tcp = Some(stream);
                    break;
                }
                Err(e) => {
                    tracing::debug!(%addr, error = %e, "connect attempt failed");
                    last_err = Some(e);
                }
            }
        }
        let tcp = tcp.ok_or_else(|| DownloadError::Connect {
            host: host.clone(),
            source: last_err
                .unwrap_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no address tried")),
        })?;
        if let Err(e) = tcp.set_nodelay(true) {
            tracing::debug!(host = %host, error = %e, "failed to disable nagle");
        }

        enter(stage, Stage::Handshaking, &host);
        let stream = self
            .handshake
            .handshake(&host, tcp)
            .await
            .map_err(|source| DownloadError::Tls {
                host: host.clone(),
                source,
            })?;
        let (mut sender, conn) = http1::handshake(TokioIo::new(stream))
            .await
            .map_err(DownloadError::Http)?;
        let connection = tokio::spawn(conn.without_shutdown());

        let host_header = if port == 443 || port == 80 {
            host.clone()
        } else {
            format!("{host}:{port}")
        };

        let targets = request.targets().to_vec();
        for (index, target) in targets.into_iter().enumerate() {
            enter(stage, Stage::Writing(index), &host);
            let req = Request::get(target.path.as_str())
                .header(HOST, host_header.as_str())
                .header(USER_AGENT, USER_AGENT_VALUE)
                .body(Empty::<Bytes>::new())
                .map_err(|source| DownloadError::Request { index, source })?;
            sender
                .ready()
                .await
                .map_err(|source| DownloadError::Write { index, source })?;
            let response = sender
                .send_request(req)
                .await
                .map_err(|source| DownloadError::Write { index, source })?;

            enter(stage, Stage::Reading(index), &host);
            let status = response.status();
            let body = response
                .into_body()
                .collect()
                .await
                .map_err(|source| DownloadError::Read { index, source })?
                .to_bytes();
            tracing::debug!(
                id = %target.id,
                %status,
                bytes = body.len(),
                "log downloaded"
            );
            let text = String::from_utf8_lossy(&body).into_owned();
            let log = request.service.parse(target.id, text);
            request.deliver(log);
        }

        enter(stage, Stage::ShuttingDown, &host);
        drop(sender);
        let parts = connection.await?.map_err(DownloadError::Connection)?;
        match parts.io.into_inner().shutdown().await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                tracing::debug!(host = %host, "peer truncated the stream on shutdown");
                Ok(())
            }
            Err(e) => Err(DownloadError::Shutdown(e)),
        }
    }
}

fn enter(stage: &mut Stage, next: Stage, host: &str) {
    *stage = next;
    tracing::debug!(%host, stage = %next, "pipeline stage");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
