//! Fake log service for integration tests.
//!
//! Spins up a minimal `axum` HTTP server on a random TCP port bound to
//! 127.0.0.1. Every `GET` is answered from a path → body table; unknown paths
//! get the gempir not-found payload. Each request is recorded together with
//! the client's socket address so tests can prove that a batch reused one
//! connection.
//!
//! # Example
//!
//! ```rust,no_run
//! let service = FakeLogService::start().await.unwrap();
//! service.add_log("/channel/foo/user/alice/2020/1", SCENARIO_A).await;
//! let request = LogRequest::new(LogService::Gempir, "127.0.0.1", service.port());
//! ```

use axum::{
    extract::{ConnectInfo, State},
    http::{StatusCode, Uri},
    response::IntoResponse,
    Router,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;

use super::fixtures::GEMPIR_NOT_FOUND;

/// One request seen by the fake service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeenRequest {
    pub path: String,
    pub peer: SocketAddr,
}

#[derive(Default)]
struct ServiceState {
    logs: HashMap<String, String>,
    seen: Vec<SeenRequest>,
}

/// Handle to the running fake log service.
pub struct FakeLogService {
    addr: SocketAddr,
    state: Arc<Mutex<ServiceState>>,
}

impl FakeLogService {
    /// Start the server on a random port. Returns once it is listening.
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(Mutex::new(ServiceState::default()));

        let app = Router::new()
            .fallback(serve_log)
            .with_state(state.clone());

        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });

        Ok(Self { addr, state })
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Serve `body` for requests to `path` (as sent on the wire, percent
    /// encoding included).
    pub async fn add_log(&self, path: &str, body: &str) {
        self.state
            .lock()
            .await
            .logs
            .insert(path.to_string(), body.to_string());
    }

    /// Every request so far, in arrival order.
    pub async fn seen(&self) -> Vec<SeenRequest> {
        self.state.lock().await.seen.clone()
    }

    pub async fn request_count(&self) -> usize {
        self.state.lock().await.seen.len()
    }
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

async fn serve_log(
    State(state): State<Arc<Mutex<ServiceState>>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    uri: Uri,
) -> impl IntoResponse {
    let mut state = state.lock().await;
    let path = uri.path().to_string();
    let body = state.logs.get(&path).cloned();
    state.seen.push(SeenRequest { path, peer });

    match body {
        Some(body) => (StatusCode::OK, body),
        None => (StatusCode::NOT_FOUND, GEMPIR_NOT_FOUND.to_string()),
    }
}
