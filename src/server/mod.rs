//! HTTP surface: a synchronous `tiny_http` server whose requests are handed
//! to the blocking thread pool of the surrounding tokio runtime.

pub mod multipart;
pub mod routes;

use crate::pipeline::Segmenter;

use std::sync::Arc;
use thiserror::Error;
use tiny_http::Server;
use tracing::info;

pub const SERVICE_NAME: &str = "MRI segment - brain MRI segmentation";

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {reason}")]
    Bind { addr: String, reason: String },
}

/// State shared by every request handler.
pub struct AppState {
    pub segmenter: Segmenter,
    pub max_upload_bytes: usize,
}

pub type SharedState = Arc<AppState>;

pub struct SegmentServer {
    server: Server,
    addr: String,
}

impl SegmentServer {
    pub fn bind(host: &str, port: u16) -> Result<Self, ServerError> {
        let addr = format!("{host}:{port}");
        let server = Server::http(&addr).map_err(|e| ServerError::Bind {
            addr: addr.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self { server, addr })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Accept requests until the listener closes, dispatching each on the
    /// runtime's blocking pool. Must be called from within a tokio runtime.
    pub fn run(self, state: SharedState, runtime: tokio::runtime::Handle) {
        info!(addr = %self.addr, "listening");
        for request in self.server.incoming_requests() {
            let state = state.clone();
            runtime.spawn_blocking(move || routes::dispatch(request, &state));
        }
    }
}
