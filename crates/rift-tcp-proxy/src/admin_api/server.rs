//! Admin API server.

use crate::admin_api::router::route_request;
use crate::plan::Plan;
use crate::pool::BackendPool;
use crate::proxy::{accept_with_backoff, bind_listener};
use anyhow::Context;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info};

/// State shared by every admin request.
pub struct AdminState {
    pub plan: Arc<Plan>,
    /// Reported by `/health` when present.
    pub pool: Option<BackendPool>,
}

pub struct AdminApiServer {
    listener: TcpListener,
    state: Arc<AdminState>,
}

impl AdminApiServer {
    pub async fn bind(addr: &str, state: AdminState) -> Result<Self, anyhow::Error> {
        let listener = bind_listener(addr)
            .await
            .with_context(|| format!("Failed to bind admin API on {addr}"))?;
        Ok(Self {
            listener,
            state: Arc::new(state),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the admin API server
    pub async fn run(self) -> Result<(), anyhow::Error> {
        info!("Rift Admin API listening on http://{}", self.local_addr()?);

        loop {
            let (stream, _) = accept_with_backoff(&self.listener, "Admin API").await;
            let io = TokioIo::new(stream);
            let state = Arc::clone(&self.state);

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let state = Arc::clone(&state);
                    async move { route_request(req, state).await }
                });

                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    debug!("Admin API connection error: {}", e);
                }
            });
        }
    }
}
