//! ProxyServer struct and main accept loop.

use super::network::{accept_with_backoff, bind_listener};
use super::session::{run_session, SessionContext};
use crate::config::SubstituteTarget;
use crate::metrics;
use crate::plan::Plan;
use crate::pool::BackendPool;
use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

pub struct ProxyServer {
    listener: TcpListener,
    pool: BackendPool,
    ctx: SessionContext,
}

impl ProxyServer {
    /// Bind the proxy listener.
    pub async fn bind(
        addr: &str,
        plan: Arc<Plan>,
        pool: BackendPool,
        substitute_to: SubstituteTarget,
    ) -> Result<Self, anyhow::Error> {
        let listener = bind_listener(addr)
            .await
            .with_context(|| format!("Failed to bind proxy listener on {addr}"))?;
        Ok(Self {
            listener,
            pool,
            ctx: SessionContext {
                plan,
                substitute_to,
            },
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept clients forever. A failed accept is logged and retried.
    pub async fn run(self) -> Result<(), anyhow::Error> {
        info!("Listening on tcp://{}", self.local_addr()?);
        info!("Proxying to {}", self.pool.addr());
        info!("Loaded {} fault injection rules", self.ctx.plan.len());

        loop {
            let (stream, remote_addr) = accept_with_backoff(&self.listener, "Proxy").await;
            debug!(client = %remote_addr, "Accepted connection");

            let pool = self.pool.clone();
            let ctx = self.ctx.clone();
            tokio::spawn(async move {
                metrics::record_session_start();
                match pool.get().await {
                    Ok(backend) => run_session(stream, remote_addr, backend, ctx).await,
                    Err(e) => {
                        // Refuse this client only; the listener keeps serving.
                        warn!(client = %remote_addr, "No backend connection, closing client: {}", e);
                        drop(stream);
                    }
                }
                metrics::record_session_end();
            });
        }
    }
}
