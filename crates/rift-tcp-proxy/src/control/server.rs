//! Control protocol listener.

use super::commands::dispatch;
use super::resp::{read_command, ProtocolError, Reply};
use crate::plan::Plan;
use crate::proxy::{accept_with_backoff, bind_listener};
use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tracing::{debug, info};

pub struct ControlServer {
    listener: TcpListener,
    plan: Arc<Plan>,
}

impl ControlServer {
    pub async fn bind(addr: &str, plan: Arc<Plan>) -> Result<Self, anyhow::Error> {
        let listener = bind_listener(addr)
            .await
            .with_context(|| format!("Failed to bind control listener on {addr}"))?;
        Ok(Self { listener, plan })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run(self) -> Result<(), anyhow::Error> {
        info!("Control server listening on {}", self.local_addr()?);

        loop {
            let (stream, peer) = accept_with_backoff(&self.listener, "Control").await;
            debug!(client = %peer, "Control client connected");

            let plan = Arc::clone(&self.plan);
            tokio::spawn(async move {
                match serve_connection(stream, &plan).await {
                    Ok(()) => debug!(client = %peer, "Control client closed"),
                    Err(e) => debug!(client = %peer, "Control client closed: {}", e),
                }
            });
        }
    }
}

/// Serve commands on one connection until the peer hangs up. A protocol
/// error is reported to the peer before the connection is closed.
pub(crate) async fn serve_connection<S>(stream: S, plan: &Plan) -> Result<(), ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut stream = BufReader::new(stream);
    loop {
        let args = match read_command(&mut stream).await {
            Ok(Some(args)) => args,
            Ok(None) => return Ok(()),
            Err(ProtocolError::Invalid(msg)) => {
                let reply = Reply::Error(format!("ERR Protocol error: {msg}"));
                stream.write_all(&reply.to_bytes()).await?;
                return Err(ProtocolError::Invalid(msg));
            }
            Err(e) => return Err(e),
        };
        if args.is_empty() {
            continue;
        }

        let reply = dispatch(plan, &args);
        stream.write_all(&reply.to_bytes()).await?;
        stream.flush().await?;
    }
}
