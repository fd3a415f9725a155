//! One client session: a client socket paired with a pooled backend
//! connection and two relay tasks.
//!
//! The client→backend task consults the plan for every chunk and applies
//! the selected fault; the backend→client task is a plain relay. Whichever
//! task finishes first cancels the other, both are joined, the client socket
//! is closed and the backend connection goes back to the pool unless the
//! backend side ended or may still owe a reply.

use super::fault::{apply_delay, decide_and_record, FaultDecision};
use super::network::is_disconnect;
use crate::config::SubstituteTarget;
use crate::metrics;
use crate::plan::Plan;
use crate::pool::PooledConnection;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const BUFFER_SIZE: usize = 32 * 1024;

type SharedWriter = Arc<Mutex<OwnedWriteHalf>>;

/// Why a relay loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEnd {
    ClientClosed,
    BackendClosed,
    /// A `drop` rule closed the client side.
    Dropped,
    /// The peer loop finished first.
    Cancelled,
    /// The peer loop finished while a backend reply was half relayed.
    Interrupted,
    ClientGone,
    BackendGone,
}

impl RelayEnd {
    /// Whether the backend connection can still carry another session.
    pub fn backend_reusable(&self) -> bool {
        !matches!(
            self,
            RelayEnd::BackendClosed | RelayEnd::BackendGone | RelayEnd::Interrupted
        )
    }
}

/// Settings shared by every session of a proxy.
#[derive(Clone)]
pub struct SessionContext {
    pub plan: Arc<Plan>,
    pub substitute_to: SubstituteTarget,
}

/// Relay `client` through `backend` until either side ends.
pub async fn run_session(
    client: TcpStream,
    peer: SocketAddr,
    mut backend: PooledConnection,
    ctx: SessionContext,
) {
    let Some(backend_stream) = backend.take() else {
        error!(client = %peer, "Backend lease carried no connection");
        return;
    };
    if let Err(e) = client.set_nodelay(true) {
        debug!(client = %peer, "Failed to set TCP_NODELAY: {}", e);
    }

    let (backend_read, backend_write) = backend_stream.into_split();
    let (client_read, client_write) = client.into_split();
    let client_write: SharedWriter = Arc::new(Mutex::new(client_write));
    let shutdown = CancellationToken::new();
    // Set before every backend write, cleared whenever the backend answers.
    let awaiting_reply = Arc::new(AtomicBool::new(false));

    let upstream = tokio::spawn(
        ClientToBackend {
            client: client_read,
            backend: backend_write,
            client_writer: Arc::clone(&client_write),
            plan: ctx.plan,
            peer: peer.to_string(),
            substitute_to: ctx.substitute_to,
            shutdown: shutdown.clone(),
            awaiting_reply: Arc::clone(&awaiting_reply),
        }
        .run(),
    );
    let downstream = tokio::spawn(backend_to_client(
        backend_read,
        Arc::clone(&client_write),
        peer,
        shutdown.clone(),
        Arc::clone(&awaiting_reply),
    ));

    let (upstream, downstream) = tokio::join!(upstream, downstream);

    match (upstream, downstream) {
        (Ok((writer, up_end)), Ok((reader, down_end))) => {
            debug!(client = %peer, ?up_end, ?down_end, "Session relay finished");
            match reader.reunite(writer) {
                Ok(stream) => backend.restore(stream),
                Err(e) => warn!(client = %peer, "Failed to reunite backend halves: {}", e),
            }
            let owes_reply = awaiting_reply.load(Ordering::Acquire);
            if owes_reply {
                debug!(client = %peer, "Backend reply outstanding, not reusing connection");
            }
            if owes_reply || !(up_end.backend_reusable() && down_end.backend_reusable()) {
                backend.discard();
            }
        }
        (up, down) => {
            // The halves of a panicked task are gone; the lease frees the slot.
            for err in [up.err(), down.err()].into_iter().flatten() {
                error!(client = %peer, "Relay task failed: {}", err);
            }
        }
    }

    let mut writer = client_write.lock().await;
    if let Err(e) = writer.shutdown().await {
        if !is_disconnect(&e) {
            debug!(client = %peer, "Error closing client connection: {}", e);
        }
    }
    info!(client = %peer, "Closed connection");
}

/// Pure relay from the backend to the client.
async fn backend_to_client(
    mut backend: OwnedReadHalf,
    client: SharedWriter,
    peer: SocketAddr,
    shutdown: CancellationToken,
    awaiting_reply: Arc<AtomicBool>,
) -> (OwnedReadHalf, RelayEnd) {
    let mut buf = vec![0u8; BUFFER_SIZE];
    let end = loop {
        let n = tokio::select! {
            _ = shutdown.cancelled() => break RelayEnd::Cancelled,
            read = backend.read(&mut buf) => match read {
                Ok(0) => break RelayEnd::BackendClosed,
                Ok(n) => n,
                Err(e) if is_disconnect(&e) => break RelayEnd::BackendGone,
                Err(e) => {
                    warn!(client = %peer, "Error reading from backend: {}", e);
                    continue;
                }
            },
        };
        awaiting_reply.store(false, Ordering::Release);

        // A client that stops reading must not keep the lock past teardown.
        let written = tokio::select! {
            _ = shutdown.cancelled() => break RelayEnd::Interrupted,
            written = async { client.lock().await.write_all(&buf[..n]).await } => written,
        };
        if let Err(e) = written {
            if is_disconnect(&e) {
                break RelayEnd::ClientGone;
            }
            warn!(client = %peer, "Error writing to client: {}", e);
        }
    };
    shutdown.cancel();
    (backend, end)
}

/// Fault-bearing relay from the client to the backend.
struct ClientToBackend {
    client: OwnedReadHalf,
    backend: OwnedWriteHalf,
    client_writer: SharedWriter,
    plan: Arc<Plan>,
    peer: String,
    substitute_to: SubstituteTarget,
    shutdown: CancellationToken,
    awaiting_reply: Arc<AtomicBool>,
}

impl ClientToBackend {
    async fn run(mut self) -> (OwnedWriteHalf, RelayEnd) {
        let mut buf = vec![0u8; BUFFER_SIZE];
        let end = loop {
            let n = tokio::select! {
                _ = self.shutdown.cancelled() => break RelayEnd::Cancelled,
                read = self.client.read(&mut buf) => match read {
                    Ok(0) => break RelayEnd::ClientClosed,
                    Ok(n) => n,
                    Err(e) if is_disconnect(&e) => break RelayEnd::ClientGone,
                    Err(e) => {
                        warn!(client = %self.peer, "Error reading from client: {}", e);
                        continue;
                    }
                },
            };
            let chunk = &buf[..n];

            let decision = decide_and_record(self.plan.select(&self.peer, chunk));
            match decision {
                FaultDecision::Drop { rule } => {
                    // The client side is closed at teardown, once both loops stopped.
                    info!(client = %self.peer, rule = %rule, "Dropping client connection");
                    break RelayEnd::Dropped;
                }
                FaultDecision::Substitute { reply, kind, rule } => {
                    debug!(
                        client = %self.peer,
                        rule = %rule,
                        target = self.substitute_to.as_str(),
                        "Substituting {} reply",
                        kind.as_str()
                    );
                    if let Some(end) = self.substitute(&reply).await {
                        break end;
                    }
                    continue;
                }
                FaultDecision::Delay { duration_ms, rule } => {
                    debug!(client = %self.peer, rule = %rule, duration_ms, "Delaying chunk");
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break RelayEnd::Cancelled,
                        _ = apply_delay(duration_ms) => {}
                    }
                }
                FaultDecision::None => {}
            }

            self.awaiting_reply.store(true, Ordering::Release);
            if let Err(e) = self.backend.write_all(chunk).await {
                if is_disconnect(&e) {
                    break RelayEnd::BackendGone;
                }
                warn!(client = %self.peer, "Error writing to backend: {}", e);
            }
        };
        self.shutdown.cancel();
        (self.backend, end)
    }

    /// Write a substitute reply to the configured target. Returns the end
    /// condition when the target is gone.
    async fn substitute(&mut self, reply: &[u8]) -> Option<RelayEnd> {
        let (result, gone) = match self.substitute_to {
            SubstituteTarget::Backend => {
                self.awaiting_reply.store(true, Ordering::Release);
                (self.backend.write_all(reply).await, RelayEnd::BackendGone)
            }
            SubstituteTarget::Client => {
                let written = tokio::select! {
                    _ = self.shutdown.cancelled() => return Some(RelayEnd::Cancelled),
                    written = async {
                        self.client_writer.lock().await.write_all(reply).await
                    } => written,
                };
                (written, RelayEnd::ClientGone)
            }
        };
        match result {
            Ok(()) => None,
            Err(e) if is_disconnect(&e) => Some(gone),
            Err(e) => {
                warn!(client = %self.peer, "Error writing substitute reply: {}", e);
                None
            }
        }
    }
}
