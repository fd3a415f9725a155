//! Network utilities for the proxy listeners.

use socket2::{Domain, Protocol, Socket, Type};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::error;

/// Pause after a failed accept so a persistent error (e.g. fd exhaustion)
/// does not spin the loop.
pub(crate) const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Resolve `addr` and bind a TCP listener with SO_REUSEADDR set.
pub async fn bind_listener(addr: &str) -> io::Result<TcpListener> {
    let socket_addr = resolve(addr).await?;
    let domain = if socket_addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&socket_addr.into())?;
    socket.listen(1024)?; // Backlog size

    let std_listener: std::net::TcpListener = socket.into();
    TcpListener::from_std(std_listener)
}

async fn resolve(addr: &str) -> io::Result<SocketAddr> {
    tokio::net::lookup_host(addr).await?.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("address '{addr}' did not resolve"),
        )
    })
}

/// Accept the next connection on `listener`. Failures are logged under
/// `role` and retried after [`ACCEPT_BACKOFF`].
pub(crate) async fn accept_with_backoff(
    listener: &TcpListener,
    role: &str,
) -> (TcpStream, SocketAddr) {
    retry_with_backoff(|| listener.accept(), role).await
}

async fn retry_with_backoff<F, Fut, T>(mut accept: F, role: &str) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<T>>,
{
    loop {
        match accept().await {
            Ok(accepted) => return accepted,
            Err(e) => {
                error!("{} accept error: {}", role, e);
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

/// Errors after which a socket will never carry data again.
pub fn is_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    )
}
