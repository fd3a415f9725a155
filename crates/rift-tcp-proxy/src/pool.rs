//! Backend connection pool.
//!
//! A bounded set of TCP connections to the backend. Capacity is enforced by a
//! semaphore: every lent connection holds one permit, idle connections hold
//! none. A [`PooledConnection`] lease puts its stream back into the idle set
//! when it is dropped, whatever path the session took to get there.

use crate::config::ConnectionPoolConfig;
use crate::metrics;
use parking_lot::Mutex;
use socket2::{SockRef, TcpKeepalive};
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("no backend connection became available within {0:?}")]
    Exhausted(Duration),
    #[error("failed to connect to backend {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("timed out connecting to backend {addr} after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },
    #[error("connection pool is closed")]
    Closed,
}

/// Point-in-time pool utilisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct PoolStatus {
    pub idle: usize,
    pub in_use: usize,
    pub max_size: usize,
}

struct PoolInner {
    addr: String,
    config: ConnectionPoolConfig,
    idle: Mutex<Vec<TcpStream>>,
    permits: Arc<Semaphore>,
}

impl PoolInner {
    async fn dial(&self) -> Result<TcpStream, PoolError> {
        let timeout = self.config.connect_timeout();
        let stream = match tokio::time::timeout(timeout, TcpStream::connect(&self.addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                metrics::record_backend_dial("error");
                return Err(PoolError::Connect {
                    addr: self.addr.clone(),
                    source,
                });
            }
            Err(_) => {
                metrics::record_backend_dial("timeout");
                return Err(PoolError::ConnectTimeout {
                    addr: self.addr.clone(),
                    timeout,
                });
            }
        };
        metrics::record_backend_dial("success");

        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY on backend connection: {}", e);
        }
        let keepalive = TcpKeepalive::new().with_time(self.config.keepalive());
        if let Err(e) = SockRef::from(&stream).set_tcp_keepalive(&keepalive) {
            debug!("Failed to enable keepalive on backend connection: {}", e);
        }
        Ok(stream)
    }

    /// Pop idle connections until a live one is found.
    fn take_idle(&self) -> Option<TcpStream> {
        let mut idle = self.idle.lock();
        while let Some(stream) = idle.pop() {
            if is_reusable(&stream) {
                metrics::set_pool_idle(idle.len());
                return Some(stream);
            }
            debug!(backend = %self.addr, "Dropping stale idle backend connection");
        }
        metrics::set_pool_idle(0);
        None
    }

    fn release(&self, stream: TcpStream) {
        let mut idle = self.idle.lock();
        if idle.len() < self.config.max_size {
            idle.push(stream);
        }
        metrics::set_pool_idle(idle.len());
    }
}

/// An idle connection is reusable while the backend has neither closed it
/// nor sent anything on it.
fn is_reusable(stream: &TcpStream) -> bool {
    let mut probe = [0u8; 1];
    match stream.try_read(&mut probe) {
        Err(e) if e.kind() == ErrorKind::WouldBlock => true,
        _ => false,
    }
}

#[derive(Clone)]
pub struct BackendPool {
    inner: Arc<PoolInner>,
}

impl BackendPool {
    /// Create a pool and dial `min_idle` connections up front.
    pub async fn connect(
        addr: impl Into<String>,
        config: ConnectionPoolConfig,
    ) -> Result<Self, PoolError> {
        let inner = Arc::new(PoolInner {
            addr: addr.into(),
            permits: Arc::new(Semaphore::new(config.max_size)),
            idle: Mutex::new(Vec::with_capacity(config.max_size)),
            config,
        });

        for _ in 0..inner.config.min_idle {
            let stream = inner.dial().await?;
            inner.release(stream);
        }
        info!(
            "Backend pool for {} ready: min_idle={}, max_size={}",
            inner.addr, inner.config.min_idle, inner.config.max_size
        );

        Ok(Self { inner })
    }

    pub fn addr(&self) -> &str {
        &self.inner.addr
    }

    /// Borrow a backend connection, waiting up to the acquire timeout when
    /// every connection is lent out.
    pub async fn get(&self) -> Result<PooledConnection, PoolError> {
        let timeout = self.inner.config.acquire_timeout();
        let permit =
            match tokio::time::timeout(timeout, Arc::clone(&self.inner.permits).acquire_owned())
                .await
            {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) => return Err(PoolError::Closed),
                Err(_) => {
                    metrics::record_pool_exhausted();
                    warn!(backend = %self.inner.addr, "Backend pool exhausted");
                    return Err(PoolError::Exhausted(timeout));
                }
            };

        let stream = match self.inner.take_idle() {
            Some(stream) => stream,
            None => self.inner.dial().await?,
        };

        Ok(PooledConnection {
            stream: Some(stream),
            pool: Arc::clone(&self.inner),
            _permit: permit,
        })
    }

    pub fn status(&self) -> PoolStatus {
        let max_size = self.inner.config.max_size;
        PoolStatus {
            idle: self.inner.idle.lock().len(),
            in_use: max_size - self.inner.permits.available_permits(),
            max_size,
        }
    }
}

/// A backend connection on loan from a [`BackendPool`].
///
/// The stream can be taken out (to split it across relay tasks) and put back
/// with [`restore`](Self::restore). On drop, a stream that is present and was
/// not discarded goes back to the idle set; a missing stream simply frees its
/// slot.
pub struct PooledConnection {
    stream: Option<TcpStream>,
    pool: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    pub fn stream(&self) -> Option<&TcpStream> {
        self.stream.as_ref()
    }

    pub fn take(&mut self) -> Option<TcpStream> {
        self.stream.take()
    }

    pub fn restore(&mut self, stream: TcpStream) {
        self.stream = Some(stream);
    }

    /// Close the connection instead of returning it to the pool.
    pub fn discard(&mut self) {
        if self.stream.take().is_some() {
            debug!(backend = %self.pool.addr, "Discarding backend connection");
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(stream) = self.stream.take() {
            self.pool.release(stream);
        }
    }
}
