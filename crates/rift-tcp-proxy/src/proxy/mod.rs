//! Proxy server module.
//!
//! This module provides the TCP relay with per-chunk fault injection:
//! - Delay, drop, and reply substitution driven by the shared [`Plan`](crate::plan::Plan)
//! - Pooled backend connections returned to the pool when a session ends
//!
//! # Module Structure
//!
//! - `server` - ProxyServer struct and accept loop
//! - `session` - Per-connection relay tasks
//! - `fault` - Mapping a selected rule to a relay action
//! - `network` - Listener utilities

mod fault;
mod network;
mod server;
mod session;

pub use fault::{decide_fault, FaultDecision, SubstituteKind};
pub(crate) use network::accept_with_backoff;
pub use network::bind_listener;
pub use server::ProxyServer;
pub use session::{run_session, RelayEnd, SessionContext};
