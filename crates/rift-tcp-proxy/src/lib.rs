//! Rift TCP: a fault-injecting proxy for key-value servers.
//!
//! Clients connect to the proxy instead of the backend. Every chunk a client
//! sends is checked against a live [`plan::Plan`] of rules which may delay it,
//! drop the connection or substitute a reply. Rules are managed through the
//! HTTP [`admin_api`] and the RESP [`control`] endpoint while traffic flows.

pub mod admin_api;
pub mod config;
pub mod control;
pub mod metrics;
pub mod plan;
pub mod pool;
pub mod proxy;
pub mod rule;
