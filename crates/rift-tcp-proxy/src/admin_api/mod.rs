//! HTTP management API for the rule store.
//!
//! Endpoints:
//! - `GET /rules`, `POST /rules`
//! - `GET /rules/{name}`, `DELETE /rules/{name}`
//! - `GET /health`, `GET /metrics`

mod handlers;
mod router;
mod server;
mod types;

pub use server::{AdminApiServer, AdminState};
pub use types::ApiResponse;
