//! Health and metrics handlers.

use crate::admin_api::server::AdminState;
use crate::admin_api::types::{build_response_with_headers, json_response};
use crate::metrics::collect_metrics;
use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde_json::json;

/// GET /health
pub fn handle_health(state: &AdminState) -> Response<Full<Bytes>> {
    let body = json!({
        "status": "healthy",
        "rules": state.plan.len(),
        "pool": state.pool.as_ref().map(|p| p.status()),
    });
    json_response(StatusCode::OK, &body)
}

/// GET /metrics
pub fn handle_metrics() -> Response<Full<Bytes>> {
    build_response_with_headers(
        StatusCode::OK,
        [("Content-Type", "text/plain; version=0.0.4")],
        collect_metrics(),
    )
}
