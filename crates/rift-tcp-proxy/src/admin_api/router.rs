//! Route dispatch logic for the Admin API.

use crate::admin_api::handlers::{rules, system};
use crate::admin_api::server::AdminState;
use crate::admin_api::types::{collect_body, error_response, not_found};
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use std::sync::Arc;
use tracing::debug;

/// Parsed admin route
#[derive(Debug, PartialEq, Eq)]
enum Route<'a> {
    Health,
    Metrics,
    Rules,
    Rule(&'a str),
}

impl<'a> Route<'a> {
    fn parse(path: &'a str) -> Option<Self> {
        let trimmed = path.trim_end_matches('/');
        match trimmed {
            "/health" => return Some(Route::Health),
            "/metrics" => return Some(Route::Metrics),
            "/rules" => return Some(Route::Rules),
            _ => {}
        }
        let name = trimmed.strip_prefix("/rules/")?;
        if name.is_empty() || name.contains('/') {
            return None;
        }
        Some(Route::Rule(name))
    }
}

/// Main request router
pub async fn route_request(
    req: Request<Incoming>,
    state: Arc<AdminState>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    debug!("Admin API: {} {}", method, path);

    let Some(route) = Route::parse(&path) else {
        return Ok(not_found());
    };

    let response = match (method, route) {
        (Method::GET, Route::Health) => system::handle_health(&state),
        (Method::GET, Route::Metrics) => system::handle_metrics(),
        (Method::GET, Route::Rules) => rules::handle_list(&state.plan),
        (Method::POST, Route::Rules) => match collect_body(req).await {
            Ok(body) => rules::handle_create(&state.plan, &body),
            Err(e) => error_response(StatusCode::BAD_REQUEST, &e),
        },
        (Method::GET, Route::Rule(name)) => rules::handle_get(&state.plan, name),
        (Method::DELETE, Route::Rule(name)) => rules::handle_delete(&state.plan, name),
        (_, _) => not_found(),
    };
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_parse() {
        assert_eq!(Route::parse("/rules"), Some(Route::Rules));
        assert_eq!(Route::parse("/rules/"), Some(Route::Rules));
        assert_eq!(Route::parse("/rules/drop_20"), Some(Route::Rule("drop_20")));
        assert_eq!(Route::parse("/rules/drop_20/"), Some(Route::Rule("drop_20")));
        assert_eq!(Route::parse("/health"), Some(Route::Health));
        assert_eq!(Route::parse("/metrics"), Some(Route::Metrics));
    }

    #[test]
    fn test_route_parse_unknown() {
        assert_eq!(Route::parse("/"), None);
        assert_eq!(Route::parse("/rules/a/b"), None);
        assert_eq!(Route::parse("/imposters"), None);
    }
}
