//! Rule CRUD handlers.

use crate::admin_api::types::{error_response, json_response, ApiResponse};
use crate::plan::{Plan, PlanError};
use crate::rule::Rule;
use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use tracing::info;

fn plan_error_response(err: &PlanError) -> Response<Full<Bytes>> {
    let status = match err {
        PlanError::AlreadyExists(_) => StatusCode::CONFLICT,
        e if e.is_validation() => StatusCode::BAD_REQUEST,
        _ => StatusCode::NOT_FOUND,
    };
    error_response(status, &err.to_string())
}

/// GET /rules
pub fn handle_list(plan: &Plan) -> Response<Full<Bytes>> {
    json_response(StatusCode::OK, &ApiResponse::with_rules(plan.list_rules()))
}

/// POST /rules
pub fn handle_create(plan: &Plan, body: &[u8]) -> Response<Full<Bytes>> {
    if body.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Please send a request body");
    }
    let rule: Rule = match serde_json::from_slice(body) {
        Ok(r) => r,
        Err(e) => {
            return error_response(StatusCode::BAD_REQUEST, &format!("Invalid rule JSON: {e}"))
        }
    };

    let name = rule.name.clone();
    if let Err(e) = plan.add_rule(rule) {
        return plan_error_response(&e);
    }
    info!(rule = %name, "Rule created via admin API");

    match plan.get_rule(&name) {
        Ok(created) => json_response(StatusCode::OK, &ApiResponse::with_rules(vec![created])),
        // Deleted concurrently between add and read-back.
        Err(e) => plan_error_response(&e),
    }
}

/// GET /rules/{name}
pub fn handle_get(plan: &Plan, name: &str) -> Response<Full<Bytes>> {
    match plan.get_rule(name) {
        Ok(rule) => json_response(StatusCode::OK, &ApiResponse::with_rules(vec![rule])),
        Err(e) => plan_error_response(&e),
    }
}

/// DELETE /rules/{name}
pub fn handle_delete(plan: &Plan, name: &str) -> Response<Full<Bytes>> {
    match plan.delete_rule(name) {
        Ok(()) => {
            info!(rule = %name, "Rule deleted via admin API");
            json_response(StatusCode::OK, &ApiResponse::ok())
        }
        Err(e) => plan_error_response(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin_api::types::body_json;

    #[tokio::test]
    async fn test_list_empty() {
        let plan = Plan::new();
        let resp = handle_list(&plan);
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["ok"], true);
        assert_eq!(json["rules"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_create_then_get() {
        let plan = Plan::new();
        let resp = handle_create(
            &plan,
            br#"{"name": "drop_20", "drop": true, "percentage": 20}"#,
        );
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["rules"][0]["name"], "drop_20");
        assert_eq!(json["rules"][0]["hits"], 0);

        let json = body_json(handle_get(&plan, "drop_20")).await;
        assert_eq!(json["rules"][0]["drop"], true);
        assert_eq!(json["rules"][0]["percentage"], 20);
    }

    #[tokio::test]
    async fn test_create_rejects_bad_percentage() {
        let plan = Plan::new();
        let resp = handle_create(&plan, br#"{"name": "bad", "percentage": 101}"#);
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let json = body_json(resp).await;
        assert_eq!(json["ok"], false);
        assert!(json["msg"].as_str().unwrap().contains("percentage"));
        assert!(plan.is_empty());
    }

    #[test]
    fn test_create_rejects_bad_json() {
        let plan = Plan::new();
        assert_eq!(
            handle_create(&plan, b"{nope").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(handle_create(&plan, b"").status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_create_duplicate_conflicts() {
        let plan = Plan::new();
        assert_eq!(
            handle_create(&plan, br#"{"name": "a"}"#).status(),
            StatusCode::OK
        );
        assert_eq!(
            handle_create(&plan, br#"{"name": "a", "delay": 5}"#).status(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn test_hits_field_is_not_configuration() {
        let plan = Plan::new();
        handle_create(&plan, br#"{"name": "h", "hits": 99}"#);
        assert_eq!(plan.get_rule("h").unwrap().hits, 0);
    }

    #[test]
    fn test_get_and_delete_missing() {
        let plan = Plan::new();
        assert_eq!(handle_get(&plan, "ghost").status(), StatusCode::NOT_FOUND);
        assert_eq!(handle_delete(&plan, "ghost").status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_delete() {
        let plan = Plan::new();
        plan.add_rule(Rule::new("gone")).unwrap();
        let resp = handle_delete(&plan, "gone");
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await, serde_json::json!({"ok": true}));
        assert!(plan.is_empty());
    }
}
