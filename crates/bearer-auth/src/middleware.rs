//! axum integration: per-request enforcement and HTTP status mapping.
//!
//! The hosting layer attaches [`enforce`] as a middleware layer and tags
//! routes with [`RoutePolicy`] extensions. The extension layer must sit
//! OUTSIDE the enforcement layer (added after it with `route_layer`) so
//! the policy name is present by the time the gate runs:
//!
//! ```rust,ignore
//! Router::new()
//!     .route("/orders", get(list_orders))
//!     .route_layer(middleware::from_fn_with_state(state, enforce))
//!     .route_layer(Extension(RoutePolicy("writers")))
//! ```
//!
//! Denied requests are answered
//! here; allowed requests proceed to the handler with the verified
//! [`ClaimsPrincipal`] inserted into the request extensions, where
//! handlers pick it up via `axum::Extension<ClaimsPrincipal>`.
//!
//! Status mapping: `Unauthenticated` is 401 with a `WWW-Authenticate`
//! challenge; a failed requirement is 403. Response bodies carry a
//! generic message unless `include_error_details` is enabled.

use crate::claims::ClaimsPrincipal;
use crate::gate::AuthenticationGate;
use crate::policy::{AuthorizationDecision, DenyReason};
use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::sync::Arc;

const BEARER_CHALLENGE: &str = r#"Bearer realm="protected", error="invalid_token""#;

/// Route extension naming the policy that governs the route.
///
/// Routes without this extension are governed by the fallback policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutePolicy(pub &'static str);

/// Shared state for the enforcement middleware.
#[derive(Clone)]
pub struct GateState {
    pub gate: Arc<AuthenticationGate>,
    pub include_error_details: bool,
}

impl std::fmt::Debug for GateState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GateState")
            .field("include_error_details", &self.include_error_details)
            .finish_non_exhaustive()
    }
}

/// Middleware that runs the authentication gate for every request.
pub async fn enforce(State(state): State<GateState>, mut req: Request, next: Next) -> Response {
    let policy_name = req.extensions().get::<RoutePolicy>().map(|p| p.0);

    let result = state.gate.handle(req.headers(), policy_name).await;

    match result.decision {
        AuthorizationDecision::Allow => {
            if let Some(principal) = result.principal {
                req.extensions_mut().insert(principal);
            }
            next.run(req).await
        }
        AuthorizationDecision::Deny(reason) => {
            let detail = result.failure.map(|f| f.to_string());
            deny_response(&reason, detail, state.include_error_details)
        }
    }
}

/// Map a deny reason onto an HTTP response.
fn deny_response(reason: &DenyReason, detail: Option<String>, include_details: bool) -> Response {
    let (status, code, generic) = match reason {
        DenyReason::Unauthenticated => (
            StatusCode::UNAUTHORIZED,
            "UNAUTHENTICATED",
            "The access token is missing, invalid or expired",
        ),
        DenyReason::RequirementFailed(_) => (StatusCode::FORBIDDEN, "FORBIDDEN", "Access denied"),
    };

    let message = if include_details {
        match reason {
            DenyReason::Unauthenticated => detail.unwrap_or_else(|| generic.to_string()),
            DenyReason::RequirementFailed(_) => reason.to_string(),
        }
    } else {
        generic.to_string()
    };

    let body = Json(json!({
        "error": {
            "code": code,
            "message": message,
        }
    }));

    let mut response = (status, body).into_response();
    if status == StatusCode::UNAUTHORIZED {
        response.headers_mut().insert(
            header::WWW_AUTHENTICATE,
            HeaderValue::from_static(BEARER_CHALLENGE),
        );
    }
    response
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_unauthenticated_is_401_with_challenge() {
        let response = deny_response(&DenyReason::Unauthenticated, None, false);

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            BEARER_CHALLENGE
        );

        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "UNAUTHENTICATED");
        assert_eq!(
            body["error"]["message"],
            "The access token is missing, invalid or expired"
        );
    }

    #[tokio::test]
    async fn test_requirement_failed_is_403_without_challenge() {
        let reason = DenyReason::RequirementFailed("role-in-set(roles)".to_string());
        let response = deny_response(&reason, None, false);

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(response.headers().get(header::WWW_AUTHENTICATE).is_none());

        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "FORBIDDEN");
        assert_eq!(body["error"]["message"], "Access denied");
    }

    #[tokio::test]
    async fn test_details_suppressed_by_default() {
        let response = deny_response(
            &DenyReason::Unauthenticated,
            Some("expired: token expired at 1700000000".to_string()),
            false,
        );

        let body = body_json(response).await;
        assert_eq!(
            body["error"]["message"],
            "The access token is missing, invalid or expired"
        );
    }

    #[tokio::test]
    async fn test_details_surfaced_when_enabled() {
        let response = deny_response(
            &DenyReason::Unauthenticated,
            Some("expired: token expired at 1700000000".to_string()),
            true,
        );

        let body = body_json(response).await;
        assert_eq!(
            body["error"]["message"],
            "expired: token expired at 1700000000"
        );
    }

    #[tokio::test]
    async fn test_requirement_detail_when_enabled() {
        let reason = DenyReason::RequirementFailed("claim-equals(department)".to_string());
        let response = deny_response(&reason, None, true);

        let body = body_json(response).await;
        assert_eq!(
            body["error"]["message"],
            "requirement failed: claim-equals(department)"
        );
    }
}
