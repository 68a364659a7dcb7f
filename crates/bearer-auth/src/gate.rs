//! Per-request authentication and authorization orchestration.
//!
//! The gate owns the token validator and the policy evaluator and runs
//! the whole sequence for one request: extract the bearer credential,
//! validate it, then evaluate the route's policy against the resulting
//! principal (or its absence). Authentication failures do not
//! short-circuit authorization; a zero-requirement policy still admits a
//! request whose token failed validation.

use crate::claims::ClaimsPrincipal;
use crate::errors::ValidationFailure;
use crate::policy::{AuthorizationDecision, PolicyEvaluator};
use crate::validator::TokenValidator;
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use std::sync::Arc;
use tracing::instrument;

/// The outcome of running the gate for one request.
#[derive(Debug)]
pub struct GateResult {
    /// The verified principal, when the request carried a valid token.
    pub principal: Option<ClaimsPrincipal>,

    /// The authorization decision for the route's policy.
    pub decision: AuthorizationDecision,

    /// Why token validation failed, when a credential was presented and
    /// rejected. Absent requests and absent credentials leave this empty.
    pub failure: Option<ValidationFailure>,
}

/// Runs authentication and authorization for each request.
///
/// Constructed once at startup and shared by reference; holds no
/// per-request state.
pub struct AuthenticationGate {
    validator: Arc<TokenValidator>,
    evaluator: PolicyEvaluator,
}

impl AuthenticationGate {
    pub fn new(validator: Arc<TokenValidator>, evaluator: PolicyEvaluator) -> Self {
        Self {
            validator,
            evaluator,
        }
    }

    pub fn evaluator(&self) -> &PolicyEvaluator {
        &self.evaluator
    }

    /// Authenticate the request's bearer credential (if any) and
    /// evaluate the route's policy.
    ///
    /// `policy_name` is the route's declared policy; `None` selects the
    /// fallback policy.
    #[instrument(skip_all, fields(policy = policy_name.unwrap_or("<fallback>")))]
    pub async fn handle(&self, headers: &HeaderMap, policy_name: Option<&str>) -> GateResult {
        let (principal, failure) = match extract_bearer(headers) {
            None => (None, None),
            Some(token) => match self.validator.validate(token).await {
                Ok(principal) => (Some(principal), None),
                Err(failure) => {
                    tracing::debug!(
                        target: "auth.gate",
                        failure = %failure.kind,
                        "bearer token rejected"
                    );
                    metrics::counter!("auth_token_validation_failure_total").increment(1);
                    (None, Some(failure))
                }
            },
        };

        let decision = self.evaluator.evaluate_named(policy_name, principal.as_ref());

        GateResult {
            principal,
            decision,
            failure,
        }
    }
}

impl std::fmt::Debug for AuthenticationGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticationGate").finish_non_exhaustive()
    }
}

/// Extract the bearer token from the `Authorization` header.
///
/// The scheme comparison is case-insensitive per RFC 7235. A header that
/// is present but not a well-formed bearer credential is logged and
/// treated the same as no credential at all.
fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let header = headers.get(AUTHORIZATION)?;

    let Ok(value) = header.to_str() else {
        tracing::warn!(target: "auth.gate", "authorization header is not valid UTF-8");
        metrics::counter!("auth_authorization_header_malformed_total").increment(1);
        return None;
    };

    let Some((scheme, token)) = value.split_once(' ') else {
        tracing::warn!(target: "auth.gate", "authorization header has no scheme separator");
        metrics::counter!("auth_authorization_header_malformed_total").increment(1);
        return None;
    };

    if !scheme.eq_ignore_ascii_case("bearer") {
        tracing::warn!(target: "auth.gate", "authorization header uses a non-bearer scheme");
        metrics::counter!("auth_authorization_header_malformed_total").increment(1);
        return None;
    }

    let token = token.trim();
    if token.is_empty() {
        tracing::warn!(target: "auth.gate", "authorization header carries an empty credential");
        metrics::counter!("auth_authorization_header_malformed_total").increment(1);
        return None;
    }

    Some(token)
}
