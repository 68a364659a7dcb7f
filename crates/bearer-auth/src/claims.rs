//! The verified claims principal.
//!
//! A principal is the identity extracted from a successfully validated
//! token: a mapping from claim type to an ordered sequence of values,
//! plus the issuer and expiry. The `sub` claim is redacted in Debug
//! output to keep identifiers out of logs.

use serde_json::{Map, Value};
use std::collections::BTreeMap;

const EMPTY_VALUES: &[String] = &[];

/// Verified identity and attributes from a valid bearer token.
///
/// Created and destroyed within a single request's scope; never cached.
#[derive(Clone, PartialEq, Eq)]
pub struct ClaimsPrincipal {
    claims: BTreeMap<String, Vec<String>>,
    issuer: String,
    expires_at: i64,
}

impl ClaimsPrincipal {
    /// Build a principal from verified token claims.
    ///
    /// Claim values are copied verbatim: strings as-is, numbers and
    /// booleans as their canonical text, arrays flattened element-wise.
    /// Null values are dropped.
    pub fn from_claims(claims: &Map<String, Value>, issuer: String, expires_at: i64) -> Self {
        let claims = claims
            .iter()
            .filter_map(|(name, value)| {
                let values = claim_values_of(value);
                if values.is_empty() {
                    None
                } else {
                    Some((name.clone(), values))
                }
            })
            .collect();

        Self {
            claims,
            issuer,
            expires_at,
        }
    }

    /// The token issuer.
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Expiry timestamp (Unix epoch seconds).
    pub fn expires_at(&self) -> i64 {
        self.expires_at
    }

    /// All values of a claim type, in token order. Empty when absent.
    pub fn claim_values(&self, claim: &str) -> &[String] {
        self.claims
            .get(claim)
            .map(Vec::as_slice)
            .unwrap_or(EMPTY_VALUES)
    }

    /// First value of a claim type, if any.
    pub fn first_claim(&self, claim: &str) -> Option<&str> {
        self.claim_values(claim).first().map(String::as_str)
    }

    /// Whether the claim carries the given value.
    pub fn has_claim_value(&self, claim: &str, value: &str) -> bool {
        self.claim_values(claim).iter().any(|v| v == value)
    }

    /// The subject identifier, if the token carried one.
    pub fn subject(&self) -> Option<&str> {
        self.first_claim("sub")
    }

    /// Claim types present on this principal.
    pub fn claim_types(&self) -> impl Iterator<Item = &str> {
        self.claims.keys().map(String::as_str)
    }
}

/// Custom Debug implementation that redacts the `sub` claim.
impl std::fmt::Debug for ClaimsPrincipal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redacted: BTreeMap<&str, Vec<&str>> = self
            .claims
            .iter()
            .map(|(name, values)| {
                if name == "sub" {
                    (name.as_str(), vec!["[REDACTED]"])
                } else {
                    (name.as_str(), values.iter().map(String::as_str).collect())
                }
            })
            .collect();

        f.debug_struct("ClaimsPrincipal")
            .field("issuer", &self.issuer)
            .field("expires_at", &self.expires_at)
            .field("claims", &redacted)
            .finish()
    }
}

fn claim_values_of(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => vec![s.clone()],
        Value::Bool(_) | Value::Number(_) => vec![value.to_string()],
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.clone()),
                Value::Bool(_) | Value::Number(_) => Some(item.to_string()),
                _ => None,
            })
            .collect(),
        // Nested objects carry no scalar claim values; nulls are dropped.
        Value::Object(_) | Value::Null => Vec::new(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn claims_map(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    fn sample_principal() -> ClaimsPrincipal {
        let claims = claims_map(json!({
            "sub": "user-123",
            "iss": "https://auth.example.com",
            "aud": ["api://orders", "api://billing"],
            "exp": 1_700_000_000,
            "roles": ["reader", "writer"],
            "department": "fulfilment"
        }));
        ClaimsPrincipal::from_claims(&claims, "https://auth.example.com".to_string(), 1_700_000_000)
    }

    #[test]
    fn test_scalar_claims_copied_verbatim() {
        let principal = sample_principal();

        assert_eq!(principal.claim_values("sub"), ["user-123"]);
        assert_eq!(principal.claim_values("department"), ["fulfilment"]);
        assert_eq!(principal.claim_values("exp"), ["1700000000"]);
    }

    #[test]
    fn test_array_claims_preserve_order() {
        let principal = sample_principal();

        assert_eq!(principal.claim_values("roles"), ["reader", "writer"]);
        assert_eq!(
            principal.claim_values("aud"),
            ["api://orders", "api://billing"]
        );
    }

    #[test]
    fn test_absent_claim_is_empty() {
        let principal = sample_principal();

        assert!(principal.claim_values("missing").is_empty());
        assert!(principal.first_claim("missing").is_none());
    }

    #[test]
    fn test_has_claim_value() {
        let principal = sample_principal();

        assert!(principal.has_claim_value("roles", "writer"));
        assert!(!principal.has_claim_value("roles", "admin"));
        // Partial match must not count.
        assert!(!principal.has_claim_value("roles", "read"));
    }

    #[test]
    fn test_subject_and_issuer() {
        let principal = sample_principal();

        assert_eq!(principal.subject(), Some("user-123"));
        assert_eq!(principal.issuer(), "https://auth.example.com");
        assert_eq!(principal.expires_at(), 1_700_000_000);
    }

    #[test]
    fn test_null_claims_dropped() {
        let claims = claims_map(json!({ "sub": "u", "optional": null }));
        let principal = ClaimsPrincipal::from_claims(&claims, "iss".to_string(), 0);

        assert!(principal.claim_values("optional").is_empty());
        assert_eq!(principal.claim_types().count(), 1);
    }

    #[test]
    fn test_debug_redacts_sub() {
        let principal = sample_principal();
        let debug_str = format!("{:?}", principal);

        assert!(
            !debug_str.contains("user-123"),
            "Debug output should not contain actual sub value"
        );
        assert!(
            debug_str.contains("[REDACTED]"),
            "Debug output should contain [REDACTED]"
        );
        // Non-sensitive claims remain visible.
        assert!(debug_str.contains("fulfilment"));
    }

    #[test]
    fn test_equality_for_identical_claims() {
        assert_eq!(sample_principal(), sample_principal());
    }
}
