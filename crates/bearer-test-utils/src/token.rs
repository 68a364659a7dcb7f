//! Builder for test JWT claims.

use crate::keypair::TestKeypair;
use chrono::{Duration, Utc};
use serde_json::{json, Map, Value};

/// Builder for creating test JWT claims.
///
/// # Example
/// ```rust,ignore
/// let token = TestTokenBuilder::new()
///     .subject("alice")
///     .issuer(authority.issuer())
///     .audience("api://orders")
///     .expires_in(3600)
///     .sign_with(&keypair);
/// ```
pub struct TestTokenBuilder {
    claims: Map<String, Value>,
}

impl TestTokenBuilder {
    /// Create a builder with a default subject, issued-at of now and an
    /// expiry one hour out. Issuer and audience default to empty and
    /// should be set to match the configuration under test.
    pub fn new() -> Self {
        let now = Utc::now();
        let mut claims = Map::new();
        claims.insert("sub".to_string(), json!("test-subject"));
        claims.insert("iat".to_string(), json!(now.timestamp()));
        claims.insert(
            "exp".to_string(),
            json!((now + Duration::seconds(3600)).timestamp()),
        );

        Self { claims }
    }

    pub fn subject(mut self, subject: &str) -> Self {
        self.claims.insert("sub".to_string(), json!(subject));
        self
    }

    pub fn issuer(mut self, issuer: &str) -> Self {
        self.claims.insert("iss".to_string(), json!(issuer));
        self
    }

    /// Set a single string audience.
    pub fn audience(mut self, audience: &str) -> Self {
        self.claims.insert("aud".to_string(), json!(audience));
        self
    }

    /// Set an array-valued audience.
    pub fn audiences(mut self, audiences: &[&str]) -> Self {
        self.claims.insert("aud".to_string(), json!(audiences));
        self
    }

    /// Set expiry as an offset in seconds from now (may be negative).
    pub fn expires_in(mut self, seconds: i64) -> Self {
        self.claims.insert(
            "exp".to_string(),
            json!((Utc::now() + Duration::seconds(seconds)).timestamp()),
        );
        self
    }

    /// Set an absolute expiry timestamp.
    pub fn expires_at(mut self, timestamp: i64) -> Self {
        self.claims.insert("exp".to_string(), json!(timestamp));
        self
    }

    /// Drop the expiry claim entirely.
    pub fn without_expiry(mut self) -> Self {
        self.claims.remove("exp");
        self
    }

    /// Set an absolute not-before timestamp.
    pub fn not_before(mut self, timestamp: i64) -> Self {
        self.claims.insert("nbf".to_string(), json!(timestamp));
        self
    }

    /// Set an arbitrary extra claim.
    pub fn claim(mut self, name: &str, value: Value) -> Self {
        self.claims.insert(name.to_string(), value);
        self
    }

    /// Build the claims as a JSON value.
    pub fn build(self) -> Value {
        Value::Object(self.claims)
    }

    /// Build the claims and sign them with the given keypair.
    pub fn sign_with(self, keypair: &TestKeypair) -> String {
        keypair.sign_token(&self.build())
    }
}

impl Default for TestTokenBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_creates_valid_claims() {
        let claims = TestTokenBuilder::new()
            .subject("alice")
            .issuer("https://auth.test")
            .audience("api://orders")
            .claim("roles", json!(["reader"]))
            .build();

        assert_eq!(claims["sub"], "alice");
        assert_eq!(claims["iss"], "https://auth.test");
        assert_eq!(claims["aud"], "api://orders");
        assert_eq!(claims["roles"], json!(["reader"]));
        assert!(claims["exp"].as_i64().unwrap() > 0);
    }

    #[test]
    fn test_builder_default() {
        let claims = TestTokenBuilder::default().build();
        assert_eq!(claims["sub"], "test-subject");
    }

    #[test]
    fn test_array_audience() {
        let claims = TestTokenBuilder::new()
            .audiences(&["api://orders", "api://billing"])
            .build();
        assert_eq!(claims["aud"], json!(["api://orders", "api://billing"]));
    }

    #[test]
    fn test_without_expiry() {
        let claims = TestTokenBuilder::new().without_expiry().build();
        assert!(claims.get("exp").is_none());
    }
}
