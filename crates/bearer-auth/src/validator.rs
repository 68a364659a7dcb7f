//! Bearer-token validation.
//!
//! Validation runs five checks in a fixed order, each with a distinct
//! failure mode, and the first failure short-circuits:
//!
//! 1. Structural parse (`Malformed`)
//! 2. Signature against the cached key set (`BadSignature`)
//! 3. Issuer allow-set (`IssuerMismatch`)
//! 4. Audience allow-set (`AudienceMismatch`)
//! 5. Temporal claims with clock-skew tolerance (`Expired` / `NotYetValid`)
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing (DoS prevention)
//! - Only EdDSA (Ed25519) signatures are accepted
//! - Key-resolution failures are reported as `BadSignature`, deliberately
//!   indistinguishable from a forged signature; the cause is logged
//!   server-side only

use crate::claims::ClaimsPrincipal;
use crate::config::AuthConfig;
use crate::errors::ValidationFailure;
use crate::keyset::{KeySetCache, SigningKey};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::{decode, Algorithm, Validation};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// Maximum allowed token size in bytes (8 KiB).
///
/// Oversized tokens are rejected before any base64 decoding or
/// cryptographic work.
pub const MAX_TOKEN_SIZE_BYTES: usize = 8192;

/// Default clock-skew tolerance for temporal claims (5 minutes).
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(300);

/// Maximum configurable clock-skew tolerance (10 minutes).
///
/// Prevents misconfiguration from weakening temporal checks.
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(600);

/// Validates bearer tokens against the cached signing-key set.
pub struct TokenValidator {
    key_set_cache: Arc<KeySetCache>,
    valid_issuers: Vec<String>,
    valid_audiences: Vec<String>,
    clock_skew_seconds: i64,
}

impl TokenValidator {
    /// Create a validator drawing its allow-sets from the configured
    /// trust mode.
    pub fn new(key_set_cache: Arc<KeySetCache>, config: &AuthConfig) -> Self {
        // Bounded at MAX_CLOCK_SKEW (600s) by config validation, so the
        // cast cannot wrap.
        #[allow(clippy::cast_possible_wrap)]
        let clock_skew_seconds = config.clock_skew.as_secs() as i64;

        Self {
            key_set_cache,
            valid_issuers: config.valid_issuers(),
            valid_audiences: config.valid_audiences(),
            clock_skew_seconds,
        }
    }

    /// Validate a token and return its claims principal.
    ///
    /// # Errors
    ///
    /// Returns the [`ValidationFailure`] of the first failing check; no
    /// partial principal is ever produced.
    #[instrument(skip_all)]
    pub async fn validate(&self, token: &str) -> Result<ClaimsPrincipal, ValidationFailure> {
        self.validate_at(token, chrono::Utc::now().timestamp()).await
    }

    /// Deterministic validation against an explicit `now` timestamp.
    ///
    /// Prefer [`validate`](Self::validate) in production code; this
    /// variant exists so temporal boundaries can be tested without
    /// wall-clock dependence.
    pub async fn validate_at(
        &self,
        token: &str,
        now: i64,
    ) -> Result<ClaimsPrincipal, ValidationFailure> {
        // (a) structural parse
        let kid = parse_structure(token)?;

        // (b) signature, via the cached key set
        let key = match self.key_set_cache.get_key(&kid).await {
            Ok(key) => key,
            Err(err) => {
                // Deliberately reported as a signature failure so clients
                // cannot distinguish key-infrastructure state from a forgery.
                tracing::warn!(target: "auth.validator", error = %err, "signing key resolution failed");
                return Err(ValidationFailure::bad_signature(
                    "signature could not be verified",
                ));
            }
        };
        let claims = verify_signature(token, &key)?;

        // (c) issuer
        let issuer = claims
            .get("iss")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if !self.valid_issuers.iter().any(|i| i == issuer) {
            tracing::debug!(target: "auth.validator", "token issuer not in allow-set");
            return Err(ValidationFailure::issuer_mismatch(
                "token issuer is not trusted",
            ));
        }

        // (d) audience
        let audiences = token_audiences(&claims);
        let matched = audiences
            .iter()
            .any(|aud| self.valid_audiences.iter().any(|a| a == aud));
        if !matched {
            tracing::debug!(target: "auth.validator", "token audience does not intersect allow-set");
            return Err(ValidationFailure::audience_mismatch(
                "token audience is not accepted",
            ));
        }

        // (e) temporal, with clock-skew tolerance
        let exp = claims
            .get("exp")
            .and_then(Value::as_i64)
            .ok_or_else(|| ValidationFailure::malformed("exp claim missing"))?;
        if exp < now - self.clock_skew_seconds {
            tracing::debug!(target: "auth.validator", exp, now, "token expired");
            return Err(ValidationFailure::expired(format!(
                "token expired at {}",
                exp
            )));
        }
        if let Some(nbf) = claims.get("nbf").and_then(Value::as_i64) {
            if nbf > now + self.clock_skew_seconds {
                tracing::debug!(target: "auth.validator", nbf, now, "token not yet valid");
                return Err(ValidationFailure::not_yet_valid(format!(
                    "token not valid before {}",
                    nbf
                )));
            }
        }

        tracing::debug!(target: "auth.validator", "token validated successfully");
        Ok(ClaimsPrincipal::from_claims(
            &claims,
            issuer.to_string(),
            exp,
        ))
    }
}

impl std::fmt::Debug for TokenValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenValidator")
            .field("valid_issuers", &self.valid_issuers)
            .field("valid_audiences", &self.valid_audiences)
            .field("clock_skew_seconds", &self.clock_skew_seconds)
            .finish_non_exhaustive()
    }
}

/// Structural parse: size cap, three segments, decodable header and
/// payload, `kid` present, numeric `exp` present.
///
/// Returns the key ID; the claims themselves come from the verified
/// decode in [`verify_signature`].
fn parse_structure(token: &str) -> Result<String, ValidationFailure> {
    if token.len() > MAX_TOKEN_SIZE_BYTES {
        tracing::debug!(
            target: "auth.validator",
            token_size = token.len(),
            max_size = MAX_TOKEN_SIZE_BYTES,
            "token rejected: size exceeds maximum allowed"
        );
        return Err(ValidationFailure::malformed("token exceeds size limit"));
    }

    let mut segments = token.split('.');
    let (Some(header), Some(payload), Some(signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(ValidationFailure::malformed(
            "token is not three dot-separated segments",
        ));
    };
    if header.is_empty() || payload.is_empty() || signature.is_empty() {
        return Err(ValidationFailure::malformed("token has an empty segment"));
    }

    let header: Value = decode_segment(header, "header")?;
    let payload: Value = decode_segment(payload, "payload")?;

    // Reject empty kid for defense-in-depth.
    let kid = header
        .get("kid")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ValidationFailure::malformed("token header carries no kid"))?;

    if payload.get("exp").and_then(Value::as_i64).is_none() {
        return Err(ValidationFailure::malformed(
            "token payload carries no numeric exp",
        ));
    }

    Ok(kid.to_string())
}

fn decode_segment(segment: &str, which: &str) -> Result<Value, ValidationFailure> {
    let bytes = URL_SAFE_NO_PAD.decode(segment).map_err(|e| {
        tracing::debug!(target: "auth.validator", error = %e, "failed to decode token {which} base64");
        ValidationFailure::malformed(format!("token {} is not valid base64url", which))
    })?;

    serde_json::from_slice(&bytes).map_err(|e| {
        tracing::debug!(target: "auth.validator", error = %e, "failed to parse token {which} JSON");
        ValidationFailure::malformed(format!("token {} is not valid JSON", which))
    })
}

/// Verify the EdDSA signature and return the raw claims.
///
/// Issuer, audience and temporal checks are performed by the caller in
/// their fixed order, so the library-level checks are disabled here.
fn verify_signature(
    token: &str,
    key: &SigningKey,
) -> Result<Map<String, Value>, ValidationFailure> {
    let mut validation = Validation::new(Algorithm::EdDSA);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims = HashSet::new();

    let token_data =
        decode::<Map<String, Value>>(token, key.decoding_key(), &validation).map_err(|e| {
            tracing::debug!(target: "auth.validator", error = %e, "signature verification failed");
            ValidationFailure::bad_signature("signature verification failed")
        })?;

    Ok(token_data.claims)
}

/// The token's audience values: a bare string or an array of strings.
fn token_audiences(claims: &Map<String, Value>) -> Vec<&str> {
    match claims.get("aud") {
        Some(Value::String(aud)) => vec![aud.as_str()],
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn encode_segment(value: &Value) -> String {
        URL_SAFE_NO_PAD.encode(value.to_string().as_bytes())
    }

    fn well_formed_token(kid: &str) -> String {
        let header = encode_segment(&json!({"alg": "EdDSA", "typ": "JWT", "kid": kid}));
        let payload = encode_segment(&json!({"sub": "u", "exp": 9_999_999_999_i64}));
        format!("{}.{}.signature", header, payload)
    }

    #[test]
    fn test_parse_structure_valid_token() {
        let kid = parse_structure(&well_formed_token("test-key-01")).unwrap();
        assert_eq!(kid, "test-key-01");
    }

    #[test]
    fn test_parse_structure_wrong_segment_count() {
        assert!(parse_structure("only.two").is_err());
        assert!(parse_structure("one.two.three.four").is_err());
        assert!(parse_structure("single").is_err());
        assert!(parse_structure("").is_err());
    }

    #[test]
    fn test_parse_structure_empty_segment() {
        assert!(parse_structure(".payload.signature").is_err());
        assert!(parse_structure("header..signature").is_err());
    }

    #[test]
    fn test_parse_structure_invalid_base64() {
        assert!(parse_structure("!!!invalid!!!.payload.signature").is_err());
    }

    #[test]
    fn test_parse_structure_invalid_json() {
        let header = URL_SAFE_NO_PAD.encode("not valid json");
        let token = format!("{}.payload.signature", header);
        assert!(parse_structure(&token).is_err());
    }

    #[test]
    fn test_parse_structure_missing_kid() {
        let header = encode_segment(&json!({"alg": "EdDSA", "typ": "JWT"}));
        let payload = encode_segment(&json!({"exp": 9_999_999_999_i64}));
        let token = format!("{}.{}.signature", header, payload);
        assert!(parse_structure(&token).is_err());
    }

    #[test]
    fn test_parse_structure_empty_kid() {
        let header = encode_segment(&json!({"alg": "EdDSA", "kid": ""}));
        let payload = encode_segment(&json!({"exp": 9_999_999_999_i64}));
        let token = format!("{}.{}.signature", header, payload);
        assert!(parse_structure(&token).is_err());
    }

    #[test]
    fn test_parse_structure_non_string_kid() {
        let header = encode_segment(&json!({"alg": "EdDSA", "kid": 12345}));
        let payload = encode_segment(&json!({"exp": 9_999_999_999_i64}));
        let token = format!("{}.{}.signature", header, payload);
        assert!(parse_structure(&token).is_err());
    }

    #[test]
    fn test_parse_structure_missing_exp() {
        let header = encode_segment(&json!({"alg": "EdDSA", "kid": "k"}));
        let payload = encode_segment(&json!({"sub": "u"}));
        let token = format!("{}.{}.signature", header, payload);
        assert!(parse_structure(&token).is_err());
    }

    #[test]
    fn test_parse_structure_oversized_token() {
        let oversized = "a".repeat(MAX_TOKEN_SIZE_BYTES + 1);
        let failure = parse_structure(&oversized).unwrap_err();
        assert_eq!(failure.kind, crate::ValidationFailureKind::Malformed);
    }

    #[test]
    fn test_parse_structure_at_size_limit() {
        let header = encode_segment(&json!({"alg": "EdDSA", "kid": "key"}));
        let payload = encode_segment(&json!({"exp": 9_999_999_999_i64}));
        let used = header.len() + payload.len() + 2;
        let token = format!(
            "{}.{}.{}",
            header,
            payload,
            "s".repeat(MAX_TOKEN_SIZE_BYTES - used)
        );
        assert_eq!(token.len(), MAX_TOKEN_SIZE_BYTES);

        assert_eq!(parse_structure(&token).unwrap(), "key");
    }

    #[test]
    fn test_token_audiences_string() {
        let claims = json!({"aud": "api://orders"});
        let claims = claims.as_object().unwrap();
        assert_eq!(token_audiences(claims), vec!["api://orders"]);
    }

    #[test]
    fn test_token_audiences_array() {
        let claims = json!({"aud": ["api://orders", "api://billing"]});
        let claims = claims.as_object().unwrap();
        assert_eq!(
            token_audiences(claims),
            vec!["api://orders", "api://billing"]
        );
    }

    #[test]
    fn test_token_audiences_absent() {
        let claims = json!({"sub": "u"});
        let claims = claims.as_object().unwrap();
        assert!(token_audiences(claims).is_empty());
    }

    #[test]
    fn test_clock_skew_constants() {
        assert_eq!(DEFAULT_CLOCK_SKEW, Duration::from_secs(300));
        assert_eq!(MAX_CLOCK_SKEW, Duration::from_secs(600));
        assert_eq!(MAX_TOKEN_SIZE_BYTES, 8192);
    }
}
