//! Error types for key-set resolution and token validation.
//!
//! Client-facing messages are intentionally generic; the specific cause
//! is carried in the error value and logged server-side only.

use std::fmt;
use thiserror::Error;

/// Errors raised while resolving signing keys from the authority.
///
/// These never reach clients directly: the validator folds them into a
/// generic `BadSignature` outcome so infrastructure state is not leaked.
#[derive(Debug, Error)]
pub enum KeySetError {
    /// The remote metadata document was unreachable or malformed.
    #[error("signing-key metadata fetch failed: {0}")]
    MetadataFetch(String),

    /// A refresh failed and no cached key has a validity window covering now.
    #[error("no valid signing keys remain after a failed refresh")]
    NoValidKeySet,

    /// The requested key ID is absent even after a forced refresh.
    #[error("unknown signing key id: {0}")]
    UnknownKey(String),
}

/// The distinct ways token validation can fail.
///
/// Checks run in a fixed order (structure, signature, issuer, audience,
/// temporal) and the first failure short-circuits, so exactly one kind
/// is ever produced per token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationFailureKind {
    /// The token is not a well-formed compact JWT.
    Malformed,
    /// The signature did not verify, or the signing key could not be resolved.
    BadSignature,
    /// The token issuer is not in the configured allow-set.
    IssuerMismatch,
    /// The token audience does not intersect the configured allow-set.
    AudienceMismatch,
    /// The token expired before now minus the clock-skew tolerance.
    Expired,
    /// The token's not-before is after now plus the clock-skew tolerance.
    NotYetValid,
}

impl fmt::Display for ValidationFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValidationFailureKind::Malformed => "malformed",
            ValidationFailureKind::BadSignature => "bad-signature",
            ValidationFailureKind::IssuerMismatch => "issuer-mismatch",
            ValidationFailureKind::AudienceMismatch => "audience-mismatch",
            ValidationFailureKind::Expired => "expired",
            ValidationFailureKind::NotYetValid => "not-yet-valid",
        };
        f.write_str(name)
    }
}

/// A terminal token-validation failure: a kind plus human-readable detail.
///
/// The detail string is for operators and for responses only when the
/// `include_error_details` option is enabled.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind}: {detail}")]
pub struct ValidationFailure {
    /// Which validation step rejected the token.
    pub kind: ValidationFailureKind,
    /// Human-readable detail, suppressed from clients by default.
    pub detail: String,
}

impl ValidationFailure {
    /// Create a failure of the given kind.
    pub fn new(kind: ValidationFailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn malformed(detail: impl Into<String>) -> Self {
        Self::new(ValidationFailureKind::Malformed, detail)
    }

    pub fn bad_signature(detail: impl Into<String>) -> Self {
        Self::new(ValidationFailureKind::BadSignature, detail)
    }

    pub fn issuer_mismatch(detail: impl Into<String>) -> Self {
        Self::new(ValidationFailureKind::IssuerMismatch, detail)
    }

    pub fn audience_mismatch(detail: impl Into<String>) -> Self {
        Self::new(ValidationFailureKind::AudienceMismatch, detail)
    }

    pub fn expired(detail: impl Into<String>) -> Self {
        Self::new(ValidationFailureKind::Expired, detail)
    }

    pub fn not_yet_valid(detail: impl Into<String>) -> Self {
        Self::new(ValidationFailureKind::NotYetValid, detail)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_kind_and_detail() {
        let failure = ValidationFailure::expired("token expired at 1700000000");
        assert_eq!(
            format!("{failure}"),
            "expired: token expired at 1700000000"
        );
    }

    #[test]
    fn test_kind_display_names() {
        assert_eq!(ValidationFailureKind::Malformed.to_string(), "malformed");
        assert_eq!(
            ValidationFailureKind::BadSignature.to_string(),
            "bad-signature"
        );
        assert_eq!(
            ValidationFailureKind::AudienceMismatch.to_string(),
            "audience-mismatch"
        );
        assert_eq!(
            ValidationFailureKind::NotYetValid.to_string(),
            "not-yet-valid"
        );
    }

    #[test]
    fn test_keyset_error_display() {
        let error = KeySetError::MetadataFetch("connection refused".to_string());
        assert_eq!(
            format!("{error}"),
            "signing-key metadata fetch failed: connection refused"
        );

        let error = KeySetError::UnknownKey("k1".to_string());
        assert_eq!(format!("{error}"), "unknown signing key id: k1");
    }
}
