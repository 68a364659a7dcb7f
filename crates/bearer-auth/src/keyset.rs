//! Signing-key set fetching and caching.
//!
//! The cache fetches the authority's JSON Web Key Set from its
//! `/.well-known/jwks.json` endpoint and keeps it for a configurable TTL.
//!
//! # Security
//!
//! - The key set is replaced by an atomic swap on refresh; concurrent
//!   validators never observe a partially-updated set
//! - Refresh is single-flight: concurrent callers seeing a stale set
//!   collapse into one remote fetch
//! - A lookup miss for an unknown key ID forces exactly one refresh to
//!   pick up key rotations before failing

use crate::config::AuthConfig;
use crate::errors::KeySetError;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::{Algorithm, DecodingKey};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::instrument;

/// JSON Web Key from the authority's JWKS endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    /// Key type (always "OKP" for Ed25519).
    pub kty: String,

    /// Key ID - used to select the correct key for verification.
    pub kid: String,

    /// Curve name (always "Ed25519" for EdDSA).
    #[serde(default)]
    pub crv: Option<String>,

    /// Public key value (base64url encoded).
    #[serde(default)]
    pub x: Option<String>,

    /// Algorithm (should be "EdDSA").
    #[serde(default)]
    pub alg: Option<String>,

    /// Key use (should be "sig" for signing).
    #[serde(default, rename = "use")]
    pub key_use: Option<String>,

    /// Optional validity-window start (Unix epoch seconds).
    #[serde(default)]
    pub nbf: Option<i64>,

    /// Optional validity-window end (Unix epoch seconds).
    #[serde(default)]
    pub exp: Option<i64>,
}

/// JWKS document from the authority.
#[derive(Debug, Clone, Deserialize)]
pub struct JwksDocument {
    /// List of JSON Web Keys.
    pub keys: Vec<Jwk>,
}

/// A single trusted signing key, immutable once fetched.
pub struct SigningKey {
    kid: String,
    algorithm: Algorithm,
    decoding_key: DecodingKey,
    not_before: Option<i64>,
    not_after: Option<i64>,
}

impl SigningKey {
    /// Build a signing key from a JWK, rejecting anything that is not a
    /// usable Ed25519 signature key.
    fn from_jwk(jwk: &Jwk) -> Option<Self> {
        if jwk.kty != "OKP" {
            tracing::warn!(target: "auth.keyset", kid = %jwk.kid, kty = %jwk.kty, "skipping JWK with unexpected key type");
            return None;
        }
        if let Some(alg) = &jwk.alg {
            if alg != "EdDSA" {
                tracing::warn!(target: "auth.keyset", kid = %jwk.kid, alg = %alg, "skipping JWK with unexpected algorithm");
                return None;
            }
        }
        if let Some(key_use) = &jwk.key_use {
            if key_use != "sig" {
                tracing::warn!(target: "auth.keyset", kid = %jwk.kid, key_use = %key_use, "skipping non-signature JWK");
                return None;
            }
        }

        let Some(x) = &jwk.x else {
            tracing::warn!(target: "auth.keyset", kid = %jwk.kid, "skipping JWK missing x field");
            return None;
        };

        let public_key_bytes = match URL_SAFE_NO_PAD.decode(x) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(target: "auth.keyset", kid = %jwk.kid, error = %e, "skipping JWK with invalid public key encoding");
                return None;
            }
        };

        Some(Self {
            kid: jwk.kid.clone(),
            algorithm: Algorithm::EdDSA,
            decoding_key: DecodingKey::from_ed_der(&public_key_bytes),
            not_before: jwk.nbf,
            not_after: jwk.exp,
        })
    }

    /// Key ID.
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Signature algorithm this key verifies.
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// The verification key material.
    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }

    /// Whether the key's validity window covers the given instant
    /// (Unix epoch seconds). Absent bounds are unbounded.
    pub fn usable_at(&self, now: i64) -> bool {
        if let Some(nbf) = self.not_before {
            if now < nbf {
                return false;
            }
        }
        if let Some(exp) = self.not_after {
            if now > exp {
                return false;
            }
        }
        true
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .field("not_before", &self.not_before)
            .field("not_after", &self.not_after)
            .finish_non_exhaustive()
    }
}

/// An immutable snapshot of the authority's signing keys.
///
/// Replaced wholesale on refresh, never mutated in place.
pub struct KeySet {
    keys: HashMap<String, Arc<SigningKey>>,
    fetched_at: Instant,
    ttl: Duration,
}

impl KeySet {
    fn from_document(document: JwksDocument, ttl: Duration) -> Self {
        let keys: HashMap<String, Arc<SigningKey>> = document
            .keys
            .iter()
            .filter_map(SigningKey::from_jwk)
            .map(|key| (key.kid.clone(), Arc::new(key)))
            .collect();

        Self {
            keys,
            fetched_at: Instant::now(),
            ttl,
        }
    }

    /// O(1) lookup by key ID.
    pub fn get(&self, kid: &str) -> Option<Arc<SigningKey>> {
        self.keys.get(kid).cloned()
    }

    /// Whether the snapshot is still within its TTL.
    pub fn is_fresh(&self) -> bool {
        self.fetched_at.elapsed() < self.ttl
    }

    /// Whether at least one key's validity window covers the given
    /// instant. Gates stale-serving after a failed refresh.
    pub fn has_usable_key(&self, now: i64) -> bool {
        self.keys.values().any(|key| key.usable_at(now))
    }

    /// Number of keys in the snapshot.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl fmt::Debug for KeySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeySet")
            .field("kids", &self.keys.keys().collect::<Vec<_>>())
            .field("fetched_at", &self.fetched_at)
            .field("ttl", &self.ttl)
            .finish()
    }
}

/// How the most recent refresh attempt ended. Guarded by the refresh
/// gate; `error` is set only for failed attempts.
#[derive(Default)]
struct RefreshOutcome {
    completed_at: Option<Instant>,
    error: Option<String>,
}

/// Fetches and caches the authority's signing-key set.
///
/// Thread-safe: lookups read the current snapshot without taking the
/// refresh lock; only the refresh path synchronizes.
pub struct KeySetCache {
    /// URL to the JWKS endpoint.
    jwks_url: String,

    /// HTTP client for fetching the JWKS document.
    http_client: reqwest::Client,

    /// Snapshot TTL.
    ttl: Duration,

    /// Current snapshot, swapped atomically on refresh.
    current: RwLock<Option<Arc<KeySet>>>,

    /// Single-flight gate: at most one remote fetch is in flight. The
    /// payload records when the last attempt completed and how it went,
    /// so gate-waiters share that outcome instead of repeating the
    /// remote call.
    refresh_gate: Mutex<RefreshOutcome>,

    /// Total remote fetch attempts, observable by tests and operators.
    remote_fetches: AtomicU64,
}

impl KeySetCache {
    /// Create a cache for the given JWKS endpoint.
    pub fn new(jwks_url: String, ttl: Duration, fetch_timeout: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(fetch_timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(target: "auth.keyset", error = %e, "Failed to build HTTP client with custom config, using defaults");
                reqwest::Client::new()
            });

        Self {
            jwks_url,
            http_client,
            ttl,
            current: RwLock::new(None),
            refresh_gate: Mutex::new(RefreshOutcome::default()),
            remote_fetches: AtomicU64::new(0),
        }
    }

    /// Create a cache from the authentication configuration.
    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(
            config.jwks_url(),
            config.metadata_refresh_ttl,
            config.fetch_timeout,
        )
    }

    /// Return the current key set, refreshing it when the TTL has lapsed.
    ///
    /// On fetch failure the stale set is served as long as it still holds
    /// at least one key whose validity window covers now.
    ///
    /// # Errors
    ///
    /// - [`KeySetError::MetadataFetch`] when the remote document is
    ///   unreachable or malformed and nothing usable is cached
    /// - [`KeySetError::NoValidKeySet`] when a refresh failed and no
    ///   unexpired keys remain
    #[instrument(skip(self))]
    pub async fn get_current_key_set(&self) -> Result<Arc<KeySet>, KeySetError> {
        if let Some(set) = self.read_current().await {
            if set.is_fresh() {
                return Ok(set);
            }
        }
        self.refresh(None).await
    }

    /// Look up a signing key by ID.
    ///
    /// Only keys whose validity window covers now are served; a retired
    /// or not-yet-active key is indistinguishable from an absent one. A
    /// miss against a cache-served set triggers exactly one forced
    /// refresh (handles key rotation) before failing; a miss against a
    /// set fetched within this call fails directly.
    ///
    /// # Errors
    ///
    /// Returns [`KeySetError::UnknownKey`] when no usable key with this
    /// ID exists even after the refresh, plus the fetch errors of
    /// [`get_current_key_set`](Self::get_current_key_set).
    #[instrument(skip(self), fields(kid = %kid))]
    pub async fn get_key(&self, kid: &str) -> Result<Arc<SigningKey>, KeySetError> {
        let now = chrono::Utc::now().timestamp();

        if let Some(set) = self.read_current().await {
            if set.is_fresh() {
                if let Some(key) = set.get(kid).filter(|key| key.usable_at(now)) {
                    tracing::debug!(target: "auth.keyset", "key set cache hit");
                    return Ok(key);
                }

                // No usable key under this kid in a fresh set: force one
                // refresh in case the authority rotated keys since the
                // last fetch.
                tracing::debug!(target: "auth.keyset", "no usable key in cached set, forcing refresh");
                let refreshed = self.refresh(Some(&set)).await?;
                return refreshed
                    .get(kid)
                    .filter(|key| key.usable_at(now))
                    .ok_or_else(|| self.unknown_key(kid));
            }
        }

        // Stale or empty cache: refresh once, then a single lookup.
        let set = self.refresh(None).await?;
        set.get(kid)
            .filter(|key| key.usable_at(now))
            .ok_or_else(|| self.unknown_key(kid))
    }

    /// Total remote fetch attempts since construction.
    pub fn remote_fetches(&self) -> u64 {
        self.remote_fetches.load(Ordering::Relaxed)
    }

    async fn read_current(&self) -> Option<Arc<KeySet>> {
        self.current.read().await.clone()
    }

    fn unknown_key(&self, kid: &str) -> KeySetError {
        tracing::warn!(target: "auth.keyset", kid = %kid, "no usable key found after refresh");
        KeySetError::UnknownKey(kid.to_string())
    }

    /// Refresh the cached key set, single-flight.
    ///
    /// `observed` is the snapshot the caller already consulted, if any:
    /// when another caller has swapped in a fresh, different snapshot
    /// while we waited on the gate, that snapshot is returned without a
    /// second remote fetch. Likewise, when the attempt we waited on
    /// failed, the outcome is resolved from the cache rather than by
    /// repeating the fetch, so a burst of callers during an authority
    /// outage still costs one remote call.
    async fn refresh(&self, observed: Option<&Arc<KeySet>>) -> Result<Arc<KeySet>, KeySetError> {
        let entered_at = Instant::now();
        let mut outcome = self.refresh_gate.lock().await;

        if let Some(current) = self.read_current().await {
            let superseded = observed.map_or(true, |seen| !Arc::ptr_eq(seen, &current));
            if current.is_fresh() && superseded {
                return Ok(current);
            }
        }

        // An attempt that completed while we waited on the gate covers
        // this caller too; the snapshot is still not fresh, so that
        // attempt must have failed.
        if outcome.completed_at.is_some_and(|at| at >= entered_at) {
            let message = outcome
                .error
                .clone()
                .unwrap_or_else(|| "key set refresh failed".to_string());
            return self.resolve_degraded(KeySetError::MetadataFetch(message)).await;
        }

        match self.fetch_remote().await {
            Ok(document) => {
                *outcome = RefreshOutcome {
                    completed_at: Some(Instant::now()),
                    error: None,
                };
                let set = Arc::new(KeySet::from_document(document, self.ttl));
                tracing::info!(
                    target: "auth.keyset",
                    key_count = set.len(),
                    "key set refreshed"
                );
                *self.current.write().await = Some(Arc::clone(&set));
                Ok(set)
            }
            Err(err) => {
                *outcome = RefreshOutcome {
                    completed_at: Some(Instant::now()),
                    error: Some(err.to_string()),
                };
                self.resolve_degraded(err).await
            }
        }
    }

    /// Resolve a failed refresh from the cache: serve the stale set
    /// while it still holds a usable key, otherwise fail.
    async fn resolve_degraded(&self, err: KeySetError) -> Result<Arc<KeySet>, KeySetError> {
        let now = chrono::Utc::now().timestamp();
        if let Some(stale) = self.read_current().await {
            if stale.has_usable_key(now) {
                tracing::warn!(
                    target: "auth.keyset",
                    error = %err,
                    "refresh failed, serving stale key set"
                );
                return Ok(stale);
            }
            tracing::error!(
                target: "auth.keyset",
                error = %err,
                "refresh failed and no usable keys remain"
            );
            return Err(KeySetError::NoValidKeySet);
        }
        Err(err)
    }

    /// Fetch the JWKS document from the authority.
    async fn fetch_remote(&self) -> Result<JwksDocument, KeySetError> {
        self.remote_fetches.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("auth_keyset_fetch_total").increment(1);
        tracing::debug!(target: "auth.keyset", url = %self.jwks_url, "fetching JWKS document");

        let response = self
            .http_client
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(target: "auth.keyset", error = %e, "failed to fetch JWKS document");
                KeySetError::MetadataFetch(e.to_string())
            })?;

        if !response.status().is_success() {
            let status = response.status();
            tracing::error!(target: "auth.keyset", status = %status, "JWKS endpoint returned error");
            return Err(KeySetError::MetadataFetch(format!(
                "JWKS endpoint returned {}",
                status
            )));
        }

        response.json::<JwksDocument>().await.map_err(|e| {
            tracing::error!(target: "auth.keyset", error = %e, "failed to parse JWKS document");
            KeySetError::MetadataFetch(format!("malformed JWKS document: {}", e))
        })
    }
}

impl fmt::Debug for KeySetCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeySetCache")
            .field("jwks_url", &self.jwks_url)
            .field("ttl", &self.ttl)
            .field("remote_fetches", &self.remote_fetches())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn jwk(kid: &str) -> Jwk {
        serde_json::from_value(json!({
            "kty": "OKP",
            "kid": kid,
            "crv": "Ed25519",
            "x": "11qYAYKxCrfVS_7TyWQHOg7hcvPapiMlrwIaaPcHURo",
            "alg": "EdDSA",
            "use": "sig"
        }))
        .unwrap()
    }

    #[test]
    fn test_jwk_deserialization() {
        let json = r#"{
            "kty": "OKP",
            "kid": "test-key-01",
            "crv": "Ed25519",
            "x": "dGVzdC1wdWJsaWMta2V5LWRhdGE",
            "alg": "EdDSA",
            "use": "sig",
            "nbf": 1700000000,
            "exp": 1800000000
        }"#;

        let jwk: Jwk = serde_json::from_str(json).unwrap();

        assert_eq!(jwk.kty, "OKP");
        assert_eq!(jwk.kid, "test-key-01");
        assert_eq!(jwk.crv, Some("Ed25519".to_string()));
        assert_eq!(jwk.alg, Some("EdDSA".to_string()));
        assert_eq!(jwk.key_use, Some("sig".to_string()));
        assert_eq!(jwk.nbf, Some(1_700_000_000));
        assert_eq!(jwk.exp, Some(1_800_000_000));
    }

    #[test]
    fn test_jwk_deserialization_minimal() {
        let json = r#"{
            "kty": "OKP",
            "kid": "test-key-02"
        }"#;

        let jwk: Jwk = serde_json::from_str(json).unwrap();

        assert_eq!(jwk.kid, "test-key-02");
        assert!(jwk.x.is_none());
        assert!(jwk.nbf.is_none());
        assert!(jwk.exp.is_none());
    }

    #[test]
    fn test_signing_key_rejects_wrong_key_type() {
        let mut bad = jwk("rsa-key");
        bad.kty = "RSA".to_string();
        assert!(SigningKey::from_jwk(&bad).is_none());
    }

    #[test]
    fn test_signing_key_rejects_wrong_algorithm() {
        let mut bad = jwk("rs256-key");
        bad.alg = Some("RS256".to_string());
        assert!(SigningKey::from_jwk(&bad).is_none());
    }

    #[test]
    fn test_signing_key_rejects_missing_x() {
        let mut bad = jwk("no-x");
        bad.x = None;
        assert!(SigningKey::from_jwk(&bad).is_none());
    }

    #[test]
    fn test_signing_key_rejects_invalid_base64() {
        let mut bad = jwk("bad-b64");
        bad.x = Some("!!!invalid!!!".to_string());
        assert!(SigningKey::from_jwk(&bad).is_none());
    }

    #[test]
    fn test_signing_key_accepts_missing_alg() {
        let mut key = jwk("no-alg");
        key.alg = None;
        assert!(SigningKey::from_jwk(&key).is_some());
    }

    #[test]
    fn test_signing_key_validity_window() {
        let mut windowed = jwk("windowed");
        windowed.nbf = Some(100);
        windowed.exp = Some(200);
        let key = SigningKey::from_jwk(&windowed).unwrap();

        assert!(!key.usable_at(99));
        assert!(key.usable_at(100));
        assert!(key.usable_at(150));
        assert!(key.usable_at(200));
        assert!(!key.usable_at(201));
    }

    #[test]
    fn test_signing_key_unbounded_window() {
        let key = SigningKey::from_jwk(&jwk("unbounded")).unwrap();
        assert!(key.usable_at(0));
        assert!(key.usable_at(i64::MAX));
    }

    #[test]
    fn test_key_set_lookup_and_freshness() {
        let document = JwksDocument {
            keys: vec![jwk("k1"), jwk("k2")],
        };
        let set = KeySet::from_document(document, Duration::from_secs(60));

        assert_eq!(set.len(), 2);
        assert!(set.get("k1").is_some());
        assert!(set.get("missing").is_none());
        assert!(set.is_fresh());
    }

    #[test]
    fn test_key_set_zero_ttl_is_stale() {
        let document = JwksDocument { keys: vec![jwk("k1")] };
        let set = KeySet::from_document(document, Duration::ZERO);
        assert!(!set.is_fresh());
    }

    #[test]
    fn test_key_set_skips_unusable_jwks() {
        let mut bad = jwk("bad");
        bad.kty = "RSA".to_string();
        let document = JwksDocument {
            keys: vec![bad, jwk("good")],
        };
        let set = KeySet::from_document(document, Duration::from_secs(60));

        assert_eq!(set.len(), 1);
        assert!(set.get("good").is_some());
    }

    #[test]
    fn test_has_usable_key_honors_windows() {
        let mut expired = jwk("expired");
        expired.exp = Some(100);
        let document = JwksDocument { keys: vec![expired] };
        let set = KeySet::from_document(document, Duration::from_secs(60));

        assert!(set.has_usable_key(50));
        assert!(!set.has_usable_key(200));
    }

    #[test]
    fn test_cache_creation() {
        let cache = KeySetCache::new(
            "http://localhost:8082/.well-known/jwks.json".to_string(),
            Duration::from_secs(300),
            Duration::from_secs(10),
        );
        assert_eq!(cache.remote_fetches(), 0);
    }
}
