//! Bearer-token authentication and authorization-policy core.
//!
//! This library implements the per-request authentication engine behind a
//! bearer-protected HTTP API:
//!
//! - Signing-key discovery and caching from a remote authority's JWKS
//!   endpoint, with single-flight refresh and stale-serving degradation
//! - JWT validation (structure, signature, issuer, audience, temporal
//!   claims) producing a claims principal
//! - Named authorization policies evaluated against that principal
//! - A per-request gate tying the pieces together, plus an axum
//!   middleware bridge for the hosting HTTP layer
//!
//! # Architecture
//!
//! ```text
//! middleware::enforce -> AuthenticationGate::handle
//!                          -> TokenValidator::validate -> KeySetCache::get_key
//!                          -> PolicyEvaluator::evaluate_named
//! ```
//!
//! The hosting HTTP layer constructs the gate once at startup and shares
//! it by reference across requests; the core holds no global state beyond
//! the key-set cache.
//!
//! # Modules
//!
//! - `config` - Options loaded from environment variables
//! - `errors` - Key-set and token validation error types
//! - `keyset` - JWKS fetching and caching
//! - `claims` - The verified claims principal
//! - `validator` - Bearer-token validation pipeline
//! - `policy` - Authorization policies and their evaluation
//! - `gate` - Per-request orchestration
//! - `middleware` - axum integration and HTTP status mapping

pub mod claims;
pub mod config;
pub mod errors;
pub mod gate;
pub mod keyset;
pub mod middleware;
pub mod policy;
pub mod validator;

pub use claims::ClaimsPrincipal;
pub use config::{AuthConfig, ConfigError, TrustMode};
pub use errors::{KeySetError, ValidationFailure, ValidationFailureKind};
pub use gate::{AuthenticationGate, GateResult};
pub use keyset::{KeySet, KeySetCache, SigningKey};
pub use middleware::{GateState, RoutePolicy};
pub use policy::{
    AuthorizationDecision, DenyReason, Policy, PolicyConfigError, PolicyEvaluator, PolicySet,
    Requirement,
};
pub use validator::TokenValidator;
