//! Authorization policies and their evaluation.
//!
//! A policy is a named, ordered set of requirements, all of which must
//! hold (logical AND). Requirements evaluate left-to-right and the first
//! failure produces the deny reason. Routes that declare no policy fall
//! back to a configurable default whose out-of-the-box form requires an
//! authenticated principal: every route is protected unless a policy is
//! deliberately defined with zero requirements.

use crate::claims::ClaimsPrincipal;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Policy name used for the default fallback.
pub const FALLBACK_POLICY_NAME: &str = "fallback";

/// A single authorization requirement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    /// The request must carry a valid principal.
    Authenticated,

    /// The named claim must carry exactly this value.
    ClaimEquals { claim: String, value: String },

    /// The named claim must carry at least one value from the set.
    RoleInSet {
        claim: String,
        roles: Vec<String>,
    },
}

impl Requirement {
    /// Stable display name, used in deny reasons.
    pub fn name(&self) -> String {
        match self {
            Requirement::Authenticated => "authenticated".to_string(),
            Requirement::ClaimEquals { claim, .. } => format!("claim-equals({})", claim),
            Requirement::RoleInSet { claim, .. } => format!("role-in-set({})", claim),
        }
    }

    fn is_satisfied_by(&self, principal: &ClaimsPrincipal) -> bool {
        match self {
            Requirement::Authenticated => true,
            Requirement::ClaimEquals { claim, value } => principal.has_claim_value(claim, value),
            Requirement::RoleInSet { claim, roles } => roles
                .iter()
                .any(|role| principal.has_claim_value(claim, role)),
        }
    }
}

/// A named, ordered set of requirements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    name: String,
    requirements: Vec<Requirement>,
}

impl Policy {
    /// Create a policy from an ordered requirement list.
    pub fn new(name: impl Into<String>, requirements: Vec<Requirement>) -> Self {
        Self {
            name: name.into(),
            requirements,
        }
    }

    /// A policy with zero requirements: it admits anonymous requests.
    pub fn empty(name: impl Into<String>) -> Self {
        Self::new(name, Vec::new())
    }

    /// A policy with the single `Authenticated` requirement.
    pub fn authenticated(name: impl Into<String>) -> Self {
        Self::new(name, vec![Requirement::Authenticated])
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }
}

/// Why a request was denied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    /// No valid principal, but the policy carries requirements.
    Unauthenticated,

    /// The named requirement did not hold for the principal.
    RequirementFailed(String),
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::Unauthenticated => f.write_str("unauthenticated"),
            DenyReason::RequirementFailed(name) => write!(f, "requirement failed: {}", name),
        }
    }
}

/// The outcome of evaluating a policy. Computed fresh per request,
/// never cached or retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationDecision {
    Allow,
    Deny(DenyReason),
}

impl AuthorizationDecision {
    pub fn is_allow(&self) -> bool {
        matches!(self, AuthorizationDecision::Allow)
    }
}

#[derive(Debug, Error)]
pub enum PolicyConfigError {
    #[error("duplicate policy name: {0}")]
    DuplicatePolicy(String),

    #[error("route references undefined policy: {0}")]
    UndefinedPolicy(String),
}

/// The named policies known at startup, plus the fallback applied to
/// routes that declare none.
#[derive(Debug, Clone)]
pub struct PolicySet {
    policies: HashMap<String, Policy>,
    fallback: Policy,
}

impl PolicySet {
    /// A policy set with the default fallback ("must be authenticated").
    pub fn new() -> Self {
        Self::with_fallback(Policy::authenticated(FALLBACK_POLICY_NAME))
    }

    /// A policy set with a custom fallback policy.
    pub fn with_fallback(fallback: Policy) -> Self {
        Self {
            policies: HashMap::new(),
            fallback,
        }
    }

    /// Register a named policy.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyConfigError::DuplicatePolicy`] when the name is
    /// already taken.
    pub fn insert(&mut self, policy: Policy) -> Result<(), PolicyConfigError> {
        let name = policy.name().to_string();
        if self.policies.contains_key(&name) {
            return Err(PolicyConfigError::DuplicatePolicy(name));
        }
        self.policies.insert(name, policy);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Policy> {
        self.policies.get(name)
    }

    pub fn fallback(&self) -> &Policy {
        &self.fallback
    }

    /// Validate at startup that every route-declared policy name is
    /// defined, failing fast instead of resolving names per request.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyConfigError::UndefinedPolicy`] naming the first
    /// unknown reference.
    pub fn ensure_defined<'a>(
        &self,
        route_policies: impl IntoIterator<Item = &'a str>,
    ) -> Result<(), PolicyConfigError> {
        for name in route_policies {
            if !self.policies.contains_key(name) {
                return Err(PolicyConfigError::UndefinedPolicy(name.to_string()));
            }
        }
        Ok(())
    }
}

impl Default for PolicySet {
    fn default() -> Self {
        Self::new()
    }
}

/// Evaluates policies against a claims principal.
#[derive(Debug, Clone)]
pub struct PolicyEvaluator {
    policies: PolicySet,
}

impl PolicyEvaluator {
    pub fn new(policies: PolicySet) -> Self {
        Self { policies }
    }

    pub fn policies(&self) -> &PolicySet {
        &self.policies
    }

    /// Evaluate a policy against an optional principal.
    ///
    /// With no principal, any requirement denies `Unauthenticated`; only
    /// a zero-requirement policy allows anonymous callers. With a
    /// principal, requirements evaluate left-to-right and the first
    /// failure denies with the requirement's name.
    pub fn evaluate(
        &self,
        policy: &Policy,
        principal: Option<&ClaimsPrincipal>,
    ) -> AuthorizationDecision {
        for requirement in policy.requirements() {
            let Some(principal) = principal else {
                tracing::debug!(
                    target: "auth.policy",
                    policy = %policy.name(),
                    "denied: no principal for a policy with requirements"
                );
                return AuthorizationDecision::Deny(DenyReason::Unauthenticated);
            };

            if !requirement.is_satisfied_by(principal) {
                tracing::debug!(
                    target: "auth.policy",
                    policy = %policy.name(),
                    requirement = %requirement.name(),
                    "denied: requirement not satisfied"
                );
                return AuthorizationDecision::Deny(DenyReason::RequirementFailed(
                    requirement.name(),
                ));
            }
        }

        AuthorizationDecision::Allow
    }

    /// Evaluate the named policy, or the fallback when the route
    /// declares none.
    ///
    /// Route policy names are validated at startup via
    /// [`PolicySet::ensure_defined`]; a lookup miss here is a wiring bug
    /// and denies rather than failing open.
    pub fn evaluate_named(
        &self,
        policy_name: Option<&str>,
        principal: Option<&ClaimsPrincipal>,
    ) -> AuthorizationDecision {
        let policy = match policy_name {
            None => self.policies.fallback(),
            Some(name) => match self.policies.get(name) {
                Some(policy) => policy,
                None => {
                    tracing::error!(
                        target: "auth.policy",
                        policy = %name,
                        "route references a policy that was never defined"
                    );
                    return AuthorizationDecision::Deny(DenyReason::RequirementFailed(
                        format!("undefined-policy({})", name),
                    ));
                }
            },
        };

        self.evaluate(policy, principal)
    }
}
