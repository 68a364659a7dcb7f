//! Authentication configuration.
//!
//! Configuration is loaded from environment variables. Two trust modes
//! exist: authority trust (the single configured authority and audience
//! form the allow-sets) and explicit allow-lists. The mode is selected
//! at startup and never varies per request.

use crate::validator::{DEFAULT_CLOCK_SKEW, MAX_CLOCK_SKEW};
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default TTL for the cached signing-key set (5 minutes).
pub const DEFAULT_METADATA_REFRESH_TTL: Duration = Duration::from_secs(300);

/// Default timeout for a single JWKS fetch.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// How issuer and audience allow-sets are derived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustMode {
    /// Trust exactly the configured authority and audience.
    Authority,

    /// Explicit allow-lists, overriding the single-value defaults.
    ExplicitAllowLists {
        issuers: Vec<String>,
        audiences: Vec<String>,
    },
}

/// Options recognized by the authentication core.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Base URL of the token authority (required).
    pub authority: String,

    /// Expected audience of inbound tokens (required).
    pub audience: String,

    /// Trust mode selected at startup.
    pub trust_mode: TrustMode,

    /// When true, deny responses carry the validation failure detail.
    /// Off by default: failures are otherwise generic.
    pub include_error_details: bool,

    /// Clock-skew tolerance for temporal claim checks.
    pub clock_skew: Duration,

    /// TTL for the cached signing-key set.
    pub metadata_refresh_ttl: Duration,

    /// Timeout for a single JWKS fetch.
    pub fetch_timeout: Duration,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid clock skew configuration: {0}")]
    InvalidClockSkew(String),

    #[error("Invalid boolean configuration: {0}")]
    InvalidBool(String),

    #[error("Invalid duration configuration: {0}")]
    InvalidDuration(String),
}

impl AuthConfig {
    /// Create a configuration with defaults for everything but the two
    /// required values.
    pub fn new(authority: impl Into<String>, audience: impl Into<String>) -> Self {
        Self {
            authority: authority.into(),
            audience: audience.into(),
            trust_mode: TrustMode::Authority,
            include_error_details: false,
            clock_skew: DEFAULT_CLOCK_SKEW,
            metadata_refresh_ttl: DEFAULT_METADATA_REFRESH_TTL,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let authority = vars
            .get("AUTH_AUTHORITY")
            .ok_or_else(|| ConfigError::MissingEnvVar("AUTH_AUTHORITY".to_string()))?
            .clone();

        let audience = vars
            .get("AUTH_AUDIENCE")
            .ok_or_else(|| ConfigError::MissingEnvVar("AUTH_AUDIENCE".to_string()))?
            .clone();

        // Either allow-list variable switches the trust mode; the other
        // falls back to its single-value default.
        let issuers = vars.get("AUTH_VALID_ISSUERS").map(|v| parse_list(v));
        let audiences = vars.get("AUTH_VALID_AUDIENCES").map(|v| parse_list(v));
        let trust_mode = if issuers.is_some() || audiences.is_some() {
            TrustMode::ExplicitAllowLists {
                issuers: issuers.unwrap_or_else(|| vec![authority.clone()]),
                audiences: audiences.unwrap_or_else(|| vec![audience.clone()]),
            }
        } else {
            TrustMode::Authority
        };

        let include_error_details = match vars.get("AUTH_INCLUDE_ERROR_DETAILS") {
            None => false,
            Some(value) => match value.as_str() {
                "true" | "1" => true,
                "false" | "0" => false,
                other => {
                    return Err(ConfigError::InvalidBool(format!(
                        "AUTH_INCLUDE_ERROR_DETAILS must be true or false, got '{}'",
                        other
                    )))
                }
            },
        };

        // Parse clock skew tolerance with validation
        let clock_skew = if let Some(value_str) = vars.get("AUTH_CLOCK_SKEW_SECONDS") {
            let value: u64 = value_str.parse().map_err(|e| {
                ConfigError::InvalidClockSkew(format!(
                    "AUTH_CLOCK_SKEW_SECONDS must be a valid integer, got '{}': {}",
                    value_str, e
                ))
            })?;

            if value == 0 {
                return Err(ConfigError::InvalidClockSkew(
                    "AUTH_CLOCK_SKEW_SECONDS must be positive".to_string(),
                ));
            }

            if value > MAX_CLOCK_SKEW.as_secs() {
                return Err(ConfigError::InvalidClockSkew(format!(
                    "AUTH_CLOCK_SKEW_SECONDS must not exceed {} seconds, got {}",
                    MAX_CLOCK_SKEW.as_secs(),
                    value
                )));
            }

            Duration::from_secs(value)
        } else {
            DEFAULT_CLOCK_SKEW
        };

        let metadata_refresh_ttl = parse_duration_secs(
            vars,
            "AUTH_METADATA_REFRESH_TTL_SECONDS",
            DEFAULT_METADATA_REFRESH_TTL,
        )?;

        let fetch_timeout =
            parse_duration_secs(vars, "AUTH_FETCH_TIMEOUT_SECONDS", DEFAULT_FETCH_TIMEOUT)?;

        Ok(AuthConfig {
            authority,
            audience,
            trust_mode,
            include_error_details,
            clock_skew,
            metadata_refresh_ttl,
            fetch_timeout,
        })
    }

    /// The JWKS location, per standard discovery conventions.
    pub fn jwks_url(&self) -> String {
        format!(
            "{}/.well-known/jwks.json",
            self.authority.trim_end_matches('/')
        )
    }

    /// Issuers accepted by the validator under the selected trust mode.
    pub fn valid_issuers(&self) -> Vec<String> {
        match &self.trust_mode {
            TrustMode::Authority => vec![self.authority.clone()],
            TrustMode::ExplicitAllowLists { issuers, .. } => issuers.clone(),
        }
    }

    /// Audiences accepted by the validator under the selected trust mode.
    pub fn valid_audiences(&self) -> Vec<String> {
        match &self.trust_mode {
            TrustMode::Authority => vec![self.audience.clone()],
            TrustMode::ExplicitAllowLists { audiences, .. } => audiences.clone(),
        }
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn parse_duration_secs(
    vars: &HashMap<String, String>,
    name: &str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    let Some(value_str) = vars.get(name) else {
        return Ok(default);
    };

    let value: u64 = value_str.parse().map_err(|e| {
        ConfigError::InvalidDuration(format!(
            "{} must be a valid positive integer, got '{}': {}",
            name, value_str, e
        ))
    })?;

    if value == 0 {
        return Err(ConfigError::InvalidDuration(format!(
            "{} must be greater than 0",
            name
        )));
    }

    Ok(Duration::from_secs(value))
}
