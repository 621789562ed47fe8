//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (attempts, limits, windows, TTLs > 0)
//! - Validate metric names and `key=value` tags
//! - Validate every per-key override, not just the global sections
//!
//! # Design Decisions
//! - Returns all validation errors, not just the first
//! - Validation is a pure function: PoliciesConfig → Result<(), Vec<ValidationError>>
//! - Runs before a config is accepted, at startup and on every reload

use thiserror::Error;

use crate::config::schema::PoliciesConfig;

/// A semantic configuration error. `scope` names the offending section.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{scope}: max_attempts must be at least 1")]
    ZeroAttempts { scope: String },

    #[error("{scope}: max_delay must not be smaller than base_delay")]
    MaxDelayBelowBase { scope: String },

    #[error("{scope}: limit must be at least 1")]
    ZeroLimit { scope: String },

    #[error("{scope}: window must be greater than zero")]
    ZeroWindow { scope: String },

    #[error("{scope}: block poll interval must be greater than zero")]
    ZeroPollInterval { scope: String },

    #[error("{scope}: ttl must be greater than zero")]
    ZeroTtl { scope: String },

    #[error("{scope}: cache name must not be empty")]
    EmptyCacheName { scope: String },

    #[error("{scope}: metric name must not be empty")]
    EmptyMetricName { scope: String },

    #[error("{scope}: tag '{tag}' is not of the form key=value")]
    MalformedTag { scope: String, tag: String },

    #[error("observability: unknown log level '{level}'")]
    UnknownLogLevel { level: String },
}

impl ValidationError {
    /// Same error, attributed to `scope`.
    pub fn in_scope(self, scope: &str) -> Self {
        let scope = scope.to_string();
        match self {
            Self::ZeroAttempts { .. } => Self::ZeroAttempts { scope },
            Self::MaxDelayBelowBase { .. } => Self::MaxDelayBelowBase { scope },
            Self::ZeroLimit { .. } => Self::ZeroLimit { scope },
            Self::ZeroWindow { .. } => Self::ZeroWindow { scope },
            Self::ZeroPollInterval { .. } => Self::ZeroPollInterval { scope },
            Self::ZeroTtl { .. } => Self::ZeroTtl { scope },
            Self::EmptyCacheName { .. } => Self::EmptyCacheName { scope },
            Self::EmptyMetricName { .. } => Self::EmptyMetricName { scope },
            Self::MalformedTag { tag, .. } => Self::MalformedTag { scope, tag },
            other @ Self::UnknownLogLevel { .. } => other,
        }
    }
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Check every section of `config`.
pub fn validate_config(config: &PoliciesConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if let Err(e) = config.retry.to_policy("retry") {
        errors.push(e);
    }
    if let Err(e) = config.throttle.to_policy("throttle") {
        errors.push(e);
    }
    // The global cache section is checked against a placeholder key; only
    // its name and TTL matter here.
    if let Err(e) = config.cache.to_policy("cache", "cache") {
        errors.push(e);
    }
    if let Err(e) = config.metric.to_policy("metric") {
        errors.push(e);
    }

    for (key, overrides) in &config.policies {
        if let Some(retry) = &overrides.retry {
            if let Err(e) = retry.to_policy(&format!("policies.{key}.retry")) {
                errors.push(e);
            }
        }
        if let Some(throttle) = &overrides.throttle {
            if let Err(e) = throttle.to_policy(&format!("policies.{key}.throttle")) {
                errors.push(e);
            }
        }
        if let Some(cache) = &overrides.cache {
            if let Err(e) = cache.to_policy(key, &format!("policies.{key}.cache")) {
                errors.push(e);
            }
        }
        if let Some(metric) = &overrides.metric {
            if let Err(e) = metric.to_policy(&format!("policies.{key}.metric")) {
                errors.push(e);
            }
        }
    }

    let level = config.observability.log_level.to_ascii_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        errors.push(ValidationError::UnknownLogLevel {
            level: config.observability.log_level.clone(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
