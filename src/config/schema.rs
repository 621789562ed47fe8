//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from TOML. Every field
//! has a default, so an empty file is a valid configuration.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::CachePolicy;
use crate::config::validation::ValidationError;
use crate::observability::metering::{parse_tag, MetricPolicy};
use crate::observability::timing::{LogLevel, TimingPolicy};
use crate::resilience::RetryPolicy;
use crate::throttle::{Overflow, RateLimitPolicy};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct PoliciesConfig {
    /// Global retry settings.
    pub retry: RetryConfig,

    /// Global rate limiting settings.
    pub throttle: ThrottleConfig,

    /// Global caching settings.
    pub cache: CacheConfig,

    /// Execution time logging settings.
    pub timing: TimingConfig,

    /// Invocation metrics settings.
    pub metric: MetricConfig,

    /// Lifetime of per-key state.
    pub state: StateConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Per-key overrides, keyed by policy key (e.g. `"UserRepository.find"`).
    pub policies: BTreeMap<String, PolicyOverride>,
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Enable retries. When off, calls run exactly once.
    pub enabled: bool,

    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,

    /// Delay between attempts in milliseconds.
    pub base_delay_ms: u64,

    /// Double the delay after every failed attempt.
    pub exponential: bool,

    /// Upper bound for the delay in milliseconds.
    pub max_delay_ms: Option<u64>,

    /// Add up to 10% random jitter to each delay.
    pub jitter: bool,

    /// Failure kinds to retry (empty = all).
    pub retry_on: Vec<String>,

    /// Failure kinds never to retry. Wins over `retry_on`.
    pub no_retry_on: Vec<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            base_delay_ms: 1000,
            exponential: false,
            max_delay_ms: None,
            jitter: false,
            retry_on: Vec::new(),
            no_retry_on: Vec::new(),
        }
    }
}

impl RetryConfig {
    pub fn to_policy(&self, scope: &str) -> Result<RetryPolicy, ValidationError> {
        let mut builder = RetryPolicy::builder()
            .max_attempts(self.max_attempts)
            .base_delay(Duration::from_millis(self.base_delay_ms))
            .exponential(self.exponential)
            .jitter(self.jitter)
            .retry_on(self.retry_on.iter().cloned())
            .no_retry_on(self.no_retry_on.iter().cloned());
        if let Some(cap) = self.max_delay_ms {
            builder = builder.max_delay(Duration::from_millis(cap));
        }
        builder.build().map_err(|e| e.in_scope(scope))
    }

    /// Kinds listed in both sets; legal, but the allow entry is dead.
    pub fn conflicting_kinds(&self) -> BTreeSet<&str> {
        self.retry_on
            .iter()
            .filter(|k| self.no_retry_on.contains(k))
            .map(String::as_str)
            .collect()
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Calls allowed per window.
    pub limit: u32,

    /// Window length in milliseconds.
    pub window_ms: u64,

    /// Behaviour when the limit is exceeded.
    pub overflow: Overflow,

    /// Longest sleep between capacity checks in `block` mode, in milliseconds.
    pub block_poll_interval_ms: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            limit: 10,
            window_ms: 60_000,
            overflow: Overflow::Reject,
            block_poll_interval_ms: 100,
        }
    }
}

impl ThrottleConfig {
    pub fn to_policy(&self, scope: &str) -> Result<RateLimitPolicy, ValidationError> {
        RateLimitPolicy::new(self.limit, Duration::from_millis(self.window_ms), self.overflow)
            .and_then(|p| p.with_poll_interval(Duration::from_millis(self.block_poll_interval_ms)))
            .map_err(|e| e.in_scope(scope))
    }
}

/// Caching configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable caching.
    pub enabled: bool,

    /// Cache to store results in. Defaults to the policy key.
    pub cache_name: Option<String>,

    /// Time-to-live of cached results in seconds.
    pub ttl_secs: u64,

    /// Whether null results are cached.
    pub cache_null_values: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_name: None,
            ttl_secs: 300,
            cache_null_values: true,
        }
    }
}

impl CacheConfig {
    /// Policy for calls under `key`.
    pub fn to_policy(&self, key: &str, scope: &str) -> Result<CachePolicy, ValidationError> {
        let name = self.cache_name.as_deref().unwrap_or(key);
        CachePolicy::new(name, Duration::from_secs(self.ttl_secs))
            .map(|p| p.with_null_values(self.cache_null_values))
            .map_err(|e| e.in_scope(scope))
    }
}

/// Execution time logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TimingConfig {
    /// Enable execution time logging.
    pub enabled: bool,

    /// Level the timing line is logged at.
    pub level: LogLevel,

    /// Include call arguments in the log line.
    pub include_args: bool,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: LogLevel::Debug,
            include_args: false,
        }
    }
}

impl TimingConfig {
    pub fn to_policy(&self) -> TimingPolicy {
        TimingPolicy {
            level: self.level,
            include_args: self.include_args,
        }
    }
}

/// Invocation metrics configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct MetricConfig {
    /// Enable invocation metrics.
    pub enabled: bool,

    /// Metric name prefix. Defaults to the policy key.
    pub name: Option<String>,

    /// Labels as `"key=value"` strings.
    pub tags: Vec<String>,

    /// Record `<name>.count`.
    pub record_invocation_count: bool,

    /// Record `<name>.time`.
    pub record_execution_time: bool,

    /// Record `<name>.exceptions`.
    pub record_exceptions: bool,
}

impl Default for MetricConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            name: None,
            tags: Vec::new(),
            record_invocation_count: true,
            record_execution_time: true,
            record_exceptions: true,
        }
    }
}

impl MetricConfig {
    pub fn to_policy(&self, scope: &str) -> Result<MetricPolicy, ValidationError> {
        if self.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(ValidationError::EmptyMetricName {
                scope: scope.to_string(),
            });
        }
        let tags = self
            .tags
            .iter()
            .map(|tag| {
                parse_tag(tag).ok_or_else(|| ValidationError::MalformedTag {
                    scope: scope.to_string(),
                    tag: tag.clone(),
                })
            })
            .collect::<Result<_, _>>()?;

        Ok(MetricPolicy {
            name: self.name.clone(),
            tags,
            record_invocation_count: self.record_invocation_count,
            record_execution_time: self.record_execution_time,
            record_exceptions: self.record_exceptions,
        })
    }
}

/// Per-key state lifetime.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct StateConfig {
    /// Evict rate counters and empty caches unused for this many seconds.
    /// Unset keeps them for the life of the process.
    pub idle_timeout_secs: Option<u64>,
}

impl StateConfig {
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Settings for one key that replace the global sections.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct PolicyOverride {
    pub retry: Option<RetryConfig>,
    pub throttle: Option<ThrottleConfig>,
    pub cache: Option<CacheConfig>,
    pub timing: Option<TimingConfig>,
    pub metric: Option<MetricConfig>,
}
