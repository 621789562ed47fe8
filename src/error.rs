//! Policy error taxonomy.
//!
//! Callers must be able to tell "the operation failed" apart from "the
//! policy refused to run it". [`PolicyError::is_policy_refusal`] draws that
//! line; the operation's own error is always reachable through
//! [`PolicyError::operation_error`].

use std::fmt;

use thiserror::Error;

use crate::key::PolicyKey;
use crate::resilience::Classify;

/// Where a call was suspended when it got cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suspension {
    /// Waiting between retry attempts.
    Backoff,
    /// Waiting for rate-limit capacity.
    Throttle,
}

impl fmt::Display for Suspension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Suspension::Backoff => f.write_str("retry backoff"),
            Suspension::Throttle => f.write_str("rate limit wait"),
        }
    }
}

/// Failure surfaced by a policy engine. `E` is the operation's error type.
#[derive(Debug, Error)]
pub enum PolicyError<E> {
    /// The operation failed and no retry policy was involved.
    #[error("operation failed: {0}")]
    Operation(E),

    /// The operation failed with a kind the retry policy does not retry.
    #[error("non-retryable failure: {0}")]
    NonRetryable(E),

    /// Every allowed attempt failed.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetryExhausted { attempts: u32, last: E },

    /// The call exceeded its rate limit and the policy rejects overflow.
    #[error("rate limit exceeded for {key}")]
    RateLimitExceeded { key: PolicyKey },

    /// A backoff or rate-limit wait was cancelled. `last` is the failure
    /// that triggered the backoff, if any.
    #[error("cancelled during {during}")]
    Cancelled { during: Suspension, last: Option<E> },
}

impl<E> PolicyError<E> {
    /// True when the policy itself declined to (re)run the operation.
    pub fn is_policy_refusal(&self) -> bool {
        matches!(
            self,
            PolicyError::RateLimitExceeded { .. } | PolicyError::Cancelled { .. }
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, PolicyError::Cancelled { .. })
    }

    /// The operation's own failure, if one is carried.
    pub fn operation_error(&self) -> Option<&E> {
        match self {
            PolicyError::Operation(e)
            | PolicyError::NonRetryable(e)
            | PolicyError::RetryExhausted { last: e, .. } => Some(e),
            PolicyError::Cancelled { last, .. } => last.as_ref(),
            PolicyError::RateLimitExceeded { .. } => None,
        }
    }

    /// Consume the error, keeping only the operation's failure.
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            PolicyError::Operation(e)
            | PolicyError::NonRetryable(e)
            | PolicyError::RetryExhausted { last: e, .. } => Some(e),
            PolicyError::Cancelled { last, .. } => last,
            PolicyError::RateLimitExceeded { .. } => None,
        }
    }
}

/// Operation failures keep their own kind. Refusals are `policy.rate_limited`
/// and `policy.cancelled`, both under `policy`.
impl<E: Classify> Classify for PolicyError<E> {
    fn failure_kind(&self) -> &str {
        match self {
            PolicyError::Operation(e)
            | PolicyError::NonRetryable(e)
            | PolicyError::RetryExhausted { last: e, .. } => e.failure_kind(),
            PolicyError::RateLimitExceeded { .. } => "policy.rate_limited",
            PolicyError::Cancelled { .. } => "policy.cancelled",
        }
    }

    fn is_kind(&self, kind: &str) -> bool {
        match self {
            PolicyError::Operation(e)
            | PolicyError::NonRetryable(e)
            | PolicyError::RetryExhausted { last: e, .. } => e.is_kind(kind),
            _ => kind == "policy" || self.failure_kind() == kind,
        }
    }
}

impl<E> PolicyError<PolicyError<E>> {
    /// Collapse the error of a stacked policy (e.g. a throttled retry).
    ///
    /// An inner policy error seen by an outer one as a plain operation
    /// failure is unwrapped; genuine outer refusals are kept.
    pub fn flatten(self) -> PolicyError<E> {
        match self {
            PolicyError::Operation(inner) => inner,
            PolicyError::NonRetryable(inner) => inner,
            PolicyError::RetryExhausted { last, .. } => last,
            PolicyError::RateLimitExceeded { key } => PolicyError::RateLimitExceeded { key },
            PolicyError::Cancelled { during, last } => match last {
                Some(inner) => inner,
                None => PolicyError::Cancelled { during, last: None },
            },
        }
    }
}
