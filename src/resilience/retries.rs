//! Retry executor.
//!
//! # Responsibilities
//! - Run an invocation up to `max_attempts` times
//! - Classify each failure against the policy's allow/deny kinds
//! - Sleep between attempts with fixed or exponential backoff
//!
//! # Design Decisions
//! - Stateless: nothing is shared between calls
//! - Non-retryable failures propagate after a single attempt
//! - A cancelled backoff ends the call with the failure that caused it

use std::collections::BTreeSet;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use crate::config::validation::ValidationError;
use crate::error::{PolicyError, Suspension};
use crate::lifecycle::ShutdownSignal;
use crate::observability::metrics;
use crate::resilience::backoff::{calculate_backoff, with_jitter};
use crate::resilience::classify::{is_retryable, Classify};

/// Resolved retry behaviour for one call. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    exponential: bool,
    max_delay: Option<Duration>,
    jitter: bool,
    retry_on: BTreeSet<String>,
    no_retry_on: BTreeSet<String>,
}

impl RetryPolicy {
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::default()
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn exponential(&self) -> bool {
        self.exponential
    }

    pub fn max_delay(&self) -> Option<Duration> {
        self.max_delay
    }

    pub fn jitter(&self) -> bool {
        self.jitter
    }

    pub fn retry_on(&self) -> &BTreeSet<String> {
        &self.retry_on
    }

    pub fn no_retry_on(&self) -> &BTreeSet<String> {
        &self.no_retry_on
    }

    /// Delay before the attempt following failed attempt `attempt`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let delay = calculate_backoff(attempt, self.base_delay, self.exponential, self.max_delay);
        if self.jitter {
            with_jitter(delay)
        } else {
            delay
        }
    }
}

impl Default for RetryPolicy {
    /// 3 attempts, 1s fixed backoff, every kind retryable.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            exponential: false,
            max_delay: None,
            jitter: false,
            retry_on: BTreeSet::new(),
            no_retry_on: BTreeSet::new(),
        }
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone, Default)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl RetryPolicyBuilder {
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.policy.max_attempts = attempts;
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.policy.base_delay = delay;
        self
    }

    pub fn exponential(mut self, exponential: bool) -> Self {
        self.policy.exponential = exponential;
        self
    }

    pub fn max_delay(mut self, cap: Duration) -> Self {
        self.policy.max_delay = Some(cap);
        self
    }

    pub fn jitter(mut self, jitter: bool) -> Self {
        self.policy.jitter = jitter;
        self
    }

    /// Only retry failures of these kinds (empty means all kinds).
    pub fn retry_on<I, S>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.policy.retry_on.extend(kinds.into_iter().map(Into::into));
        self
    }

    /// Never retry failures of these kinds. Takes precedence over `retry_on`.
    pub fn no_retry_on<I, S>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.policy.no_retry_on.extend(kinds.into_iter().map(Into::into));
        self
    }

    pub fn build(self) -> Result<RetryPolicy, ValidationError> {
        let policy = self.policy;
        if policy.max_attempts == 0 {
            return Err(ValidationError::ZeroAttempts {
                scope: "retry".into(),
            });
        }
        if let Some(cap) = policy.max_delay {
            if cap < policy.base_delay {
                return Err(ValidationError::MaxDelayBelowBase {
                    scope: "retry".into(),
                });
            }
        }
        Ok(policy)
    }
}

/// Whether `failure` is retryable under `policy`.
pub fn should_retry<E: Classify + ?Sized>(failure: &E, policy: &RetryPolicy) -> bool {
    is_retryable(failure, &policy.retry_on, &policy.no_retry_on)
}

/// Runs invocations under a [`RetryPolicy`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryExecutor;

impl RetryExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Run `op` until it succeeds, fails with a non-retryable kind, or runs
    /// out of attempts.
    pub async fn execute<T, E, F, Fut>(&self, op: F, policy: &RetryPolicy) -> Result<T, PolicyError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + Display,
    {
        self.run(op, policy, None).await
    }

    /// Like [`RetryExecutor::execute`], but a triggered `signal` aborts the
    /// backoff sleep and ends the call with [`PolicyError::Cancelled`].
    pub async fn execute_cancellable<T, E, F, Fut>(
        &self,
        op: F,
        policy: &RetryPolicy,
        signal: ShutdownSignal,
    ) -> Result<T, PolicyError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + Display,
    {
        self.run(op, policy, Some(signal)).await
    }

    async fn run<T, E, F, Fut>(
        &self,
        mut op: F,
        policy: &RetryPolicy,
        mut signal: Option<ShutdownSignal>,
    ) -> Result<T, PolicyError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + Display,
    {
        let mut attempt = 1u32;

        loop {
            if attempt > 1 {
                tracing::debug!(attempt, max_attempts = policy.max_attempts, "Retry attempt");
            }

            let failure = match op().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !should_retry(&failure, policy) {
                tracing::debug!(kind = failure.failure_kind(), error = %failure, "Not retrying failure");
                return Err(PolicyError::NonRetryable(failure));
            }

            if attempt >= policy.max_attempts {
                tracing::debug!(attempts = attempt, error = %failure, "Max retry attempts reached");
                metrics::record_retry_exhausted();
                return Err(PolicyError::RetryExhausted {
                    attempts: attempt,
                    last: failure,
                });
            }

            let delay = policy.delay_after(attempt);
            tracing::debug!(
                delay_ms = delay.as_millis() as u64,
                next_attempt = attempt + 1,
                error = %failure,
                "Waiting before retry"
            );
            metrics::record_retry_attempt();

            let cancelled = match signal.as_mut() {
                Some(signal) => {
                    tokio::select! {
                        biased;
                        _ = signal.recv() => true,
                        _ = tokio::time::sleep(delay) => false,
                    }
                }
                None => {
                    tokio::time::sleep(delay).await;
                    false
                }
            };

            if cancelled {
                tracing::warn!(attempt, error = %failure, "Retry backoff cancelled");
                return Err(PolicyError::Cancelled {
                    during: Suspension::Backoff,
                    last: Some(failure),
                });
            }

            attempt += 1;
        }
    }
}
