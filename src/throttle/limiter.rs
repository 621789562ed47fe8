//! Fixed-window rate limiter.

use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::config::validation::ValidationError;
use crate::error::{PolicyError, Suspension};
use crate::key::PolicyKey;
use crate::lifecycle::ShutdownSignal;
use crate::observability::metrics;
use crate::scheduler::{Clock, Schedule, SystemClock, TaskControl};
use crate::throttle::counter::{RateCounter, Ticket};

/// Default bound on a blocked caller's sleep between capacity checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// What to do with a call over the limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Overflow {
    /// Fail with [`PolicyError::RateLimitExceeded`].
    #[default]
    Reject,
    /// Return the result type's default without running the call.
    DefaultValue,
    /// Wait for the next window, then run.
    Block,
}

/// Resolved rate limit for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    limit: u32,
    window: Duration,
    overflow: Overflow,
    poll_interval: Duration,
}

impl RateLimitPolicy {
    /// At most `limit` calls per `window`.
    pub fn new(limit: u32, window: Duration, overflow: Overflow) -> Result<Self, ValidationError> {
        if limit == 0 {
            return Err(ValidationError::ZeroLimit {
                scope: "throttle".into(),
            });
        }
        if window.is_zero() {
            return Err(ValidationError::ZeroWindow {
                scope: "throttle".into(),
            });
        }
        Ok(Self {
            limit,
            window,
            overflow,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    /// Override how long a blocked caller sleeps between checks.
    pub fn with_poll_interval(mut self, interval: Duration) -> Result<Self, ValidationError> {
        if interval.is_zero() {
            return Err(ValidationError::ZeroPollInterval {
                scope: "throttle".into(),
            });
        }
        self.poll_interval = interval;
        Ok(self)
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn overflow(&self) -> Overflow {
        self.overflow
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

impl Default for RateLimitPolicy {
    /// 10 calls per minute, rejecting overflow.
    fn default() -> Self {
        Self {
            limit: 10,
            window: Duration::from_secs(60),
            overflow: Overflow::Reject,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Per-key fixed-window rate limiter.
///
/// Counters are created on first use of a key and reset by a scheduled task
/// every `window`. The window of a key is fixed by the policy in effect when
/// its counter was created.
pub struct RateLimiter {
    counters: Arc<DashMap<PolicyKey, Arc<RateCounter>>>,
    scheduler: Arc<dyn Schedule>,
    clock: Arc<dyn Clock>,
    idle_timeout: Option<Duration>,
}

impl RateLimiter {
    pub fn new(scheduler: Arc<dyn Schedule>) -> Self {
        Self::with_clock(scheduler, Arc::new(SystemClock::new()))
    }

    pub fn with_clock(scheduler: Arc<dyn Schedule>, clock: Arc<dyn Clock>) -> Self {
        Self {
            counters: Arc::new(DashMap::new()),
            scheduler,
            clock,
            idle_timeout: None,
        }
    }

    /// Drop counters whose key has not been used for `timeout`.
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Run `op` if `key` is under its limit; otherwise apply the overflow
    /// behaviour, substituting `T::default()` in `DefaultValue` mode.
    pub async fn acquire_or_run<T, E, F, Fut>(
        &self,
        op: F,
        key: &PolicyKey,
        policy: &RateLimitPolicy,
    ) -> Result<T, PolicyError<E>>
    where
        T: Default,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run(op, key, policy, T::default, None).await
    }

    /// Like [`RateLimiter::acquire_or_run`] with an explicit default value.
    pub async fn acquire_or_run_with<T, E, F, Fut, D>(
        &self,
        op: F,
        key: &PolicyKey,
        policy: &RateLimitPolicy,
        fallback: D,
    ) -> Result<T, PolicyError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        D: FnOnce() -> T,
    {
        self.run(op, key, policy, fallback, None).await
    }

    /// Like [`RateLimiter::acquire_or_run`]; a triggered `signal` ends a
    /// `Block` wait with [`PolicyError::Cancelled`].
    pub async fn acquire_or_run_cancellable<T, E, F, Fut>(
        &self,
        op: F,
        key: &PolicyKey,
        policy: &RateLimitPolicy,
        signal: ShutdownSignal,
    ) -> Result<T, PolicyError<E>>
    where
        T: Default,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run(op, key, policy, T::default, Some(signal)).await
    }

    async fn run<T, E, F, Fut, D>(
        &self,
        op: F,
        key: &PolicyKey,
        policy: &RateLimitPolicy,
        fallback: D,
        mut signal: Option<ShutdownSignal>,
    ) -> Result<T, PolicyError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        D: FnOnce() -> T,
    {
        let (counter, ticket) = self.acquire(key, policy);
        if ticket.count <= policy.limit {
            return op().await.map_err(PolicyError::Operation);
        }

        tracing::debug!(key = %key, count = ticket.count, limit = policy.limit, "Rate limit exceeded");

        match policy.overflow {
            Overflow::Reject => {
                metrics::record_rate_limited("reject");
                Err(PolicyError::RateLimitExceeded { key: key.clone() })
            }
            Overflow::DefaultValue => {
                metrics::record_rate_limited("default_value");
                tracing::debug!(key = %key, "Returning default value due to rate limit");
                Ok(fallback())
            }
            Overflow::Block => {
                metrics::record_rate_limited("block");
                tracing::debug!(key = %key, "Blocking until rate limit window resets");
                self.wait_for_slot::<E>(counter, ticket, key, policy, &mut signal)
                    .await?;
                op().await.map_err(PolicyError::Operation)
            }
        }
    }

    /// Sleep until a later window grants this caller a slot.
    ///
    /// Each reset makes the caller re-acquire in the new window, so at most
    /// `limit` calls run per window even with many blocked callers.
    async fn wait_for_slot<E>(
        &self,
        mut counter: Arc<RateCounter>,
        ticket: Ticket,
        key: &PolicyKey,
        policy: &RateLimitPolicy,
        signal: &mut Option<ShutdownSignal>,
    ) -> Result<(), PolicyError<E>> {
        let mut seen = ticket.generation;

        loop {
            let notified = counter.reset_notified();

            if counter.is_retired() || counter.generation() != seen {
                drop(notified);
                let (fresh, ticket) = self.acquire(key, policy);
                if ticket.count <= policy.limit {
                    return Ok(());
                }
                counter = fresh;
                seen = ticket.generation;
                continue;
            }

            let cancelled = match signal.as_mut() {
                Some(signal) => {
                    tokio::select! {
                        biased;
                        _ = signal.recv() => true,
                        _ = notified => false,
                        _ = tokio::time::sleep(policy.poll_interval) => false,
                    }
                }
                None => {
                    tokio::select! {
                        _ = notified => false,
                        _ = tokio::time::sleep(policy.poll_interval) => false,
                    }
                }
            };

            if cancelled {
                tracing::warn!(key = %key, "Rate limit wait cancelled");
                return Err(PolicyError::Cancelled {
                    during: Suspension::Throttle,
                    last: None,
                });
            }
        }
    }

    /// Count one call against `key`, creating its counter if needed.
    fn acquire(&self, key: &PolicyKey, policy: &RateLimitPolicy) -> (Arc<RateCounter>, Ticket) {
        loop {
            let counter = self.counter_for(key, policy);
            match counter.increment(self.clock.now()) {
                Some(ticket) => return (counter, ticket),
                None => {
                    self.counters.remove_if(key, |_, c| Arc::ptr_eq(c, &counter));
                }
            }
        }
    }

    fn counter_for(&self, key: &PolicyKey, policy: &RateLimitPolicy) -> Arc<RateCounter> {
        if let Some(counter) = self.counters.get(key) {
            return counter.value().clone();
        }

        let (counter, created) = match self.counters.entry(key.clone()) {
            Entry::Occupied(existing) => (existing.get().clone(), false),
            Entry::Vacant(slot) => {
                let counter = Arc::new(RateCounter::new(key.clone(), self.clock.now()));
                slot.insert(counter.clone());
                (counter, true)
            }
        };

        if created {
            self.schedule_reset(&counter, policy.window);
            tracing::debug!(key = %key, limit = policy.limit, window_ms = policy.window.as_millis() as u64, "Created rate counter");
        }
        counter
    }

    fn schedule_reset(&self, counter: &Arc<RateCounter>, window: Duration) {
        let weak: Weak<RateCounter> = Arc::downgrade(counter);
        let counters = Arc::downgrade(&self.counters);
        let clock = self.clock.clone();
        let idle_timeout = self.idle_timeout;

        let task = Arc::new(move || {
            let Some(counter) = weak.upgrade() else {
                return TaskControl::Stop;
            };
            let now = clock.now();

            // Retirement fails if a call was admitted in this window, so no
            // admitted call can outlive the counter it was counted on.
            if let Some(timeout) = idle_timeout {
                if counter.idle_for(now) >= timeout && counter.try_retire() {
                    if let Some(counters) = counters.upgrade() {
                        counters.remove_if(counter.key(), |_, c| Arc::ptr_eq(c, &counter));
                    }
                    tracing::debug!(key = %counter.key(), "Evicted idle rate counter");
                    return TaskControl::Stop;
                }
            }

            counter.reset(now);
            tracing::trace!(key = %counter.key(), "Rate limit window reset");
            TaskControl::Continue
        });

        let name = format!("rate-limit-reset:{}", counter.key());
        let handle = self.scheduler.schedule(&name, window, task);
        let _ = counter.task.set(handle);
    }

    /// Counter for `key`, if one exists.
    pub fn counter(&self, key: &PolicyKey) -> Option<Arc<RateCounter>> {
        self.counters.get(key).map(|c| c.value().clone())
    }

    /// Keys that currently have a counter.
    pub fn tracked_keys(&self) -> Vec<PolicyKey> {
        self.counters.iter().map(|c| c.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{ManualClock, ManualScheduler};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    fn limiter() -> (RateLimiter, Arc<ManualScheduler>, ManualClock) {
        let scheduler = Arc::new(ManualScheduler::new());
        let clock = ManualClock::new();
        let limiter = RateLimiter::with_clock(scheduler.clone(), Arc::new(clock.clone()));
        (limiter, scheduler, clock)
    }

    async fn ok_call(calls: &AtomicU32) -> Result<&'static str, std::io::Error> {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok("done")
    }

    #[test]
    fn test_policy_validation() {
        assert!(RateLimitPolicy::new(0, Duration::from_secs(1), Overflow::Reject).is_err());
        assert!(RateLimitPolicy::new(1, Duration::ZERO, Overflow::Reject).is_err());
        let policy = RateLimitPolicy::new(1, Duration::from_secs(1), Overflow::Block).unwrap();
        assert!(policy.with_poll_interval(Duration::ZERO).is_err());
    }

    #[test]
    fn test_overflow_from_config_names() {
        #[derive(Deserialize)]
        struct Wrapper {
            overflow: Overflow,
        }
        let parsed: Wrapper = toml::from_str("overflow = \"default_value\"").unwrap();
        assert_eq!(parsed.overflow, Overflow::DefaultValue);
    }

    #[tokio::test]
    async fn test_one_reset_task_per_key() {
        let (limiter, scheduler, _) = limiter();
        let policy = RateLimitPolicy::new(5, Duration::from_secs(60), Overflow::Reject).unwrap();
        let calls = AtomicU32::new(0);

        for _ in 0..3 {
            limiter.acquire_or_run(|| ok_call(&calls), &PolicyKey::new("a"), &policy).await.unwrap();
        }
        limiter.acquire_or_run(|| ok_call(&calls), &PolicyKey::new("b"), &policy).await.unwrap();

        assert_eq!(scheduler.scheduled().len(), 2);
        assert_eq!(limiter.counter(&PolicyKey::new("a")).unwrap().count(), 3);
        let mut keys = limiter.tracked_keys();
        keys.sort();
        assert_eq!(keys, vec![PolicyKey::new("a"), PolicyKey::new("b")]);
    }

    #[tokio::test]
    async fn test_idle_counter_is_evicted() {
        let (limiter, scheduler, clock) = limiter();
        let limiter = limiter.with_idle_timeout(Some(Duration::from_secs(300)));
        let policy = RateLimitPolicy::new(1, Duration::from_secs(60), Overflow::Reject).unwrap();
        let key = PolicyKey::new("rare");
        let calls = AtomicU32::new(0);

        limiter.acquire_or_run(|| ok_call(&calls), &key, &policy).await.unwrap();
        let first = limiter.counter(&key).unwrap();

        clock.advance(Duration::from_secs(60));
        scheduler.run_pending();
        assert!(limiter.counter(&key).is_some());

        clock.advance(Duration::from_secs(300));
        scheduler.run_pending();
        assert!(limiter.counter(&key).is_none());
        assert!(first.is_retired());
        assert!(scheduler.scheduled().is_empty());

        limiter.acquire_or_run(|| ok_call(&calls), &key, &policy).await.unwrap();
        assert_eq!(limiter.counter(&key).unwrap().count(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retired_counter_is_replaced_not_counted() {
        let (limiter, scheduler, _) = limiter();
        let limiter = limiter.with_idle_timeout(Some(Duration::from_secs(300)));
        let policy = RateLimitPolicy::new(1, Duration::from_secs(60), Overflow::Reject).unwrap();
        let key = PolicyKey::new("racy");
        let calls = AtomicU32::new(0);

        limiter.acquire_or_run(|| ok_call(&calls), &key, &policy).await.unwrap();
        let first = limiter.counter(&key).unwrap();
        assert!(!first.try_retire(), "a window with an admitted call must not retire");

        first.reset(Instant::now());
        assert!(first.try_retire());
        // Still mapped, as if the eviction task had not removed it yet.
        assert!(Arc::ptr_eq(&limiter.counter(&key).unwrap(), &first));

        limiter.acquire_or_run(|| ok_call(&calls), &key, &policy).await.unwrap();
        let second = limiter.counter(&key).unwrap();
        assert!(!Arc::ptr_eq(&second, &first));
        assert_eq!(second.count(), 1);
        assert_eq!(first.count(), 0);
        assert_eq!(scheduler.scheduled().len(), 1);

        let third = limiter.acquire_or_run(|| ok_call(&calls), &key, &policy).await;
        assert!(matches!(third, Err(PolicyError::RateLimitExceeded { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_operation_error_is_not_a_refusal() {
        let (limiter, _, _) = limiter();
        let policy = RateLimitPolicy::default();
        let res: Result<u32, _> = limiter
            .acquire_or_run(
                || async { Err(std::io::Error::from(std::io::ErrorKind::Other)) },
                &PolicyKey::new("k"),
                &policy,
            )
            .await;
        let err = res.unwrap_err();
        assert!(matches!(err, PolicyError::Operation(_)));
        assert!(!err.is_policy_refusal());
    }
}
