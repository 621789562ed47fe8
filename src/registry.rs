//! Policy registry.
//!
//! Maps policy keys to the policies configured for them and runs
//! invocations through the shared engines. The configuration is held in an
//! [`ArcSwap`]; every call loads one immutable snapshot, so a reload never
//! mixes old and new settings within a single call. Live state (rate
//! counters, cached entries) is owned by the engines and survives reloads.

use std::collections::HashMap;
use std::fmt::{Debug, Display};
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;
use notify::RecommendedWatcher;

use crate::cache::{CachePolicy, CacheValue, TtlCache};
use crate::config::loader::ConfigError;
use crate::config::schema::{CacheConfig, PoliciesConfig, PolicyOverride};
use crate::config::validation::{validate_config, ValidationError};
use crate::config::watcher::ConfigWatcher;
use crate::error::PolicyError;
use crate::key::PolicyKey;
use crate::observability::metering::{metered, MetricPolicy};
use crate::observability::timing::{timed, TimingPolicy};
use crate::resilience::{Classify, RetryExecutor, RetryPolicy};
use crate::scheduler::{Clock, Schedule, SystemClock};
use crate::throttle::{RateLimitPolicy, RateLimiter};

/// Policies in effect for one key. `None` means the policy is disabled.
#[derive(Debug, Clone)]
struct KeyPolicies {
    retry: Option<RetryPolicy>,
    throttle: Option<RateLimitPolicy>,
    cache: Option<CacheConfig>,
    timing: Option<TimingPolicy>,
    metric: Option<MetricPolicy>,
}

impl KeyPolicies {
    fn resolve(
        config: &PoliciesConfig,
        overrides: Option<&PolicyOverride>,
        scope: &str,
    ) -> Result<Self, ValidationError> {
        let retry = overrides
            .and_then(|o| o.retry.as_ref())
            .unwrap_or(&config.retry);
        let throttle = overrides
            .and_then(|o| o.throttle.as_ref())
            .unwrap_or(&config.throttle);
        let cache = overrides
            .and_then(|o| o.cache.as_ref())
            .unwrap_or(&config.cache);
        let timing = overrides
            .and_then(|o| o.timing.as_ref())
            .unwrap_or(&config.timing);
        let metric = overrides
            .and_then(|o| o.metric.as_ref())
            .unwrap_or(&config.metric);

        Ok(Self {
            retry: if retry.enabled {
                Some(retry.to_policy(&format!("{scope}retry"))?)
            } else {
                None
            },
            throttle: if throttle.enabled {
                Some(throttle.to_policy(&format!("{scope}throttle"))?)
            } else {
                None
            },
            cache: cache.enabled.then(|| cache.clone()),
            timing: timing.enabled.then(|| timing.to_policy()),
            metric: if metric.enabled {
                Some(metric.to_policy(&format!("{scope}metric"))?)
            } else {
                None
            },
        })
    }
}

#[derive(Debug)]
struct Snapshot {
    config: Arc<PoliciesConfig>,
    global: KeyPolicies,
    overrides: HashMap<String, KeyPolicies>,
}

impl Snapshot {
    fn build(config: PoliciesConfig) -> Result<Self, Vec<ValidationError>> {
        validate_config(&config)?;

        let global = KeyPolicies::resolve(&config, None, "").map_err(|e| vec![e])?;
        let mut overrides = HashMap::with_capacity(config.policies.len());
        for (key, o) in &config.policies {
            let resolved = KeyPolicies::resolve(&config, Some(o), &format!("policies.{key}."))
                .map_err(|e| vec![e])?;
            overrides.insert(key.clone(), resolved);
        }

        Ok(Self {
            config: Arc::new(config),
            global,
            overrides,
        })
    }

    fn for_key(&self, key: &PolicyKey) -> &KeyPolicies {
        self.overrides.get(key.as_str()).unwrap_or(&self.global)
    }
}

/// Entry point for running invocations under their configured policies.
pub struct PolicyRegistry {
    snapshot: ArcSwap<Snapshot>,
    executor: RetryExecutor,
    limiter: RateLimiter,
    cache: TtlCache,
}

impl PolicyRegistry {
    pub fn new(config: PoliciesConfig, scheduler: Arc<dyn Schedule>) -> Result<Self, ConfigError> {
        Self::with_clock(config, scheduler, Arc::new(SystemClock::new()))
    }

    pub fn with_clock(
        config: PoliciesConfig,
        scheduler: Arc<dyn Schedule>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        let idle_timeout = config.state.idle_timeout();
        let snapshot = Snapshot::build(config).map_err(ConfigError::Validation)?;

        tracing::info!(
            overrides = snapshot.overrides.len(),
            idle_timeout_secs = ?idle_timeout.map(|t| t.as_secs()),
            "Policy registry initialized"
        );

        Ok(Self {
            snapshot: ArcSwap::from_pointee(snapshot),
            executor: RetryExecutor::new(),
            limiter: RateLimiter::with_clock(scheduler.clone(), clock.clone())
                .with_idle_timeout(idle_timeout),
            cache: TtlCache::with_clock(scheduler, clock).with_idle_timeout(idle_timeout),
        })
    }

    /// Replace the configuration. An invalid config is rejected and the
    /// current one stays in effect. The idle timeout is fixed at construction.
    pub fn reload(&self, config: PoliciesConfig) -> Result<(), ConfigError> {
        let snapshot = Snapshot::build(config).map_err(ConfigError::Validation)?;
        let overrides = snapshot.overrides.len();
        self.snapshot.store(Arc::new(snapshot));
        tracing::info!(overrides, "Policies reloaded");
        Ok(())
    }

    /// The configuration currently in effect.
    pub fn config(&self) -> Arc<PoliciesConfig> {
        self.snapshot.load().config.clone()
    }

    /// Apply every valid change to the file at `path` until the returned
    /// watcher is dropped. Must be called within a Tokio runtime.
    pub fn watch_config(self: &Arc<Self>, path: &Path) -> Result<RecommendedWatcher, ConfigError> {
        let (watcher, mut updates) = ConfigWatcher::new(path);
        let watcher = watcher.run()?;
        let registry: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            while let Some(config) = updates.recv().await {
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                if let Err(e) = registry.reload(config) {
                    tracing::error!("Rejected policy reload: {}", e);
                }
            }
        });

        Ok(watcher)
    }

    pub fn retry_policy(&self, key: &PolicyKey) -> Option<RetryPolicy> {
        self.snapshot.load().for_key(key).retry.clone()
    }

    pub fn rate_limit_policy(&self, key: &PolicyKey) -> Option<RateLimitPolicy> {
        self.snapshot.load().for_key(key).throttle.clone()
    }

    pub fn cache_policy(&self, key: &PolicyKey) -> Option<CachePolicy> {
        let snapshot = self.snapshot.load();
        cache_policy_for(snapshot.for_key(key).cache.as_ref(), key)
    }

    pub fn timing_policy(&self, key: &PolicyKey) -> Option<TimingPolicy> {
        self.snapshot.load().for_key(key).timing
    }

    pub fn metric_policy(&self, key: &PolicyKey) -> Option<MetricPolicy> {
        self.snapshot.load().for_key(key).metric.clone()
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn cache(&self) -> &TtlCache {
        &self.cache
    }

    /// Run `op` under the retry policy for `key`.
    pub async fn retry<T, E, F, Fut>(&self, key: &PolicyKey, op: F) -> Result<T, PolicyError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + Display,
    {
        let policy = self.retry_policy(key);
        self.run_retry(policy.as_ref(), op).await
    }

    /// Run `op` under the rate limit for `key`.
    pub async fn throttle<T, E, F, Fut>(&self, key: &PolicyKey, op: F) -> Result<T, PolicyError<E>>
    where
        T: Default,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let policy = self.rate_limit_policy(key);
        self.run_throttle(key, policy.as_ref(), op).await
    }

    /// Serve `op`'s result from the cache configured for `key`, stored
    /// under `args_key`.
    pub async fn cached<V, E, F, Fut>(&self, key: &PolicyKey, args_key: &PolicyKey, op: F) -> Result<V, E>
    where
        V: CacheValue,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let policy = self.cache_policy(key);
        self.run_cached(policy.as_ref(), args_key, op).await
    }

    /// Run `op` once, logging its execution time if timing is enabled for `key`.
    pub async fn timed<T, E, F, Fut>(&self, key: &PolicyKey, op: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.timed_with_args(key, None, op).await
    }

    /// Like [`PolicyRegistry::timed`]; `args` is logged when the timing
    /// policy includes arguments.
    pub async fn timed_with_args<T, E, F, Fut>(
        &self,
        key: &PolicyKey,
        args: Option<&(dyn Debug + Sync)>,
        op: F,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        match self.timing_policy(key) {
            Some(policy) => timed(op, key.as_str(), args, &policy).await,
            None => op().await,
        }
    }

    /// Run `op` once, recording invocation metrics if they are enabled for `key`.
    pub async fn metered<T, E, F, Fut>(&self, key: &PolicyKey, op: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify,
    {
        let policy = self.metric_policy(key);
        self.run_metered(key, policy.as_ref(), op).await
    }

    /// Run `op` under every policy configured for `key`.
    ///
    /// Layers from the outside in: timing, metrics, cache, rate limit, retry.
    /// Cache hits are counted as invocations but consume no rate-limit slot,
    /// and retries of one call count as a single call against the limit.
    pub async fn govern<V, E, F, Fut>(
        &self,
        key: &PolicyKey,
        args_key: &PolicyKey,
        op: F,
    ) -> Result<V, PolicyError<E>>
    where
        V: CacheValue + Default,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<V, E>>,
        E: Classify + Display,
    {
        let snapshot = self.snapshot.load_full();
        let policies = snapshot.for_key(key);
        let retry = policies.retry.as_ref();
        let throttle = policies.throttle.as_ref();
        let cache = cache_policy_for(policies.cache.as_ref(), key);

        let governed = move || async move {
            self.run_throttle(key, throttle, move || self.run_retry(retry, op))
                .await
                .map_err(|e| e.flatten())
        };
        let cached = || self.run_cached(cache.as_ref(), args_key, governed);
        let measured = || self.run_metered(key, policies.metric.as_ref(), cached);

        match policies.timing {
            Some(timing) => timed(measured, key.as_str(), None, &timing).await,
            None => measured().await,
        }
    }

    async fn run_metered<T, E, F, Fut>(
        &self,
        key: &PolicyKey,
        policy: Option<&MetricPolicy>,
        op: F,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify,
    {
        match policy {
            Some(policy) => metered(op, policy.metric_name(key.as_str()), policy).await,
            None => op().await,
        }
    }

    async fn run_retry<T, E, F, Fut>(
        &self,
        policy: Option<&RetryPolicy>,
        mut op: F,
    ) -> Result<T, PolicyError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + Display,
    {
        match policy {
            Some(policy) => self.executor.execute(op, policy).await,
            None => op().await.map_err(PolicyError::Operation),
        }
    }

    async fn run_throttle<T, E, F, Fut>(
        &self,
        key: &PolicyKey,
        policy: Option<&RateLimitPolicy>,
        op: F,
    ) -> Result<T, PolicyError<E>>
    where
        T: Default,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        match policy {
            Some(policy) => self.limiter.acquire_or_run(op, key, policy).await,
            None => op().await.map_err(PolicyError::Operation),
        }
    }

    async fn run_cached<V, E, F, Fut>(
        &self,
        policy: Option<&CachePolicy>,
        args_key: &PolicyKey,
        op: F,
    ) -> Result<V, E>
    where
        V: CacheValue,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        match policy {
            Some(policy) => {
                self.cache
                    .get_or_compute(op, policy.cache_name(), args_key, policy)
                    .await
            }
            None => op().await,
        }
    }
}

impl Debug for PolicyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyRegistry")
            .field("config", &self.snapshot.load().config)
            .finish_non_exhaustive()
    }
}

fn cache_policy_for(config: Option<&CacheConfig>, key: &PolicyKey) -> Option<CachePolicy> {
    match config?.to_policy(key.as_str(), "cache") {
        Ok(policy) => Some(policy),
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "Caching skipped");
            None
        }
    }
}
