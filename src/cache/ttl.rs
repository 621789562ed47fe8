//! TTL cache with background eviction.

use std::future::Future;
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::cache::entry::CacheEntry;
use crate::cache::value::CacheValue;
use crate::config::validation::ValidationError;
use crate::key::PolicyKey;
use crate::observability::metrics;
use crate::scheduler::{Clock, Schedule, SystemClock, TaskControl};

/// Resolved caching behaviour for one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePolicy {
    cache_name: String,
    ttl: Duration,
    cache_null_values: bool,
}

impl CachePolicy {
    /// Cache results in `cache_name` for `ttl`. Null results are cached.
    pub fn new(cache_name: impl Into<String>, ttl: Duration) -> Result<Self, ValidationError> {
        let cache_name = cache_name.into();
        if cache_name.is_empty() {
            return Err(ValidationError::EmptyCacheName {
                scope: "cache".into(),
            });
        }
        if ttl.is_zero() {
            return Err(ValidationError::ZeroTtl {
                scope: "cache".into(),
            });
        }
        Ok(Self {
            cache_name,
            ttl,
            cache_null_values: true,
        })
    }

    pub fn with_null_values(mut self, cache_null_values: bool) -> Self {
        self.cache_null_values = cache_null_values;
        self
    }

    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn cache_null_values(&self) -> bool {
        self.cache_null_values
    }
}

/// A named cache. Every entry's expiry derives from this cache's TTL.
#[derive(Debug)]
pub struct Cache {
    name: String,
    ttl: Duration,
    entries: DashMap<PolicyKey, CacheEntry>,
    last_used: Mutex<Instant>,
}

impl Cache {
    fn new(name: String, ttl: Duration, now: Instant) -> Self {
        Self {
            name,
            ttl,
            entries: DashMap::new(),
            last_used: Mutex::new(now),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of the entry for `key`, expired or not.
    pub fn entry(&self, key: &PolicyKey) -> Option<CacheEntry> {
        self.entries.get(key).map(|e| e.value().clone())
    }

    fn touch(&self, now: Instant) {
        *self.last_used.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    fn idle_for(&self, now: Instant) -> Duration {
        let last = *self.last_used.lock().unwrap_or_else(|e| e.into_inner());
        now.saturating_duration_since(last)
    }

    /// Live value for `key`. A stale entry is removed and reported as a miss.
    fn get<V: CacheValue>(&self, key: &PolicyKey, now: Instant) -> Option<V> {
        let (value, stale) = match self.entries.get(key) {
            Some(entry) if entry.is_expired(now) => (None, true),
            Some(entry) => (entry.value().get::<V>(), false),
            None => (None, false),
        };

        if stale {
            self.entries.remove_if(key, |_, e| e.is_expired(now));
        }
        value
    }

    fn insert<V: CacheValue>(&self, key: PolicyKey, value: V, now: Instant) {
        self.entries.insert(key, CacheEntry::new(value, now, self.ttl));
    }

    fn invalidate(&self, key: &PolicyKey) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Drop every entry expired at `now`. Returns how many were removed.
    pub fn evict_expired(&self, now: Instant) -> usize {
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            let keep = !entry.is_expired(now);
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }
}

/// Named TTL caches, created lazily on first use.
///
/// Two concurrent misses for the same key may both run the invocation; the
/// last one to finish wins the slot.
pub struct TtlCache {
    caches: Arc<DashMap<String, Arc<Cache>>>,
    scheduler: Arc<dyn Schedule>,
    clock: Arc<dyn Clock>,
    idle_timeout: Option<Duration>,
}

impl TtlCache {
    pub fn new(scheduler: Arc<dyn Schedule>) -> Self {
        Self::with_clock(scheduler, Arc::new(SystemClock::new()))
    }

    pub fn with_clock(scheduler: Arc<dyn Schedule>, clock: Arc<dyn Clock>) -> Self {
        Self {
            caches: Arc::new(DashMap::new()),
            scheduler,
            clock,
            idle_timeout: None,
        }
    }

    /// Drop caches that are empty and unused for `timeout`.
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Return the live cached value for `key`, or run `op` once and cache
    /// its result. Errors from `op` are returned and never cached.
    pub async fn get_or_compute<V, E, F, Fut>(
        &self,
        op: F,
        cache_name: &str,
        key: &PolicyKey,
        policy: &CachePolicy,
    ) -> Result<V, E>
    where
        V: CacheValue,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let cache = self.cache_for(cache_name, policy.ttl);
        let now = self.clock.now();
        cache.touch(now);

        if let Some(value) = cache.get::<V>(key, now) {
            tracing::debug!(cache = %cache_name, key = %key, "Cache hit");
            metrics::record_cache_hit(cache_name);
            return Ok(value);
        }
        metrics::record_cache_miss(cache_name);

        let value = op().await?;

        if !value.is_null() || policy.cache_null_values {
            tracing::debug!(cache = %cache_name, key = %key, "Caching result");
            cache.insert(key.clone(), value.clone(), self.clock.now());
        }
        Ok(value)
    }

    fn cache_for(&self, name: &str, ttl: Duration) -> Arc<Cache> {
        if let Some(cache) = self.caches.get(name) {
            return cache.value().clone();
        }

        let (cache, created) = match self.caches.entry(name.to_string()) {
            Entry::Occupied(existing) => (existing.get().clone(), false),
            Entry::Vacant(slot) => {
                let cache = Arc::new(Cache::new(name.to_string(), ttl, self.clock.now()));
                slot.insert(cache.clone());
                (cache, true)
            }
        };

        if created {
            tracing::debug!(cache = %name, ttl_ms = ttl.as_millis() as u64, "Creating cache");
            self.schedule_sweep(&cache);
        }
        cache
    }

    fn schedule_sweep(&self, cache: &Arc<Cache>) {
        let weak: Weak<Cache> = Arc::downgrade(cache);
        let caches = Arc::downgrade(&self.caches);
        let clock = self.clock.clone();
        let idle_timeout = self.idle_timeout;

        let task = Arc::new(move || {
            let Some(cache) = weak.upgrade() else {
                return TaskControl::Stop;
            };
            let now = clock.now();

            let removed = cache.evict_expired(now);
            if removed > 0 {
                tracing::debug!(cache = %cache.name(), removed, "Evicted expired entries");
                metrics::record_cache_evictions(cache.name(), removed);
            }

            if let Some(timeout) = idle_timeout {
                if cache.is_empty() && cache.idle_for(now) >= timeout {
                    if let Some(caches) = caches.upgrade() {
                        caches.remove_if(cache.name(), |_, c| Arc::ptr_eq(c, &cache));
                    }
                    tracing::debug!(cache = %cache.name(), "Dropped idle cache");
                    return TaskControl::Stop;
                }
            }
            TaskControl::Continue
        });

        let name = format!("cache-sweep:{}", cache.name());
        self.scheduler.schedule(&name, cache.ttl(), task);
    }

    /// The cache called `name`, if it exists.
    pub fn cache(&self, name: &str) -> Option<Arc<Cache>> {
        self.caches.get(name).map(|c| c.value().clone())
    }

    pub fn cache_names(&self) -> Vec<String> {
        self.caches.iter().map(|c| c.key().clone()).collect()
    }

    /// Remove one entry. Returns whether it existed.
    pub fn invalidate(&self, cache_name: &str, key: &PolicyKey) -> bool {
        self.cache(cache_name).is_some_and(|c| c.invalidate(key))
    }

    /// Remove every entry of a cache.
    pub fn clear(&self, cache_name: &str) {
        if let Some(cache) = self.cache(cache_name) {
            cache.entries.clear();
        }
    }

    /// Number of stored entries, expired ones included until swept.
    pub fn len(&self, cache_name: &str) -> usize {
        self.cache(cache_name).map_or(0, |c| c.len())
    }

    /// Run an eviction sweep now instead of waiting for the scheduled one.
    pub fn sweep(&self, cache_name: &str) -> usize {
        self.cache(cache_name)
            .map_or(0, |c| c.evict_expired(self.clock.now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{ManualClock, ManualScheduler};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn cache() -> (TtlCache, Arc<ManualScheduler>, ManualClock) {
        let scheduler = Arc::new(ManualScheduler::new());
        let clock = ManualClock::new();
        let cache = TtlCache::with_clock(scheduler.clone(), Arc::new(clock.clone()));
        (cache, scheduler, clock)
    }

    async fn compute(calls: &AtomicU32, value: u32) -> Result<u32, std::io::Error> {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(value)
    }

    #[test]
    fn test_policy_validation() {
        assert!(CachePolicy::new("", Duration::from_secs(1)).is_err());
        assert!(CachePolicy::new("users", Duration::ZERO).is_err());
        let policy = CachePolicy::new("users", Duration::from_secs(1)).unwrap();
        assert!(policy.cache_null_values());
        assert!(!policy.with_null_values(false).cache_null_values());
    }

    #[tokio::test]
    async fn test_entry_uses_owning_cache_ttl() {
        let (cache, _, clock) = cache();
        let short = CachePolicy::new("short", Duration::from_secs(10)).unwrap();
        let long = CachePolicy::new("long", Duration::from_secs(600)).unwrap();
        let calls = AtomicU32::new(0);
        let key = PolicyKey::new("k");

        cache.get_or_compute(|| compute(&calls, 1), "short", &key, &short).await.unwrap();
        cache.get_or_compute(|| compute(&calls, 2), "long", &key, &long).await.unwrap();

        let now = clock.now();
        let short_entry = cache.cache("short").unwrap().entry(&key).unwrap();
        let long_entry = cache.cache("long").unwrap().entry(&key).unwrap();
        assert_eq!(short_entry.expires_at(), now + Duration::from_secs(10));
        assert_eq!(long_entry.expires_at(), now + Duration::from_secs(600));
    }

    #[tokio::test]
    async fn test_first_policy_fixes_cache_ttl() {
        let (cache, scheduler, _) = cache();
        let first = CachePolicy::new("users", Duration::from_secs(30)).unwrap();
        let second = CachePolicy::new("users", Duration::from_secs(90)).unwrap();
        let calls = AtomicU32::new(0);

        cache.get_or_compute(|| compute(&calls, 1), "users", &PolicyKey::new("a"), &first).await.unwrap();
        cache.get_or_compute(|| compute(&calls, 1), "users", &PolicyKey::new("b"), &second).await.unwrap();

        assert_eq!(cache.cache("users").unwrap().ttl(), Duration::from_secs(30));
        assert_eq!(
            scheduler.scheduled(),
            vec![("cache-sweep:users".to_string(), Duration::from_secs(30))]
        );
    }

    #[tokio::test]
    async fn test_sweep_removes_unread_expired_entries() {
        let (cache, scheduler, clock) = cache();
        let policy = CachePolicy::new("reports", Duration::from_secs(5)).unwrap();
        let calls = AtomicU32::new(0);

        for i in 0..10u32 {
            let key = PolicyKey::with_args("report", &i);
            cache.get_or_compute(|| compute(&calls, i), "reports", &key, &policy).await.unwrap();
        }
        assert_eq!(cache.len("reports"), 10);

        clock.advance(Duration::from_secs(5));
        scheduler.run_pending();
        assert_eq!(cache.len("reports"), 0);
    }

    #[tokio::test]
    async fn test_type_mismatch_is_a_miss() {
        let (cache, _, _) = cache();
        let policy = CachePolicy::new("mixed", Duration::from_secs(60)).unwrap();
        let key = PolicyKey::new("k");

        let n: u32 = cache
            .get_or_compute(|| async { Ok::<_, std::io::Error>(5u32) }, "mixed", &key, &policy)
            .await
            .unwrap();
        let s: String = cache
            .get_or_compute(|| async { Ok::<_, std::io::Error>("five".to_string()) }, "mixed", &key, &policy)
            .await
            .unwrap();

        assert_eq!(n, 5);
        assert_eq!(s, "five");
    }

    #[tokio::test]
    async fn test_invalidate_and_clear() {
        let (cache, _, _) = cache();
        let policy = CachePolicy::new("c", Duration::from_secs(60)).unwrap();
        let calls = AtomicU32::new(0);
        let a = PolicyKey::new("a");
        let b = PolicyKey::new("b");

        cache.get_or_compute(|| compute(&calls, 1), "c", &a, &policy).await.unwrap();
        cache.get_or_compute(|| compute(&calls, 2), "c", &b, &policy).await.unwrap();

        assert!(cache.invalidate("c", &a));
        assert!(!cache.invalidate("c", &a));
        assert!(!cache.invalidate("missing", &a));
        assert_eq!(cache.len("c"), 1);

        cache.clear("c");
        assert_eq!(cache.len("c"), 0);
        assert_eq!(cache.cache_names(), vec!["c".to_string()]);
    }

    #[tokio::test]
    async fn test_idle_empty_cache_is_dropped() {
        let (cache, scheduler, clock) = cache();
        let cache = cache.with_idle_timeout(Some(Duration::from_secs(60)));
        let policy = CachePolicy::new("once", Duration::from_secs(10)).unwrap();
        let calls = AtomicU32::new(0);

        cache.get_or_compute(|| compute(&calls, 1), "once", &PolicyKey::new("k"), &policy).await.unwrap();

        clock.advance(Duration::from_secs(10));
        scheduler.run_pending();
        assert!(cache.cache("once").is_some());

        clock.advance(Duration::from_secs(60));
        scheduler.run_pending();
        assert!(cache.cache("once").is_none());
        assert!(scheduler.scheduled().is_empty());
    }

    #[tokio::test]
    async fn test_manual_sweep() {
        let (cache, _, clock) = cache();
        let policy = CachePolicy::new("c", Duration::from_secs(1)).unwrap();
        let calls = AtomicU32::new(0);

        cache.get_or_compute(|| compute(&calls, 1), "c", &PolicyKey::new("k"), &policy).await.unwrap();
        assert_eq!(cache.sweep("c"), 0);

        clock.advance(Duration::from_secs(1));
        assert_eq!(cache.sweep("c"), 1);
        assert_eq!(cache.sweep("missing"), 0);
    }
}
