//! Cache entries.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cache::value::CacheValue;

/// Far-future fallback when `created_at + ttl` does not fit in an `Instant`.
const FOREVER: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// One stored result, immutable once inserted.
#[derive(Clone)]
pub struct CacheEntry {
    value: Arc<dyn Any + Send + Sync>,
    created_at: Instant,
    expires_at: Instant,
}

impl CacheEntry {
    /// `ttl` must be the TTL of the cache that will own the entry.
    pub(crate) fn new<V: CacheValue>(value: V, created_at: Instant, ttl: Duration) -> Self {
        let expires_at = created_at
            .checked_add(ttl)
            .or_else(|| created_at.checked_add(FOREVER))
            .unwrap_or(created_at);
        Self {
            value: Arc::new(value),
            created_at,
            expires_at,
        }
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// The stored value, if it is a `V`.
    pub fn get<V: CacheValue>(&self) -> Option<V> {
        self.value.downcast_ref::<V>().cloned()
    }
}

impl fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}
