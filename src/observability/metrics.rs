//! Policy metrics.
//!
//! Counters are recorded through the `metrics` facade; the host process
//! installs whatever recorder/exporter it uses.
//!
//! # Metrics
//! - `policy_retry_attempts_total` (counter): retries scheduled after a failure
//! - `policy_retry_exhausted_total` (counter): calls that ran out of attempts
//! - `policy_rate_limited_total` (counter): over-limit calls by `behavior`
//! - `policy_cache_hits_total` / `policy_cache_misses_total` (counter): by `cache`
//! - `policy_cache_evictions_total` (counter): expired entries swept, by `cache`

use metrics::counter;

pub fn record_retry_attempt() {
    counter!("policy_retry_attempts_total").increment(1);
}

pub fn record_retry_exhausted() {
    counter!("policy_retry_exhausted_total").increment(1);
}

pub fn record_rate_limited(behavior: &'static str) {
    counter!("policy_rate_limited_total", "behavior" => behavior).increment(1);
}

pub fn record_cache_hit(cache: &str) {
    counter!("policy_cache_hits_total", "cache" => cache.to_string()).increment(1);
}

pub fn record_cache_miss(cache: &str) {
    counter!("policy_cache_misses_total", "cache" => cache.to_string()).increment(1);
}

pub fn record_cache_evictions(cache: &str, removed: usize) {
    counter!("policy_cache_evictions_total", "cache" => cache.to_string())
        .increment(removed as u64);
}
