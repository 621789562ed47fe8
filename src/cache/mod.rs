//! Result caching subsystem.
//!
//! # Data Flow
//! ```text
//! get_or_compute(op, cache_name, key, policy):
//!     → ttl.rs resolves/creates the named Cache (schedules sweep every ttl)
//!     → live entry: return stored value (entry untouched)
//!     → stale entry: remove, treat as miss
//!     → miss: run op once; store unless null and nulls are not cached
//!
//! Sweep task (every ttl):
//!     → drop entries with expires_at ≤ now
//! ```
//!
//! # Design Decisions
//! - Entry expiry always comes from the owning cache's TTL
//! - No single-flight: concurrent misses may both compute, last writer wins
//! - Values are type-erased per entry; a type mismatch reads as a miss

pub mod entry;
pub mod ttl;
pub mod value;

pub use entry::CacheEntry;
pub use ttl::{Cache, CachePolicy, TtlCache};
pub use value::CacheValue;
