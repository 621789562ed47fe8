//! Invocation policies: retry with backoff, fixed-window rate limiting and
//! TTL caching for async invocations, resolved per policy key from a
//! hot-reloadable configuration.

pub mod cache;
pub mod config;
pub mod error;
pub mod key;
pub mod lifecycle;
pub mod observability;
pub mod registry;
pub mod resilience;
pub mod scheduler;
pub mod throttle;

pub use cache::{CachePolicy, CacheValue, TtlCache};
pub use config::schema::PoliciesConfig;
pub use error::{PolicyError, Suspension};
pub use key::PolicyKey;
pub use lifecycle::{Cancellation, Shutdown, ShutdownSignal};
pub use observability::{LogLevel, MetricPolicy, TimingPolicy};
pub use registry::PolicyRegistry;
pub use resilience::{Classify, RetryExecutor, RetryPolicy};
pub use scheduler::{Schedule, Scheduler};
pub use throttle::{Overflow, RateLimitPolicy, RateLimiter};
