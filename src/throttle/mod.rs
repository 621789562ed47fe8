//! Rate limiting subsystem.
//!
//! # Data Flow
//! ```text
//! acquire_or_run(op, key, policy):
//!     → limiter.rs resolves/creates the key's counter (schedules reset task)
//!     → counter.rs atomic increment → post-increment count n
//!     → n ≤ limit: run op
//!     → n > limit: Reject | DefaultValue | Block (wait for reset, re-acquire)
//!
//! Reset task (every window):
//!     → counter.rs reset: generation+1, count=0, wake blocked callers
//! ```
//!
//! # Design Decisions
//! - Fixed window: completions never give capacity back
//! - Counts and window generation share one atomic word
//! - Blocked callers wake on the reset event, with a bounded poll as backstop
//! - Idle counters may be evicted; eviction is opt-in

pub mod counter;
pub mod limiter;

pub use counter::{RateCounter, Ticket};
pub use limiter::{Overflow, RateLimitPolicy, RateLimiter, DEFAULT_POLL_INTERVAL};
