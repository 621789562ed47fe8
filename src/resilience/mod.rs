//! Retry subsystem.
//!
//! # Data Flow
//! ```text
//! Invocation fails:
//!     → classify.rs (deny set, then allow set)
//!     → retries.rs (attempt budget left?)
//!     → backoff.rs (fixed or exponential delay, optional cap/jitter)
//!     → sleep (cancellable) → next attempt
//! ```
//!
//! # Design Decisions
//! - Classification is pure; kinds are strings so policies load from config
//! - Deny always beats allow
//! - Backoff saturates rather than overflowing on large attempt counts

pub mod backoff;
pub mod classify;
pub mod retries;

pub use classify::Classify;
pub use retries::{should_retry, RetryExecutor, RetryPolicy, RetryPolicyBuilder};
