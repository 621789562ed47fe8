//! Lifecycle management.
//!
//! # Data Flow
//! ```text
//! Host process:
//!     Shutdown::new() → Scheduler::start() → PolicyRegistry::new()
//!     ... calls ...
//!     Shutdown::trigger() / Scheduler::shutdown() → background tasks exit
//!
//! Per call:
//!     Cancellation::new() → subscribe() → *_cancellable(...)
//!     trigger() → suspended backoff/poll aborts with PolicyError::Cancelled
//! ```
//!
//! # Design Decisions
//! - One level-triggered primitive for both process shutdown and call cancellation
//! - No global state: every scheduler and call owns its signal explicitly

pub mod shutdown;

pub use shutdown::{Shutdown, ShutdownSignal};

/// Per-call cancellation source. Triggering it aborts a suspended retry
/// backoff or a blocked rate-limit wait.
pub type Cancellation = Shutdown;
