//! Time and background work.
//!
//! # Data Flow
//! ```text
//! RateLimiter / TtlCache (first use of a key or cache)
//!     → Schedule::schedule(every = window | ttl)
//!     → tasks.rs runs the closure each period on the runtime
//!     → closure reads Clock::now() and resets / sweeps
//! ```
//!
//! # Design Decisions
//! - Scheduler is constructed explicitly and injected; no process-wide thread
//! - Clock and scheduler are traits so tests can substitute manual versions

pub mod clock;
pub mod tasks;

pub use clock::{Clock, ManualClock, SystemClock};
pub use tasks::{
    ManualScheduler, Schedule, ScheduledTask, Scheduler, SchedulerError, TaskControl, TaskHandle,
};
