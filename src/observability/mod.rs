//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Policy engines produce:
//!     → tracing events (structured fields: key, attempt, delay_ms, ...)
//!     → metrics.rs (counters through the `metrics` facade)
//!     → timing.rs (execution time lines at a configured level)
//!     → metering.rs (per-key invocation count, time and exceptions)
//!
//! Consumers:
//!     → logging.rs subscriber (stdout)
//!     → whatever metrics recorder the host installs
//! ```

pub mod logging;
pub mod metering;
pub mod metrics;
pub mod timing;

pub use metering::{metered, MetricPolicy};
pub use timing::{timed, LogLevel, TimingPolicy};
