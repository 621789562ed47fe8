//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! policy file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → PoliciesConfig (validated, immutable)
//!     → resolved into per-key policies by the registry
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → registry swaps its snapshot atomically
//!     → the next call under each key sees the new policies
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Live state (counters, cached entries) survives a reload

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    CacheConfig, ObservabilityConfig, PoliciesConfig, PolicyOverride, RetryConfig, StateConfig,
    ThrottleConfig, TimingConfig,
};
pub use validation::{validate_config, ValidationError};
pub use watcher::ConfigWatcher;
