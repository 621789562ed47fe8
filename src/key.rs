//! Policy keys.
//!
//! A key names the per-operation state a policy tracks: a rate counter, a
//! cache entry. Equal keys share state. The adaptation layer derives keys;
//! the helpers here cover the common shapes (operation identity, optionally
//! combined with a fingerprint of the call arguments).

use std::borrow::Borrow;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

/// Error type for key derivation.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("failed to fingerprint arguments: {0}")]
    Fingerprint(#[from] serde_json::Error),
}

/// Stable identifier for a governed operation.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PolicyKey(Arc<str>);

impl PolicyKey {
    /// Key for an operation, e.g. `"UserRepository.find_by_id"`.
    pub fn new(operation: impl AsRef<str>) -> Self {
        Self(Arc::from(operation.as_ref()))
    }

    /// Key for an operation combined with a hash of its arguments.
    pub fn with_args<A: Hash + ?Sized>(operation: impl AsRef<str>, args: &A) -> Self {
        let mut hasher = DefaultHasher::new();
        args.hash(&mut hasher);
        Self::new(format!("{}:{:016x}", operation.as_ref(), hasher.finish()))
    }

    /// Like [`PolicyKey::with_args`] for arguments that are only `Serialize`.
    pub fn with_serialized_args<A: Serialize + ?Sized>(
        operation: impl AsRef<str>,
        args: &A,
    ) -> Result<Self, KeyError> {
        let rendered = serde_json::to_string(args)?;
        Ok(Self::with_args(operation, rendered.as_str()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Cache name used when none is configured: `"Type#method"`.
pub fn default_cache_name(type_name: &str, method: &str) -> String {
    format!("{}#{}", type_name, method)
}

impl fmt::Display for PolicyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for PolicyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PolicyKey({:?})", &*self.0)
    }
}

impl Borrow<str> for PolicyKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PolicyKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for PolicyKey {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}
