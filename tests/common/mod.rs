//! Shared utilities for integration tests.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use invocation_policy::Classify;

/// Failure with an explicit kind, e.g. `"db.timeout"`. Kinds form a
/// hierarchy on `.`: `"db"` matches `"db.timeout"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestFailure {
    pub kind: &'static str,
}

impl TestFailure {
    pub fn new(kind: &'static str) -> Self {
        Self { kind }
    }
}

impl fmt::Display for TestFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failure", self.kind)
    }
}

impl Classify for TestFailure {
    fn failure_kind(&self) -> &str {
        self.kind
    }

    fn is_kind(&self, kind: &str) -> bool {
        self.kind == kind
            || self
                .kind
                .strip_prefix(kind)
                .is_some_and(|rest| rest.starts_with('.'))
    }
}

/// Invocation that fails `failures` times with `kind`, then returns `value`.
/// Records the instant of every attempt.
#[derive(Clone)]
pub struct Flaky {
    calls: Arc<AtomicU32>,
    attempts: Arc<Mutex<Vec<Instant>>>,
    failures: u32,
    kind: &'static str,
}

#[allow(dead_code)]
impl Flaky {
    pub fn new(failures: u32, kind: &'static str) -> Self {
        Self {
            calls: Arc::new(AtomicU32::new(0)),
            attempts: Arc::new(Mutex::new(Vec::new())),
            failures,
            kind,
        }
    }

    pub fn always(kind: &'static str) -> Self {
        Self::new(u32::MAX, kind)
    }

    pub async fn call(&self, value: u32) -> Result<u32, TestFailure> {
        self.attempts.lock().unwrap().push(Instant::now());
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            Err(TestFailure::new(self.kind))
        } else {
            Ok(value)
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn attempt_times(&self) -> Vec<Instant> {
        self.attempts.lock().unwrap().clone()
    }
}

/// Counts invocations and returns a fixed value.
#[derive(Clone, Default)]
pub struct Counting {
    calls: Arc<AtomicU32>,
}

#[allow(dead_code)]
impl Counting {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn call<V>(&self, value: V) -> Result<V, TestFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(value)
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}
