//! Per-key fixed-window counter.
//!
//! The window generation and the call count share one atomic word
//! (`generation << 32 | count`). A reset bumps the generation and zeroes
//! the count in one step, so an increment lands wholly in one window or the
//! next and is never lost or counted twice across the boundary.
//!
//! Retirement (idle eviction) is a third state of the same word: the count
//! field is set to a sentinel, and only while the current window is empty.
//! An increment either lands before retirement, which then fails, or
//! observes the sentinel and is refused.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

use tokio::sync::futures::Notified;
use tokio::sync::Notify;

use crate::key::PolicyKey;
use crate::scheduler::TaskHandle;

const COUNT_MASK: u64 = u32::MAX as u64;
const RETIRED: u32 = u32::MAX;
const MAX_COUNT: u32 = RETIRED - 1;

fn unpack(word: u64) -> Ticket {
    Ticket {
        generation: (word >> 32) as u32,
        count: (word & COUNT_MASK) as u32,
    }
}

/// Result of one increment: the post-increment count within its window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    pub generation: u32,
    pub count: u32,
}

/// Call counter for one key.
#[derive(Debug)]
pub struct RateCounter {
    key: PolicyKey,
    state: AtomicU64,
    window_started: Mutex<Instant>,
    last_used: Mutex<Instant>,
    reset: Notify,
    pub(crate) task: OnceLock<TaskHandle>,
}

impl RateCounter {
    pub(crate) fn new(key: PolicyKey, now: Instant) -> Self {
        Self {
            key,
            state: AtomicU64::new(0),
            window_started: Mutex::new(now),
            last_used: Mutex::new(now),
            reset: Notify::new(),
            task: OnceLock::new(),
        }
    }

    pub fn key(&self) -> &PolicyKey {
        &self.key
    }

    /// Count one call in the current window. `None` once retired.
    pub fn increment(&self, now: Instant) -> Option<Ticket> {
        let mut prev = self.state.load(Ordering::Acquire);
        let next = loop {
            let ticket = unpack(prev);
            if ticket.count == RETIRED {
                return None;
            }
            let count = ticket.count.saturating_add(1).min(MAX_COUNT);
            let next = (u64::from(ticket.generation) << 32) | u64::from(count);
            match self
                .state
                .compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => break next,
                Err(actual) => prev = actual,
            }
        };
        *self.last_used.lock().unwrap_or_else(|e| e.into_inner()) = now;
        Some(unpack(next))
    }

    /// Start a new window: count back to 0, wake blocked callers. No-op
    /// once retired.
    pub fn reset(&self, now: Instant) {
        let mut prev = self.state.load(Ordering::Acquire);
        loop {
            if unpack(prev).count == RETIRED {
                return;
            }
            let next = u64::from(unpack(prev).generation.wrapping_add(1)) << 32;
            match self
                .state
                .compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => break,
                Err(actual) => prev = actual,
            }
        }
        *self.window_started.lock().unwrap_or_else(|e| e.into_inner()) = now;
        self.reset.notify_waiters();
    }

    /// Calls counted in the current window.
    pub fn count(&self) -> u32 {
        match unpack(self.state.load(Ordering::Acquire)).count {
            RETIRED => 0,
            count => count,
        }
    }

    /// Number of resets so far (wrapping).
    pub fn generation(&self) -> u32 {
        unpack(self.state.load(Ordering::Acquire)).generation
    }

    pub fn window_started(&self) -> Instant {
        *self.window_started.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn last_used(&self) -> Instant {
        *self.last_used.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_used())
    }

    /// Whether idle eviction dropped this counter from its limiter.
    pub fn is_retired(&self) -> bool {
        unpack(self.state.load(Ordering::Acquire)).count == RETIRED
    }

    /// Retire the counter if no call was admitted in the current window.
    /// Returns false, leaving the counter live, when one was.
    pub(crate) fn try_retire(&self) -> bool {
        let mut prev = self.state.load(Ordering::Acquire);
        loop {
            let ticket = unpack(prev);
            if ticket.count == RETIRED {
                return true;
            }
            if ticket.count != 0 {
                return false;
            }
            let next = (u64::from(ticket.generation) << 32) | u64::from(RETIRED);
            match self
                .state
                .compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => break,
                Err(actual) => prev = actual,
            }
        }
        if let Some(task) = self.task.get() {
            task.cancel();
        }
        self.reset.notify_waiters();
        true
    }

    /// Future that completes on the next reset or retirement.
    pub(crate) fn reset_notified(&self) -> Notified<'_> {
        self.reset.notified()
    }
}
