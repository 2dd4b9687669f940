//! Wall-clock abstraction so sync windows can be computed deterministically.

use chrono::Utc;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::types::UtcMillis;

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Current time in UTC milliseconds.
    fn now_ms(&self) -> UtcMillis;
}

/// Clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> UtcMillis {
        Utc::now().timestamp_millis()
    }
}

/// Clock that only moves when told to. Used by tests and simulations.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    /// Create a clock frozen at `now_ms`.
    pub fn new(now_ms: UtcMillis) -> Self {
        Self {
            now: AtomicI64::new(now_ms),
        }
    }

    /// Jump to an absolute time.
    pub fn set(&self, now_ms: UtcMillis) {
        self.now.store(now_ms, Ordering::SeqCst);
    }

    /// Move forward by `delta_ms`.
    pub fn advance(&self, delta_ms: i64) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> UtcMillis {
        self.now.load(Ordering::SeqCst)
    }
}
