use chrono::Utc;

use std::fmt::Debug;
use std::sync::atomic::{AtomicI64, Ordering};

/// Source of block timestamps, in milliseconds since the Unix epoch
pub trait Clock: Send + Sync + Debug {
    fn now_millis(&self) -> i64;
}

/// Reads the wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Returns a preset instant, optionally advancing by a fixed step per read
#[derive(Debug)]
pub struct FixedClock {
    next: AtomicI64,
    step: i64,
}

impl FixedClock {
    /// A clock frozen at `millis`
    pub fn new(millis: i64) -> Self {
        Self::stepping(millis, 0)
    }

    /// A clock starting at `millis` that moves forward `step` ms on every read
    pub fn stepping(millis: i64, step: i64) -> Self {
        FixedClock {
            next: AtomicI64::new(millis),
            step,
        }
    }
}

impl Clock for FixedClock {
    fn now_millis(&self) -> i64 {
        self.next.fetch_add(self.step, Ordering::SeqCst)
    }
}
