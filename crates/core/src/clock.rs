//! Time source abstraction.
//!
//! Lease arithmetic works in whole unix seconds. Production code injects
//! [`SystemClock`]; tests inject a [`ManualClock`] for deterministic
//! behaviour.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use time::OffsetDateTime;

/// Source of wall-clock time in unix seconds.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now_secs(&self) -> i64;
}

/// Clock backed by the system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> i64 {
        OffsetDateTime::now_utc().unix_timestamp()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now: i64) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_secs(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}
