//! C1: monotonic wall-clock epoch source.
//!
//! A single-method capability, same shape as `infra/clock.py::SystemClock` in
//! the original: one trait, one real implementation, one fake for tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

pub trait Clock: Send + Sync {
    fn now_epoch(&self) -> f64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_epoch(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64()
    }
}

/// Deterministic clock for tests: epoch seconds stored as bits behind an
/// atomic so it can be shared and advanced across threads without a lock.
#[derive(Debug)]
pub struct FakeClock {
    bits: AtomicU64,
}

impl FakeClock {
    pub fn new(start_epoch: f64) -> Self {
        Self {
            bits: AtomicU64::new(start_epoch.to_bits()),
        }
    }

    pub fn set(&self, epoch: f64) {
        self.bits.store(epoch.to_bits(), Ordering::SeqCst);
    }

    pub fn advance(&self, delta_sec: f64) {
        let cur = f64::from_bits(self.bits.load(Ordering::SeqCst));
        self.set(cur + delta_sec);
    }
}

impl Clock for FakeClock {
    fn now_epoch(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}
