//! Global time sources.
//!
//! The manager only ever reads the timer; whoever owns it advances it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Monotonic seconds, shared read-only with one or more managers.
pub trait ReadOnlyTimer: Send + Sync {
    fn time_in_seconds(&self) -> f64;
}

/// Timer driven explicitly by the host (or a test).
#[derive(Debug, Default)]
pub struct ManualTimer {
    bits: AtomicU64,
}

impl ManualTimer {
    pub fn new(start: f64) -> Self {
        Self {
            bits: AtomicU64::new(start.to_bits()),
        }
    }

    pub fn set_time(&self, seconds: f64) {
        self.bits.store(seconds.to_bits(), Ordering::Release);
    }

    pub fn advance(&self, dt: f64) {
        self.set_time(self.time_in_seconds() + dt);
    }
}

impl ReadOnlyTimer for ManualTimer {
    fn time_in_seconds(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }
}

/// Wall-clock timer measuring seconds since construction.
#[derive(Debug, Clone)]
pub struct SystemTimer {
    origin: Instant,
}

impl SystemTimer {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadOnlyTimer for SystemTimer {
    fn time_in_seconds(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}
