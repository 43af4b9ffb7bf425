//! Monotonic time sources used by the detection loop and its schedulers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Trait representing a monotonic time source.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> Instant;
}

/// Default time source backed by `Instant::now`.
#[derive(Default)]
pub struct SystemTimeSource {
    _unit: (),
}

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Deterministic time source for tests and offline analysis.
///
/// Time only moves through [`advance`](Self::advance) and an optional fixed
/// step applied after every `now()` call.
pub struct StubTimeSource {
    start: Instant,
    offset_us: AtomicU64,
    step_us: u64,
}

impl StubTimeSource {
    /// Frozen clock; advance it manually.
    pub fn new() -> Self {
        Self::with_step(Duration::ZERO)
    }

    /// Clock that moves forward by `step` on every read.
    pub fn with_step(step: Duration) -> Self {
        Self {
            start: Instant::now(),
            offset_us: AtomicU64::new(0),
            step_us: step.as_micros() as u64,
        }
    }

    pub fn advance(&self, by: Duration) {
        self.offset_us
            .fetch_add(by.as_micros() as u64, Ordering::SeqCst);
    }

    /// Time elapsed since construction.
    pub fn elapsed(&self) -> Duration {
        Duration::from_micros(self.offset_us.load(Ordering::SeqCst))
    }
}

impl Default for StubTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for StubTimeSource {
    fn now(&self) -> Instant {
        let us = self.offset_us.fetch_add(self.step_us, Ordering::SeqCst);
        self.start + Duration::from_micros(us)
    }
}
