//! Injectable clock abstraction.
//!
//! Rate limiter refill and circuit breaker cooldowns are defined in terms
//! of monotonic time (spec: "Timekeeping"). Production code uses
//! [`SystemClock`]; tests that need to assert exact backoff/cooldown
//! behavior without sleeping real wall-clock time can supply a
//! [`FakeClock`] instead.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

/// A source of monotonic time.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// The current monotonic instant.
    fn now(&self) -> Instant;
}

/// The real, wall-clock-backed monotonic clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock whose reading only advances when told to, for deterministic
/// tests of time-dependent behavior (breaker cooldowns, token refill).
#[derive(Debug)]
pub struct FakeClock {
    base: Instant,
    offset_millis: AtomicU64,
}

impl FakeClock {
    /// Create a fake clock starting at the current real instant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset_millis: AtomicU64::new(0),
        }
    }

    /// Advance the fake clock by `duration`.
    pub fn advance(&self, duration: Duration) {
        self.offset_millis.fetch_add(
            u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            Ordering::SeqCst,
        );
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.base + Duration::from_millis(self.offset_millis.load(Ordering::SeqCst))
    }
}
