//! Jittered exponential backoff, shared by the Error Handler's retry loop
//! and the Webhook Deliverer's own retry schedule.

use std::time::Duration;

use rand::Rng;

/// `uniform(0, min(base * 2^attempt, cap))`.
///
/// `attempt` is 0-indexed (the first retry passes `0`).
#[must_use]
pub fn jittered(base: Duration, attempt: u32, cap: Duration) -> Duration {
    let exponent = attempt.min(32);
    let multiplier = 1u64 << exponent;
    let upper = base.saturating_mul(u32::try_from(multiplier).unwrap_or(u32::MAX)).min(cap);

    if upper.is_zero() {
        return Duration::ZERO;
    }

    rand::rng().random_range(Duration::ZERO..=upper)
}

/// `min(initial * factor^attempt, max)`, the Webhook Deliverer's own
/// backoff schedule, with no jitter.
#[must_use]
pub fn exponential(initial: Duration, factor: f64, attempt: u32, max: Duration) -> Duration {
    let scaled = initial.as_secs_f64() * factor.powi(i32::try_from(attempt).unwrap_or(i32::MAX));
    Duration::from_secs_f64(scaled).min(max)
}
