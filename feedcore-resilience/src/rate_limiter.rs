//! Token-bucket rate limiting with blocking-wait semantics.
//!
//! Each [`RateLimiter`] owns one bucket; [`EndpointLimiter`] multiplexes a
//! pool of them keyed by [`ServiceName`], lazily created from a default
//! config on first use.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use feedcore_common::ServiceName;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Configuration for a single token bucket.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    /// Tokens added per second.
    pub rate_per_second: f64,
    /// Maximum tokens the bucket can hold; also the largest burst size
    /// admitted without waiting.
    pub burst: u32,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            rate_per_second: 5.0,
            burst: 5,
        }
    }
}

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(config: RateLimiterConfig) -> Self {
        let capacity = f64::from(config.burst);
        Self {
            tokens: capacity,
            capacity,
            rate: config.rate_per_second,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.last_refill = now;
    }

    fn try_consume(&mut self, n: f64) -> bool {
        if self.tokens >= n {
            self.tokens -= n;
            true
        } else {
            false
        }
    }

    fn time_until(&self, n: f64) -> Duration {
        if self.tokens >= n || self.rate <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64((n - self.tokens) / self.rate)
    }
}

/// Outcome of an [`RateLimiter::acquire`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired,
    TimedOut,
}

impl AcquireOutcome {
    #[must_use]
    pub const fn is_acquired(self) -> bool {
        matches!(self, Self::Acquired)
    }
}

/// A single token-bucket rate limiter. One mutex per bucket, held only
/// across token arithmetic, never across sleeps.
#[derive(Debug)]
pub struct RateLimiter {
    bucket: Mutex<TokenBucket>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            bucket: Mutex::new(TokenBucket::new(config)),
        }
    }

    /// Acquire `n` tokens, blocking (via async suspension) until available
    /// or `timeout` elapses. No negative balances, no debt.
    pub async fn acquire(&self, n: u32, timeout: Option<Duration>) -> AcquireOutcome {
        let deadline = timeout.map(|t| Instant::now() + t);
        let n = f64::from(n);

        loop {
            let wait_needed = {
                let mut bucket = self.bucket.lock();
                bucket.refill(Instant::now());
                if bucket.try_consume(n) {
                    return AcquireOutcome::Acquired;
                }
                bucket.time_until(n)
            };

            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return AcquireOutcome::TimedOut;
                    }
                    let remaining = deadline - now;
                    if wait_needed >= remaining {
                        tokio::time::sleep(remaining).await;
                        return AcquireOutcome::TimedOut;
                    }
                    tokio::time::sleep(wait_needed).await;
                }
                None => tokio::time::sleep(wait_needed).await,
            }
        }
    }

    /// Block until `n` tokens are available, with no timeout. Returns the
    /// wait duration, for the `rate_limit_wait_seconds` metric.
    pub async fn wait(&self, n: u32) -> Duration {
        let start = Instant::now();
        self.acquire(n, None).await;
        start.elapsed()
    }
}

/// A pool of [`RateLimiter`]s keyed by endpoint, created on first use from
/// a default config. Writes to the pool go through one `DashMap` shard
/// lock; reads of an already-created limiter need no further locking
/// beyond the limiter's own bucket mutex.
#[derive(Debug)]
pub struct EndpointLimiter {
    default_config: RateLimiterConfig,
    limiters: DashMap<ServiceName, std::sync::Arc<RateLimiter>>,
}

impl EndpointLimiter {
    #[must_use]
    pub fn new(default_config: RateLimiterConfig) -> Self {
        Self {
            default_config,
            limiters: DashMap::new(),
        }
    }

    /// Get (creating if absent) the limiter for `endpoint`.
    #[must_use]
    pub fn get(&self, endpoint: &ServiceName) -> std::sync::Arc<RateLimiter> {
        self.limiters
            .entry(endpoint.clone())
            .or_insert_with(|| std::sync::Arc::new(RateLimiter::new(self.default_config)))
            .clone()
    }
}
