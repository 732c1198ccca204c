//! Readiness/liveness state tracking.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

/// Tracks thread-safe readiness state for the pipeline's two I/O
/// collaborators (Source Client, Webhook Deliverer) plus the priority
/// queue's current size.
#[derive(Debug)]
pub struct HealthChecker {
    /// Whether the Source Client is currently able to reach the upstream
    /// reader API (i.e. its circuit breaker is not open).
    source_ready: Arc<AtomicBool>,

    /// Whether the Webhook Deliverer is currently able to reach the sink.
    delivery_ready: Arc<AtomicBool>,

    /// Current priority queue size (across all priorities).
    queue_size: Arc<AtomicU64>,

    /// Readiness fails once `queue_size` reaches or exceeds this
    /// threshold — an overwhelmed queue shouldn't accept more fetch work.
    max_queue_size: u64,
}

impl HealthChecker {
    #[must_use]
    pub fn new(max_queue_size: u64) -> Self {
        Self {
            source_ready: Arc::new(AtomicBool::new(false)),
            delivery_ready: Arc::new(AtomicBool::new(false)),
            queue_size: Arc::new(AtomicU64::new(0)),
            max_queue_size,
        }
    }

    pub fn set_source_ready(&self, ready: bool) {
        self.source_ready.store(ready, Ordering::Relaxed);
        tracing::debug!(ready, "source readiness updated");
    }

    pub fn set_delivery_ready(&self, ready: bool) {
        self.delivery_ready.store(ready, Ordering::Relaxed);
        tracing::debug!(ready, "delivery readiness updated");
    }

    pub fn set_queue_size(&self, size: u64) {
        self.queue_size.store(size, Ordering::Relaxed);
    }

    /// For liveness, we just need to respond: if the process can't
    /// respond at all, the HTTP server itself is dead and a watchdog
    /// will notice via timeout.
    #[must_use]
    pub const fn is_alive(&self) -> bool {
        true
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        let source_ok = self.source_ready.load(Ordering::Relaxed);
        let delivery_ok = self.delivery_ready.load(Ordering::Relaxed);
        let current_queue = self.queue_size.load(Ordering::Relaxed);
        let queue_ok = current_queue < self.max_queue_size;

        let ready = source_ok && delivery_ok && queue_ok;

        if !ready {
            tracing::debug!(
                source_ready = source_ok,
                delivery_ready = delivery_ok,
                queue_size = current_queue,
                max_queue_size = self.max_queue_size,
                "readiness check failed"
            );
        }

        ready
    }

    #[must_use]
    pub fn get_status(&self) -> HealthStatus {
        HealthStatus {
            alive: self.is_alive(),
            ready: self.is_ready(),
            source_ready: self.source_ready.load(Ordering::Relaxed),
            delivery_ready: self.delivery_ready.load(Ordering::Relaxed),
            queue_size: self.queue_size.load(Ordering::Relaxed),
            max_queue_size: self.max_queue_size,
        }
    }
}

/// Detailed readiness status, serialized as the readiness probe's JSON
/// body on failure.
#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthStatus {
    pub alive: bool,
    pub ready: bool,
    pub source_ready: bool,
    pub delivery_ready: bool,
    pub queue_size: u64,
    pub max_queue_size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_once_both_collaborators_and_queue_are_ok() {
        let checker = HealthChecker::new(1000);
        assert!(!checker.is_ready());
        checker.set_source_ready(true);
        checker.set_delivery_ready(true);
        assert!(checker.is_ready());
    }

    #[test]
    fn not_ready_when_queue_over_threshold() {
        let checker = HealthChecker::new(10);
        checker.set_source_ready(true);
        checker.set_delivery_ready(true);
        checker.set_queue_size(10);
        assert!(!checker.is_ready());
    }

    #[test]
    fn always_alive() {
        let checker = HealthChecker::new(10);
        assert!(checker.is_alive());
    }
}
