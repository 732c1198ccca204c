//! Per-service circuit breaker: closed/open/half-open, one mutex per
//! breaker, consecutive-failure threshold (no time-windowed counting).

use std::time::{Duration, Instant};

use dashmap::DashMap;
use feedcore_common::ServiceName;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Configuration for a single service's breaker.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures required to open the circuit.
    pub failure_threshold: u32,
    /// How long the circuit stays open before a probe is allowed.
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

/// Circuit breaker state, as observed from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open { opened_at: Instant },
    HalfOpen,
}

struct BreakerData {
    state: BreakerState,
    failure_count: u32,
    /// Set while a single HalfOpen probe is outstanding, so concurrent
    /// callers (e.g. multiple drain workers) can't all slip through at
    /// once. Cleared by whichever of `record_success`/`record_failure`
    /// resolves that probe.
    probe_in_flight: bool,
    config: CircuitBreakerConfig,
}

impl std::fmt::Debug for BreakerData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BreakerData")
            .field("state", &self.state)
            .field("failure_count", &self.failure_count)
            .field("probe_in_flight", &self.probe_in_flight)
            .finish()
    }
}

impl BreakerData {
    const fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            state: BreakerState::Closed,
            failure_count: 0,
            probe_in_flight: false,
            config,
        }
    }

    /// `can_proceed` also drives the Open -> HalfOpen transition: the first
    /// call observed at or after `opened_at + reset_timeout` both returns
    /// `true` and flips the state. While HalfOpen, exactly one caller is
    /// admitted as the probe; every other caller is rejected until
    /// `record_success` or `record_failure` resolves it.
    fn can_proceed(&mut self) -> bool {
        match self.state {
            BreakerState::Closed => true,
            BreakerState::HalfOpen => {
                if self.probe_in_flight {
                    false
                } else {
                    self.probe_in_flight = true;
                    true
                }
            }
            BreakerState::Open { opened_at } => {
                if Instant::now().duration_since(opened_at) >= self.config.reset_timeout {
                    self.state = BreakerState::HalfOpen;
                    self.probe_in_flight = true;
                    true
                } else {
                    false
                }
            }
        }
    }

    fn record_success(&mut self) {
        self.state = BreakerState::Closed;
        self.failure_count = 0;
        self.probe_in_flight = false;
    }

    fn record_failure(&mut self) {
        match self.state {
            BreakerState::Closed => {
                self.failure_count += 1;
                if self.failure_count >= self.config.failure_threshold {
                    self.state = BreakerState::Open {
                        opened_at: Instant::now(),
                    };
                    self.failure_count = 0;
                }
            }
            BreakerState::HalfOpen => {
                self.state = BreakerState::Open {
                    opened_at: Instant::now(),
                };
                self.probe_in_flight = false;
            }
            BreakerState::Open { .. } => {}
        }
    }
}

/// Per-service circuit breaker pool.
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    default_config: CircuitBreakerConfig,
    breakers: DashMap<ServiceName, std::sync::Arc<Mutex<BreakerData>>>,
}

impl CircuitBreakerRegistry {
    #[must_use]
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            default_config,
            breakers: DashMap::new(),
        }
    }

    /// Override the config for a specific service, creating its breaker if
    /// absent.
    pub fn configure(&self, service: &ServiceName, config: CircuitBreakerConfig) {
        self.breakers
            .insert(service.clone(), std::sync::Arc::new(Mutex::new(BreakerData::new(config))));
    }

    fn breaker(&self, service: &ServiceName) -> std::sync::Arc<Mutex<BreakerData>> {
        self.breakers
            .entry(service.clone())
            .or_insert_with(|| std::sync::Arc::new(Mutex::new(BreakerData::new(self.default_config))))
            .clone()
    }

    /// Whether a call to `service` should be allowed right now. Transitions
    /// Open -> HalfOpen when the cooldown has elapsed.
    pub fn can_proceed(&self, service: &ServiceName) -> bool {
        self.breaker(service).lock().can_proceed()
    }

    pub fn record_success(&self, service: &ServiceName) {
        self.breaker(service).lock().record_success();
    }

    pub fn record_failure(&self, service: &ServiceName) {
        self.breaker(service).lock().record_failure();
    }

    /// Current state, for the `circuit_breaker_state{service}` metric.
    #[must_use]
    pub fn state(&self, service: &ServiceName) -> BreakerState {
        self.breaker(service).lock().state
    }
}
