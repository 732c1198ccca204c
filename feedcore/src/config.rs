//! Top-level configuration: one struct per concern, aggregated for the
//! binary to load from a single TOML file.

use std::time::Duration;

use feedcore_classifier::ClassifierConfig;
use feedcore_delivery::WebhookConfig;
use feedcore_health::HealthConfig;
use feedcore_orchestrator::OrchestratorConfig;
use feedcore_resilience::CircuitBreakerConfig;
use feedcore_source::SourceConfig;
use serde::Deserialize;

/// Priority Queue sizing. No crate in the workspace owns a config struct
/// for this — `PriorityQueue` takes its capacity and dedup window as plain
/// constructor arguments — so the binary aggregates them here.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,
    #[serde(default = "default_dedup_window_secs")]
    pub dedup_window_secs: u64,
}

const fn default_queue_capacity() -> usize {
    10_000
}

const fn default_dedup_window_secs() -> u64 {
    3600
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_queue_capacity(),
            dedup_window_secs: default_dedup_window_secs(),
        }
    }
}

impl QueueConfig {
    #[must_use]
    pub const fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.dedup_window_secs)
    }
}

/// Circuit breaker thresholds for the two outbound services, keyed by the
/// same names the Source Client and Webhook Deliverer register under.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BreakerConfig {
    #[serde(default)]
    pub source: CircuitBreakerConfig,
    #[serde(default)]
    pub delivery: CircuitBreakerConfig,
}

/// Aggregates every concern's configuration for loading from a single TOML
/// file. Sections absent from the file fall back to each concern's own
/// defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeedcoreConfig {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub breakers: BreakerConfig,
}
