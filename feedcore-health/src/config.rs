//! Health check configuration

use serde::Deserialize;

/// Configuration for the health/readiness HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    /// When disabled, the health server never starts.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Address to bind the health server (`[::]:8080`, `0.0.0.0:8080`,
    /// `127.0.0.1:8080`, ...).
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Readiness fails once the priority queue reaches this size.
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: u64,
}

const fn default_enabled() -> bool {
    true
}

fn default_listen_address() -> String {
    "[::]:8080".to_string()
}

const fn default_max_queue_size() -> u64 {
    10_000
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            listen_address: default_listen_address(),
            max_queue_size: default_max_queue_size(),
        }
    }
}
