//! Liveness/readiness HTTP endpoint for the ingestion/delivery pipeline.
//!
//! Not part of the core spec, but required for a deployable service: the
//! core assumes injected collaborators, so something at the binary level
//! needs to track and expose their readiness.
//!
//! # Endpoints
//!
//! - **`/healthz`** — liveness: 200 once the server is bound.
//! - **`/readyz`** — readiness: 200 iff the Source Client and Webhook
//!   Deliverer are both marked ready and the priority queue is below its
//!   configured size threshold.
//! - **`/metrics`** — a JSON snapshot of the process-local metrics
//!   registry; not a Prometheus exposition format.
//!
//! # Usage
//!
//! ```rust,no_run
//! use feedcore_health::{HealthChecker, HealthConfig, HealthServer};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = HealthConfig::default();
//! let health_checker = Arc::new(HealthChecker::new(10_000));
//! let server = HealthServer::new(config, health_checker).await?;
//! # Ok(())
//! # }
//! ```

mod checker;
mod config;
mod error;
mod server;

pub use checker::{HealthChecker, HealthStatus};
pub use config::HealthConfig;
pub use error::HealthError;
pub use server::HealthServer;
