//! Health check HTTP server

use std::{sync::Arc, time::Duration};

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use feedcore_common::Signal;
use tokio::net::TcpListener;
use tower_http::timeout::TimeoutLayer;

use crate::{HealthChecker, HealthConfig, HealthError};

/// Health check HTTP server.
///
/// Provides `/healthz` (liveness) and `/readyz` (readiness) endpoints.
pub struct HealthServer {
    listener: TcpListener,
    router: Router,
}

impl HealthServer {
    /// Bind the health server to `config.listen_address`.
    ///
    /// # Errors
    ///
    /// Returns an error if binding fails.
    pub async fn new(
        config: HealthConfig,
        health_checker: Arc<HealthChecker>,
    ) -> Result<Self, HealthError> {
        let listener =
            TcpListener::bind(&config.listen_address)
                .await
                .map_err(|e| HealthError::BindError {
                    address: config.listen_address.clone(),
                    source: e,
                })?;

        tracing::info!(address = %config.listen_address, "health server bound");

        let router = Router::new()
            .route("/healthz", get(liveness_handler))
            .route("/readyz", get(readiness_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(health_checker)
            .layer(TimeoutLayer::new(Duration::from_secs(1)));

        Ok(Self { listener, router })
    }

    /// Serve until `shutdown` fires.
    ///
    /// # Errors
    ///
    /// Returns an error if the server encounters a runtime error.
    pub async fn serve(
        self,
        mut shutdown: tokio::sync::broadcast::Receiver<Signal>,
    ) -> Result<(), HealthError> {
        tracing::info!("health server starting");

        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("health server received shutdown signal");
            })
            .await
            .map_err(|e| HealthError::ServerError(e.to_string()))?;

        tracing::info!("health server stopped");
        Ok(())
    }
}

async fn liveness_handler(State(health_checker): State<Arc<HealthChecker>>) -> Response {
    if health_checker.is_alive() {
        (StatusCode::OK, "OK").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable").into_response()
    }
}

/// Debug surface over the process-local metrics registry. Not a
/// Prometheus exposition format — a plain JSON snapshot of every counter,
/// gauge, and histogram recorded so far.
async fn metrics_handler() -> Response {
    Json(feedcore_metrics::registry().snapshot()).into_response()
}

async fn readiness_handler(State(health_checker): State<Arc<HealthChecker>>) -> Response {
    if health_checker.is_ready() {
        (StatusCode::OK, "OK").into_response()
    } else {
        let status = health_checker.get_status();
        tracing::warn!(
            source_ready = status.source_ready,
            delivery_ready = status.delivery_ready,
            queue_size = status.queue_size,
            max_queue_size = status.max_queue_size,
            "readiness probe failed"
        );
        (StatusCode::SERVICE_UNAVAILABLE, Json(status)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn liveness_always_passes() {
        let checker = Arc::new(HealthChecker::new(10_000));
        let response = liveness_handler(State(checker)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn readiness_fails_until_collaborators_ready() {
        let checker = Arc::new(HealthChecker::new(10_000));
        let response = readiness_handler(State(checker)).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn readiness_passes_once_ready() {
        let checker = Arc::new(HealthChecker::new(10_000));
        checker.set_source_ready(true);
        checker.set_delivery_ready(true);
        checker.set_queue_size(100);

        let response = readiness_handler(State(checker)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn readiness_fails_when_queue_too_large() {
        let checker = Arc::new(HealthChecker::new(1_000));
        checker.set_source_ready(true);
        checker.set_delivery_ready(true);
        checker.set_queue_size(2_000);

        let response = readiness_handler(State(checker)).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn metrics_endpoint_always_succeeds() {
        feedcore_metrics::registry().incr("items_fetched", "");
        let response = metrics_handler().await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
