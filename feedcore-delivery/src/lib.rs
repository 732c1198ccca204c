//! Webhook batching, delivery, retry, and backoff.
//!
//! `WebhookDeliverer::deliver` owns its own backoff schedule (distinct from
//! the Error Handler's jittered retry loop used by the Source Client) so
//! that transient-failure timing is exactly reproducible; the circuit
//! breaker and bounded error history are still shared with every other
//! outbound call via the injected [`ErrorHandler`].

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use feedcore_classifier::ClassifierConfig;
use feedcore_common::{delivered, ContentType, Item, ServiceName};
use feedcore_resilience::{backoff, ErrorCategory, ErrorHandler, RateLimiter, RateLimiterConfig};
use serde::{ser::SerializeMap, Deserialize, Serialize};
use thiserror::Error;

/// The service name under which this deliverer's breaker, limiter, and
/// retry policy are keyed.
pub const SERVICE_NAME: &str = "webhook-sink";

/// Configuration for [`WebhookDeliverer`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    pub auth_token: Option<String>,
    pub rate_per_second: f64,
    /// Deliverer's own transient-retry budget. When an
    /// `ErrorHandler` retry policy for [`ErrorCategory::Delivery`] is also
    /// configured, this field — not the handler's — is authoritative for
    /// the webhook's own backoff loop; see `DESIGN.md`.
    pub max_retries: u32,
    pub initial_retry_delay: Duration,
    pub max_retry_delay: Duration,
    pub backoff_factor: f64,
    pub batch_size: usize,
    pub timeout: Duration,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            auth_token: None,
            rate_per_second: 10.0,
            max_retries: 3,
            initial_retry_delay: Duration::from_secs(1),
            max_retry_delay: Duration::from_secs(8),
            backoff_factor: 2.0,
            batch_size: 50,
            timeout: Duration::from_secs(10),
        }
    }
}

/// An item plus the content-type tag the Classifier assigned it, wrapped
/// in a one-element list at serialization time since the downstream sink's
/// schema is list-valued.
#[derive(Debug, Clone)]
pub struct DeliverableItem {
    pub item: Item,
    pub content_type: ContentType,
}

impl Serialize for DeliverableItem {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut value = serde_json::to_value(&self.item).map_err(serde::ser::Error::custom)?;
        let object = value
            .as_object_mut()
            .ok_or_else(|| serde::ser::Error::custom("item did not serialize to an object"))?;
        object.insert(
            "content_type".to_string(),
            serde_json::Value::Array(vec![serde_json::Value::String(self.content_type.to_string())]),
        );

        let mut map = serializer.serialize_map(Some(object.len()))?;
        for (key, val) in object {
            map.serialize_entry(key, val)?;
        }
        map.end()
    }
}

/// A bounded group of items assembled at drain time for one delivery
/// attempt.
#[derive(Debug, Clone)]
pub struct DeliveryBatch {
    pub batch_id: String,
    pub created_at: DateTime<Utc>,
    pub items: Vec<DeliverableItem>,
}

impl DeliveryBatch {
    #[must_use]
    pub fn new(batch_id: impl Into<String>, items: Vec<DeliverableItem>) -> Self {
        Self {
            batch_id: batch_id.into(),
            created_at: Utc::now(),
            items,
        }
    }
}

#[derive(Serialize)]
struct Envelope<'a> {
    batch_id: &'a str,
    timestamp: DateTime<Utc>,
    items: &'a [DeliverableItem],
}

/// The reason a delivery attempt ultimately failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryErrorKind {
    /// Batch or item shape failed validation; never retried.
    Validation,
    /// HTTP 4xx other than 429; terminal.
    Client,
    /// HTTP 5xx after retries exhausted.
    Server,
    /// HTTP 429 after retries exhausted.
    RateLimit,
    /// Connect/read failure after retries exhausted.
    Network,
    /// The service's breaker was open; never attempted.
    CircuitOpen,
}

/// Outcome of one [`WebhookDeliverer::deliver`] call.
#[derive(Debug, Clone)]
pub struct DeliveryResponse {
    pub success: bool,
    pub status_code: Option<u16>,
    pub retry_count: u32,
    pub error_kind: Option<DeliveryErrorKind>,
    pub duration: Duration,
}

#[derive(Debug, Error)]
enum ValidationFailure {
    #[error("batch is empty")]
    Empty,
    #[error("batch has {0} items, exceeds batch_size {1}")]
    TooLarge(usize, usize),
    #[error("item {0} is not well-formed")]
    MalformedItem(String),
}

enum SendOutcome {
    Success(u16),
    Transient { status: Option<u16>, retry_after: Option<Duration> },
    Permanent(u16),
}

/// Batches, signs, and POSTs items to a downstream HTTP webhook sink.
pub struct WebhookDeliverer {
    http: reqwest::Client,
    config: WebhookConfig,
    rate_limiter: Arc<RateLimiter>,
    error_handler: Arc<ErrorHandler>,
    service: ServiceName,
}

impl WebhookDeliverer {
    #[must_use]
    pub fn new(config: WebhookConfig, error_handler: Arc<ErrorHandler>) -> Self {
        let service = ServiceName::new(SERVICE_NAME);
        let rate_limiter = Arc::new(RateLimiter::new(RateLimiterConfig {
            rate_per_second: config.rate_per_second,
            burst: 1,
        }));
        Self {
            http: reqwest::Client::new(),
            config,
            rate_limiter,
            error_handler,
            service,
        }
    }

    /// Validate a batch in isolation — used by tests and by the
    /// orchestrator before attempting assembly.
    #[must_use]
    pub fn validate_content_type(content_type: ContentType) -> bool {
        ContentType::ALL.contains(&content_type)
    }

    fn validate(&self, batch: &DeliveryBatch) -> Option<ValidationFailure> {
        if batch.items.is_empty() {
            return Some(ValidationFailure::Empty);
        }
        if batch.items.len() > self.config.batch_size {
            return Some(ValidationFailure::TooLarge(batch.items.len(), self.config.batch_size));
        }
        for deliverable in &batch.items {
            if !deliverable.item.is_well_formed() || deliverable.item.title.is_empty() {
                return Some(ValidationFailure::MalformedItem(deliverable.item.source_id.clone()));
            }
        }
        None
    }

    async fn send_once(&self, batch: &DeliveryBatch) -> SendOutcome {
        let envelope = Envelope {
            batch_id: &batch.batch_id,
            timestamp: batch.created_at,
            items: &batch.items,
        };

        let mut request = self.http.post(&self.config.url).json(&envelope);
        if let Some(token) = &self.config.auth_token {
            request = request.bearer_auth(token);
        }

        let response = match tokio::time::timeout(self.config.timeout, request.send()).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) | Err(_) => {
                return SendOutcome::Transient {
                    status: None,
                    retry_after: None,
                }
            }
        };

        let status = response.status();
        if status.is_success() {
            return SendOutcome::Success(status.as_u16());
        }

        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.parse::<u64>().ok())
                .map(Duration::from_secs);
            return SendOutcome::Transient {
                status: Some(429),
                retry_after,
            };
        }

        if status.is_server_error() {
            return SendOutcome::Transient {
                status: Some(status.as_u16()),
                retry_after: None,
            };
        }

        SendOutcome::Permanent(status.as_u16())
    }

    /// Validate, rate-limit, POST, and retry `batch`.
    pub async fn deliver(&self, batch: DeliveryBatch) -> DeliveryResponse {
        let start = std::time::Instant::now();

        if let Some(failure) = self.validate(&batch) {
            delivered!(level = WARN, batch_id = %batch.batch_id, reason = %failure, "batch failed validation");
            feedcore_metrics::registry().incr("errors_total", ErrorCategory::Validation.as_str());
            return DeliveryResponse {
                success: false,
                status_code: None,
                retry_count: 0,
                error_kind: Some(DeliveryErrorKind::Validation),
                duration: start.elapsed(),
            };
        }

        let mut attempt = 0;
        loop {
            if !self.error_handler.can_proceed(&self.service) {
                feedcore_metrics::registry().incr("webhook_attempts", "circuit_open");
                return DeliveryResponse {
                    success: false,
                    status_code: None,
                    retry_count: attempt,
                    error_kind: Some(DeliveryErrorKind::CircuitOpen),
                    duration: start.elapsed(),
                };
            }

            let wait = self.rate_limiter.wait(1).await;
            feedcore_metrics::registry().observe("rate_limit_wait_seconds", "webhook", wait.as_secs_f64());

            match self.send_once(&batch).await {
                SendOutcome::Success(status) => {
                    self.error_handler.record_success(&self.service);
                    feedcore_metrics::registry().incr("webhook_attempts", "2xx");
                    feedcore_metrics::registry().observe("webhook_latency_seconds", "", start.elapsed().as_secs_f64());
                    feedcore_metrics::registry().add("webhook_retries", "", u64::from(attempt));
                    return DeliveryResponse {
                        success: true,
                        status_code: Some(status),
                        retry_count: attempt,
                        error_kind: None,
                        duration: start.elapsed(),
                    };
                }
                SendOutcome::Permanent(status) => {
                    self.error_handler.record_failure(&self.service);
                    feedcore_metrics::registry().incr("webhook_attempts", "4xx");
                    feedcore_metrics::registry().incr("errors_total", ErrorCategory::Client.as_str());
                    return DeliveryResponse {
                        success: false,
                        status_code: Some(status),
                        retry_count: attempt,
                        error_kind: Some(DeliveryErrorKind::Client),
                        duration: start.elapsed(),
                    };
                }
                SendOutcome::Transient { status, retry_after } => {
                    let label = match status {
                        Some(429) => "429",
                        Some(s) if (500..600).contains(&s) => "5xx",
                        _ => "network_error",
                    };
                    feedcore_metrics::registry().incr("webhook_attempts", label);

                    if attempt >= self.config.max_retries {
                        self.error_handler.record_failure(&self.service);
                        let kind = match status {
                            Some(429) => DeliveryErrorKind::RateLimit,
                            Some(_) => DeliveryErrorKind::Server,
                            None => DeliveryErrorKind::Network,
                        };
                        let category = match kind {
                            DeliveryErrorKind::RateLimit => ErrorCategory::RateLimit,
                            DeliveryErrorKind::Network => ErrorCategory::Network,
                            _ => ErrorCategory::Delivery,
                        };
                        feedcore_metrics::registry().incr("errors_total", category.as_str());
                        return DeliveryResponse {
                            success: false,
                            status_code: status,
                            retry_count: attempt,
                            error_kind: Some(kind),
                            duration: start.elapsed(),
                        };
                    }

                    let delay = retry_after.unwrap_or_else(|| {
                        backoff::exponential(
                            self.config.initial_retry_delay,
                            self.config.backoff_factor,
                            attempt,
                            self.config.max_retry_delay,
                        )
                    });
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Wraps a classified item for delivery; used by the orchestrator when
/// assembling a [`DeliveryBatch`] from dequeued queue items.
#[must_use]
pub fn wrap_for_delivery(item: Item, config: &ClassifierConfig) -> DeliverableItem {
    let (content_type, _priority) = feedcore_classifier::classify(&item, config);
    DeliverableItem { item, content_type }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn item(source_id: &str) -> Item {
        Item {
            source_id: source_id.to_string(),
            title: "title".to_string(),
            brief: "brief".to_string(),
            url: "https://example.com/a".to_string(),
            published_at: Utc::now(),
            author: None,
            tags: vec![],
            signals: serde_json::Map::new(),
        }
    }

    fn deliverable(source_id: &str) -> DeliverableItem {
        DeliverableItem {
            item: item(source_id),
            content_type: ContentType::Blog,
        }
    }

    fn deliverer(url: String, config_overrides: impl FnOnce(&mut WebhookConfig)) -> WebhookDeliverer {
        let mut config = WebhookConfig {
            url,
            rate_per_second: 1000.0,
            initial_retry_delay: Duration::from_millis(10),
            max_retry_delay: Duration::from_millis(80),
            timeout: Duration::from_secs(5),
            ..WebhookConfig::default()
        };
        config_overrides(&mut config);
        WebhookDeliverer::new(config, Arc::new(ErrorHandler::new()))
    }

    #[tokio::test]
    async fn successful_delivery_reports_status_and_zero_retries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;

        let deliverer = deliverer(server.uri(), |_| {});
        let batch = DeliveryBatch::new("b1", vec![deliverable("i1")]);
        let response = deliverer.deliver(batch).await;

        assert!(response.success);
        assert_eq!(response.status_code, Some(202));
        assert_eq!(response.retry_count, 0);
    }

    #[tokio::test]
    async fn empty_batch_fails_validation_without_sending() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let deliverer = deliverer(server.uri(), |_| {});
        let batch = DeliveryBatch::new("b1", vec![]);
        let response = deliverer.deliver(batch).await;

        assert!(!response.success);
        assert_eq!(response.error_kind, Some(DeliveryErrorKind::Validation));
    }

    #[tokio::test]
    async fn permanent_client_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400))
            .expect(1)
            .mount(&server)
            .await;

        let deliverer = deliverer(server.uri(), |_| {});
        let batch = DeliveryBatch::new("b1", vec![deliverable("i1")]);
        let response = deliverer.deliver(batch).await;

        assert!(!response.success);
        assert_eq!(response.error_kind, Some(DeliveryErrorKind::Client));
        assert_eq!(response.retry_count, 0);
    }

    #[tokio::test]
    async fn scenario_d_retries_server_errors_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(3)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let deliverer = deliverer(server.uri(), |cfg| cfg.max_retries = 3);
        let batch = DeliveryBatch::new("b1", vec![deliverable("i1")]);
        let response = deliverer.deliver(batch).await;

        assert!(response.success);
        assert_eq!(response.retry_count, 3);
    }

    #[tokio::test]
    async fn retries_exhausted_returns_terminal_server_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let deliverer = deliverer(server.uri(), |cfg| cfg.max_retries = 2);
        let batch = DeliveryBatch::new("b1", vec![deliverable("i1")]);
        let response = deliverer.deliver(batch).await;

        assert!(!response.success);
        assert_eq!(response.retry_count, 2);
        assert_eq!(response.error_kind, Some(DeliveryErrorKind::Server));
    }

    #[tokio::test]
    async fn retry_after_header_is_honored_over_backoff_schedule() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let deliverer = deliverer(server.uri(), |cfg| cfg.max_retries = 1);
        let batch = DeliveryBatch::new("b1", vec![deliverable("i1")]);
        let response = deliverer.deliver(batch).await;

        assert!(response.success);
        assert_eq!(response.retry_count, 1);
    }

    #[test]
    fn deliverable_item_serializes_content_type_as_list() {
        let deliverable = deliverable("i1");
        let value = serde_json::to_value(&deliverable).unwrap();
        assert_eq!(value["content_type"], serde_json::json!(["BLOG"]));
        assert_eq!(value["source_id"], serde_json::json!("i1"));
    }
}
