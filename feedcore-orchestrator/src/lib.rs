//! Pipeline orchestration: fetch loop + drain loop.
//!
//! `Orchestrator` owns no HTTP connections of its own — it wires together an
//! already-constructed [`SourceClient`], [`WebhookDeliverer`], and
//! [`PriorityQueue`], and drives them on two independent timers until a
//! [`Signal::Shutdown`] is observed, structured as an independent
//! scan/process split.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use feedcore_classifier::ClassifierConfig;
use feedcore_common::{Priority, ServiceName, Signal, SystemClock};
use feedcore_delivery::{wrap_for_delivery, DeliveryBatch, DeliveryErrorKind, WebhookDeliverer};
use feedcore_queue::{EnqueueOutcome, PriorityQueue, QueueItem, RejectReason};
use feedcore_resilience::ErrorHandler;
use feedcore_source::{SourceClient, SourceError};
use feedcore_tracing::traced;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Configuration for [`Orchestrator`]'s fetch and drain loops.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// How often the fetch loop pages the Source Client (default: 60s).
    #[serde(default = "default_fetch_interval")]
    pub fetch_interval: Duration,

    /// How often the drain loop wakes to check the queue.
    #[serde(default = "default_drain_interval")]
    pub drain_interval: Duration,

    /// Max items dequeued into one `DeliveryBatch`.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Items whose `retry_count` exceeds this after a transient failure are
    /// dropped permanently rather than requeued.
    #[serde(default = "default_max_retries_global")]
    pub max_retries_global: u32,
}

const fn default_fetch_interval() -> Duration {
    Duration::from_secs(60)
}

const fn default_drain_interval() -> Duration {
    Duration::from_secs(10)
}

const fn default_batch_size() -> usize {
    50
}

const fn default_max_retries_global() -> u32 {
    5
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            fetch_interval: default_fetch_interval(),
            drain_interval: default_drain_interval(),
            batch_size: default_batch_size(),
            max_retries_global: default_max_retries_global(),
        }
    }
}

fn queue_label(priority: Priority) -> &'static str {
    match priority {
        Priority::Low => "low",
        Priority::Normal => "normal",
        Priority::High => "high",
    }
}

fn breaker_gauge(state: feedcore_resilience::BreakerState) -> u64 {
    match state {
        feedcore_resilience::BreakerState::Closed => 0,
        feedcore_resilience::BreakerState::HalfOpen => 1,
        feedcore_resilience::BreakerState::Open { .. } => 2,
    }
}

fn generate_batch_id() -> String {
    format!("{}-{:06x}", Utc::now().timestamp_micros(), rand::random::<u32>() & 0xFF_FFFF)
}

/// Owns the pipeline's long-lived collaborators and drives the fetch/drain
/// loops.
pub struct Orchestrator {
    source: SourceClient,
    deliverer: WebhookDeliverer,
    queue: Arc<PriorityQueue<SystemClock>>,
    classifier_config: ClassifierConfig,
    error_handler: Arc<ErrorHandler>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    /// Wire together an already-constructed Source Client, Webhook
    /// Deliverer, and Priority Queue. `error_handler` must be the same
    /// instance both collaborators were built with, so breaker-state
    /// gauges reflect reality.
    #[must_use]
    pub fn new(
        source: SourceClient,
        deliverer: WebhookDeliverer,
        queue: Arc<PriorityQueue<SystemClock>>,
        classifier_config: ClassifierConfig,
        error_handler: Arc<ErrorHandler>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            source,
            deliverer,
            queue,
            classifier_config,
            error_handler,
            config,
        }
    }

    /// Current total queue size, for the health server's readiness check.
    #[must_use]
    pub fn queue_size(&self) -> usize {
        self.queue.size()
    }

    fn record_queue_gauges(&self) {
        for priority in [Priority::Low, Priority::Normal, Priority::High] {
            feedcore_metrics::registry().set_gauge(
                "queue_size",
                queue_label(priority),
                self.queue.size_at(priority) as u64,
            );
            feedcore_metrics::registry().set_gauge(
                "queue_overflows",
                queue_label(priority),
                self.queue.overflows().get(priority),
            );
        }
        feedcore_metrics::registry().set_gauge(
            "circuit_breaker_state",
            feedcore_source::SERVICE_NAME,
            breaker_gauge(self.error_handler.breaker_state(&ServiceName::new(feedcore_source::SERVICE_NAME))),
        );
        feedcore_metrics::registry().set_gauge(
            "circuit_breaker_state",
            feedcore_delivery::SERVICE_NAME,
            breaker_gauge(self.error_handler.breaker_state(&ServiceName::new(feedcore_delivery::SERVICE_NAME))),
        );
    }

    /// Page through the Source Client until it returns no continuation
    /// token, classifying and enqueuing each item. Stops early on any
    /// `SourceError` — the next `fetch_interval` tick will pick up where
    /// the upstream API's own continuation state left off.
    #[traced(instrument(level = tracing::Level::DEBUG, skip_all))]
    async fn fetch_once(&self) {
        let mut continuation: Option<String> = None;

        loop {
            match self.source.fetch_batch(continuation.as_deref()).await {
                Ok(page) => {
                    let fetched = page.items.len();
                    for item in page.items {
                        let (_, priority) = feedcore_classifier::classify(&item, &self.classifier_config);
                        match self.queue.enqueue(item, priority) {
                            EnqueueOutcome::Enqueued => {
                                feedcore_metrics::registry().incr("items_queued", "");
                            }
                            EnqueueOutcome::Rejected(RejectReason::Duplicate) => {
                                feedcore_metrics::registry().incr("items_dropped", "duplicate");
                            }
                            EnqueueOutcome::Rejected(RejectReason::Overflow) => {
                                feedcore_metrics::registry().incr("items_dropped", "overflow");
                            }
                        }
                    }
                    tracing::debug!(fetched, "fetch page processed");
                    self.record_queue_gauges();

                    continuation = page.continuation;
                    if continuation.is_none() {
                        break;
                    }
                }
                Err(SourceError::Authentication) => {
                    tracing::error!("source authentication rejected; ending fetch cycle");
                    break;
                }
                Err(SourceError::CircuitOpen(service)) => {
                    tracing::warn!(%service, "source circuit open; ending fetch cycle");
                    break;
                }
                Err(SourceError::Api(message)) => {
                    tracing::warn!(error = %message, "source fetch failed; ending fetch cycle");
                    break;
                }
            }
        }
    }

    /// Drain the queue in `batch_size` chunks until empty. Transient
    /// delivery failures requeue the whole batch at LOW priority with each
    /// item's `retry_count` incremented; items that exceed
    /// `max_retries_global` are dropped with a `delivery_exhausted` event.
    /// Permanent (validation/client) failures drop the batch with a
    /// `delivery_rejected` event.
    #[traced(instrument(level = tracing::Level::DEBUG, skip_all))]
    async fn drain_once(&self) {
        loop {
            let mut dequeued: Vec<QueueItem> = Vec::with_capacity(self.config.batch_size);
            for _ in 0..self.config.batch_size {
                let Some(queue_item) = self.queue.dequeue() else {
                    break;
                };
                dequeued.push(queue_item);
            }
            if dequeued.is_empty() {
                break;
            }

            let deliverables = dequeued
                .iter()
                .map(|queue_item| wrap_for_delivery(queue_item.item.clone(), &self.classifier_config))
                .collect();
            let batch = DeliveryBatch::new(generate_batch_id(), deliverables);
            let batch_size = dequeued.len();

            let response = self.deliverer.deliver(batch).await;
            self.record_queue_gauges();

            if response.success {
                continue;
            }

            match response.error_kind {
                Some(DeliveryErrorKind::Validation | DeliveryErrorKind::Client) => {
                    tracing::warn!(batch_size, kind = ?response.error_kind, "delivery_rejected");
                    feedcore_metrics::registry().add("items_dropped", "rejected", batch_size as u64);
                }
                _ => {
                    for mut queue_item in dequeued {
                        queue_item.retry_count += 1;
                        if queue_item.retry_count > self.config.max_retries_global {
                            tracing::warn!(
                                source_id = %queue_item.item.source_id,
                                retry_count = queue_item.retry_count,
                                "delivery_exhausted"
                            );
                            feedcore_metrics::registry().incr("items_dropped", "exhausted");
                            continue;
                        }
                        if !self.queue.requeue(queue_item, Priority::Low).is_enqueued() {
                            feedcore_metrics::registry().incr("items_dropped", "overflow");
                        }
                    }
                }
            }
        }
    }

    /// Run the fetch loop until `shutdown` fires. Returns after finishing
    /// any in-flight page.
    #[traced(instrument(level = tracing::Level::TRACE, skip_all))]
    pub async fn run_fetch_loop(&self, mut shutdown: broadcast::Receiver<Signal>) {
        let mut timer = tokio::time::interval(self.config.fetch_interval);
        timer.tick().await;

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    self.fetch_once().await;
                }
                signal = shutdown.recv() => {
                    match signal {
                        Ok(Signal::Shutdown | Signal::Finalised) => {
                            tracing::info!("fetch loop observed shutdown signal");
                            break;
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "fetch loop shutdown channel closed");
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Run the drain loop until `shutdown` fires. Returns after finishing
    /// any in-flight batch.
    #[traced(instrument(level = tracing::Level::TRACE, skip_all))]
    pub async fn run_drain_loop(&self, mut shutdown: broadcast::Receiver<Signal>) {
        let mut timer = tokio::time::interval(self.config.drain_interval);
        timer.tick().await;

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    self.drain_once().await;
                }
                signal = shutdown.recv() => {
                    match signal {
                        Ok(Signal::Shutdown | Signal::Finalised) => {
                            tracing::info!("drain loop observed shutdown signal");
                            break;
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "drain loop shutdown channel closed");
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Run fetch and drain loops concurrently until `shutdown` fires;
    /// returns once both have finished their current iteration (spec
    /// §4.7's "returns only after both loops have observed the flag").
    pub async fn serve(&self, shutdown: broadcast::Receiver<Signal>) {
        tokio::join!(self.run_fetch_loop(shutdown.resubscribe()), self.run_drain_loop(shutdown));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feedcore_common::Item;
    use feedcore_delivery::WebhookConfig;
    use feedcore_queue::DEFAULT_DEDUP_WINDOW;
    use feedcore_source::SourceConfig;
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

    fn orchestrator(source_uri: String, webhook_uri: String) -> Orchestrator {
        let error_handler = Arc::new(ErrorHandler::new());
        let source = SourceClient::new(
            SourceConfig {
                endpoint: source_uri,
                rate_per_second: 1000.0,
                ..SourceConfig::default()
            },
            error_handler.clone(),
        );
        let deliverer = WebhookDeliverer::new(
            WebhookConfig {
                url: webhook_uri,
                rate_per_second: 1000.0,
                ..WebhookConfig::default()
            },
            error_handler.clone(),
        );
        let queue = Arc::new(PriorityQueue::with_dedup_window(1000, DEFAULT_DEDUP_WINDOW));
        Orchestrator::new(
            source,
            deliverer,
            queue,
            ClassifierConfig::default(),
            error_handler,
            OrchestratorConfig::default(),
        )
    }

    #[tokio::test]
    async fn fetch_once_enqueues_a_full_page() {
        let source_server = MockServer::start().await;
        let body = serde_json::json!({
            "items": [{
                "id": "a",
                "title": "t",
                "summary": {"content": "brief"},
                "canonical": [{"href": "https://example.com/a"}],
                "published": 1_700_000_000,
            }],
        });
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&source_server)
            .await;

        let orchestrator = orchestrator(format!("{}/stream", source_server.uri()), String::new());
        orchestrator.fetch_once().await;
        assert_eq!(orchestrator.queue_size(), 1);
    }

    #[tokio::test]
    async fn drain_once_delivers_and_empties_queue() {
        let webhook_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&webhook_server)
            .await;

        let orchestrator = orchestrator(String::new(), webhook_server.uri());
        assert!(orchestrator.queue.enqueue(item("a"), Priority::Normal).is_enqueued());

        orchestrator.drain_once().await;
        assert_eq!(orchestrator.queue_size(), 0);
    }

    #[tokio::test]
    async fn transient_delivery_failure_requeues_at_low_with_incremented_retry_count() {
        let webhook_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&webhook_server)
            .await;

        let orchestrator = orchestrator(String::new(), webhook_server.uri());
        assert!(orchestrator.queue.enqueue(item("a"), Priority::High).is_enqueued());

        orchestrator.drain_once().await;

        assert_eq!(orchestrator.queue_size(), 1);
        let requeued = orchestrator.queue.dequeue().unwrap();
        assert_eq!(requeued.priority, Priority::Low);
        assert_eq!(requeued.retry_count, 1);
    }

    #[tokio::test]
    async fn items_exceeding_max_retries_global_are_dropped_not_requeued() {
        let webhook_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&webhook_server)
            .await;

        let mut orchestrator = orchestrator(String::new(), webhook_server.uri());
        orchestrator.config.max_retries_global = 0;
        assert!(orchestrator.queue.enqueue(item("a"), Priority::High).is_enqueued());

        orchestrator.drain_once().await;
        assert!(orchestrator.queue.is_empty());
    }

    #[tokio::test]
    async fn permanent_delivery_failure_drops_without_requeue() {
        let webhook_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400))
            .mount(&webhook_server)
            .await;

        let orchestrator = orchestrator(String::new(), webhook_server.uri());
        assert!(orchestrator.queue.enqueue(item("a"), Priority::Normal).is_enqueued());

        orchestrator.drain_once().await;
        assert!(orchestrator.queue.is_empty());
    }
}
