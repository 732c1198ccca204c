//! HTTP client for the upstream feed-reading service.
//!
//! `SourceClient` is a thin translator: it pages through the reader API's
//! stream-contents endpoint and turns the raw JSON shape into normalized
//! [`Item`] records. Every outbound call is gated by a per-endpoint rate
//! limiter and routed through the shared [`ErrorHandler`].

use std::time::Duration;

use chrono::{DateTime, Utc};
use feedcore_common::{fetched, Item, ServiceName};
use feedcore_resilience::{ErrorCategory, ErrorHandler, ErrorSeverity, HandledError, RateLimiterConfig};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// The service name under which this client's breaker, limiter, and retry
/// policy are keyed.
pub const SERVICE_NAME: &str = "source-reader";

/// Configuration for [`SourceClient`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Base URL of the stream-contents endpoint.
    pub endpoint: String,
    pub auth_token: Option<String>,
    /// Tokens per second; defaults to 5 (a 200ms minimum interval).
    pub rate_per_second: f64,
    pub page_size: u32,
    pub timeout: Duration,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            auth_token: None,
            rate_per_second: 5.0,
            page_size: 50,
            timeout: Duration::from_secs(10),
        }
    }
}

/// One page of normalized items, with an optional continuation token for
/// the next page.
#[derive(Debug, Clone)]
pub struct FetchPage {
    pub items: Vec<Item>,
    pub continuation: Option<String>,
}

/// Terminal failure surfaced to the orchestrator once retries (if any) are
/// exhausted.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("authentication rejected by upstream reader API")]
    Authentication,
    #[error("upstream reader API rejected the request: {0}")]
    Api(String),
    #[error("circuit open for {0}")]
    CircuitOpen(ServiceName),
}

#[derive(Debug, Error)]
enum AttemptError {
    #[error("authentication rejected (status {0})")]
    Authentication(u16),
    #[error("rate limited by upstream")]
    RateLimited,
    #[error("network error: {0}")]
    Network(String),
    #[error("upstream returned status {0}")]
    Status(u16),
    #[error("malformed response: {0}")]
    Malformed(String),
}

#[derive(Debug, Default, Deserialize)]
struct RawSummary {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct RawLink {
    href: String,
}

#[derive(Debug, Deserialize)]
struct RawTag {
    label: String,
}

#[derive(Debug, Deserialize)]
struct RawItem {
    id: String,
    title: String,
    #[serde(default)]
    summary: RawSummary,
    #[serde(default)]
    canonical: Vec<RawLink>,
    published: i64,
    author: Option<String>,
    #[serde(default)]
    tags: Vec<RawTag>,
    /// Anything else the reader API attaches (`categories`, engagement
    /// counts, ...) passes through untouched as Classifier signals.
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RawPage {
    items: Vec<RawItem>,
    continuation: Option<String>,
}

fn into_item(raw: RawItem) -> Result<Item, AttemptError> {
    let url = raw
        .canonical
        .into_iter()
        .next()
        .map(|link| link.href)
        .ok_or_else(|| AttemptError::Malformed(format!("item {} has no canonical link", raw.id)))?;

    let published_at = DateTime::from_timestamp(raw.published, 0)
        .ok_or_else(|| AttemptError::Malformed(format!("item {} has an invalid timestamp", raw.id)))?;

    Ok(Item {
        source_id: raw.id,
        title: raw.title,
        brief: raw.summary.content,
        url,
        published_at,
        author: Some(raw.author.unwrap_or_default()),
        tags: raw.tags.into_iter().map(|t| t.label).collect(),
        signals: raw.extra,
    })
}

/// Fetches and normalizes pages of items from the upstream reader API.
pub struct SourceClient {
    http: reqwest::Client,
    config: SourceConfig,
    rate_limiter: Arc<feedcore_resilience::RateLimiter>,
    error_handler: Arc<ErrorHandler>,
    service: ServiceName,
}

impl SourceClient {
    #[must_use]
    pub fn new(config: SourceConfig, error_handler: Arc<ErrorHandler>) -> Self {
        let service = ServiceName::new(SERVICE_NAME);
        let rate_limiter = Arc::new(feedcore_resilience::RateLimiter::new(RateLimiterConfig {
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

    async fn attempt(&self, continuation: Option<&str>) -> Result<FetchPage, AttemptError> {
        let mut request = self
            .http
            .get(&self.config.endpoint)
            .query(&[("n", self.config.page_size.to_string())]);
        if let Some(continuation) = continuation {
            request = request.query(&[("c", continuation)]);
        }
        if let Some(token) = &self.config.auth_token {
            request = request.bearer_auth(token);
        }

        let response = tokio::time::timeout(self.config.timeout, request.send())
            .await
            .map_err(|_| AttemptError::Network("request timed out".to_string()))?
            .map_err(|e| AttemptError::Network(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(AttemptError::Authentication(status.as_u16()));
        }
        if status.as_u16() == 429 {
            return Err(AttemptError::RateLimited);
        }
        if !status.is_success() {
            return Err(AttemptError::Status(status.as_u16()));
        }

        let body: RawPage = response
            .json()
            .await
            .map_err(|e| AttemptError::Malformed(e.to_string()))?;

        let items = body
            .items
            .into_iter()
            .map(into_item)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(FetchPage {
            items,
            continuation: body.continuation,
        })
    }

    /// Fetch one page of items, following `continuation` when supplied.
    ///
    /// Authentication failures surface immediately, never retried. Rate
    /// limit and network errors are retried under the service's retry
    /// policy via the [`ErrorHandler`].
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] on authentication failure, circuit-open, or
    /// once retries are exhausted.
    pub async fn fetch_batch(&self, continuation: Option<&str>) -> Result<FetchPage, SourceError> {
        let wait = self.rate_limiter.wait(1).await;
        feedcore_metrics::registry().observe("rate_limit_wait_seconds", "source", wait.as_secs_f64());

        let continuation_owned = continuation.map(str::to_string);

        match self.attempt(continuation_owned.as_deref()).await {
            Ok(page) => {
                fetched!(
                    level = DEBUG,
                    fetched = page.items.len(),
                    continuation = page.continuation.is_some(),
                    "fetched page from upstream reader API"
                );
                feedcore_metrics::registry().add("items_fetched", "", page.items.len() as u64);
                Ok(page)
            }
            Err(AttemptError::Authentication(status)) => {
                let _ = self
                    .error_handler
                    .handle::<(), _, fn() -> std::future::Ready<Result<(), AttemptError>>, _>(
                        AttemptError::Authentication(status),
                        ErrorCategory::Authentication,
                        ErrorSeverity::High,
                        &self.service,
                        None,
                        None,
                    )
                    .await;
                feedcore_metrics::registry().incr("errors_total", ErrorCategory::Authentication.as_str());
                Err(SourceError::Authentication)
            }
            Err(first_error) => {
                let category = match &first_error {
                    AttemptError::RateLimited => ErrorCategory::RateLimit,
                    AttemptError::Network(_) => ErrorCategory::Network,
                    AttemptError::Status(_) | AttemptError::Malformed(_) => ErrorCategory::Api,
                    AttemptError::Authentication(_) => unreachable!(),
                };
                feedcore_metrics::registry().incr("errors_total", category.as_str());

                let result = self
                    .error_handler
                    .handle(
                        first_error,
                        category,
                        ErrorSeverity::Medium,
                        &self.service,
                        None,
                        Some(|| {
                            let continuation = continuation_owned.clone();
                            async move { self.attempt(continuation.as_deref()).await }
                        }),
                    )
                    .await;

                match result {
                    Ok(page) => {
                        feedcore_metrics::registry().add("items_fetched", "", page.items.len() as u64);
                        Ok(page)
                    }
                    Err(HandledError::CircuitOpen(service)) => Err(SourceError::CircuitOpen(service)),
                    Err(HandledError::Original(e)) => Err(SourceError::Api(e.to_string())),
                }
            }
        }
    }
}
