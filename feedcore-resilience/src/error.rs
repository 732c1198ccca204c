//! Error classification, bounded history, and retry-driving error handler.
//!
//! The Error Handler is the single seam every outbound call (Source Client,
//! Webhook Deliverer) goes through. It categorizes the failure, redacts
//! sensitive text, records bounded history, consults the service's circuit
//! breaker, and optionally drives a caller-supplied retry closure with
//! jittered exponential backoff.

use std::{collections::VecDeque, future::Future, sync::Arc};

use chrono::{DateTime, Utc};
use feedcore_common::{redact::redact, ServiceName};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{
    backoff,
    circuit_breaker::{BreakerState, CircuitBreakerConfig, CircuitBreakerRegistry},
    retry_policy::RetryPolicy,
};

/// Error taxonomy, spanning both the `ErrorContext` categories and the
/// broader classification used to decide retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Upstream reader API error.
    Api,
    /// HTTP 429 or client-side rate limiting.
    RateLimit,
    /// Connect/read timeout, DNS failure.
    Network,
    /// HTTP 5xx.
    Server,
    /// HTTP 4xx other than 429/401/403; terminal.
    Client,
    /// Bearer token rejected; never retried.
    Authentication,
    /// Webhook sink delivery failure.
    Delivery,
    /// Internal invariant violations while classifying or transforming.
    Processing,
    /// Payload fails schema; caller's fault; never retried.
    Validation,
    /// Unexpected internal faults.
    System,
}

impl ErrorCategory {
    /// All variants, for iterating counters.
    pub const ALL: [Self; 10] = [
        Self::Api,
        Self::RateLimit,
        Self::Network,
        Self::Server,
        Self::Client,
        Self::Authentication,
        Self::Delivery,
        Self::Processing,
        Self::Validation,
        Self::System,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Api => "api",
            Self::RateLimit => "rate_limit",
            Self::Network => "network",
            Self::Server => "server",
            Self::Client => "client",
            Self::Authentication => "authentication",
            Self::Delivery => "delivery",
            Self::Processing => "processing",
            Self::Validation => "validation",
            Self::System => "system",
        }
    }
}

/// Severity, driving both the log level and whether the notify hook fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// An immutable record of one handled error, appended to the bounded ring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Time-plus-random-suffix identifier, unique enough for log correlation.
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    /// The error message with `api_key=`/`token=`/`password=` substrings
    /// redacted.
    pub redacted_message: String,
    pub details: Option<String>,
    pub service: ServiceName,
    pub retry_count: u32,
    pub max_retries: u32,
}

impl ErrorContext {
    fn new(
        category: ErrorCategory,
        severity: ErrorSeverity,
        message: &str,
        details: Option<String>,
        service: ServiceName,
        max_retries: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: format!("{}-{:06x}", now.timestamp_micros(), rand::random::<u32>() & 0xFF_FFFF),
            timestamp: now,
            category,
            severity,
            redacted_message: redact(message),
            details,
            service,
            retry_count: 0,
            max_retries,
        }
    }
}

/// Invoked on `Critical` severity. The default implementation only logs.
pub trait NotifyHook: Send + Sync + std::fmt::Debug {
    fn notify(&self, context: &ErrorContext);
}

#[derive(Debug, Default)]
pub struct LoggingNotifyHook;

impl NotifyHook for LoggingNotifyHook {
    fn notify(&self, context: &ErrorContext) {
        tracing::error!(
            error_id = %context.id,
            service = %context.service,
            "notify_team hook: critical error"
        );
    }
}

/// Per-service knobs: breaker thresholds plus retry budgets by category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceErrorConfig {
    pub breaker: CircuitBreakerConfig,
    pub retry_policy: RetryPolicy,
}

impl Default for ServiceErrorConfig {
    fn default() -> Self {
        Self {
            breaker: CircuitBreakerConfig::default(),
            retry_policy: RetryPolicy::default(),
        }
    }
}

/// Outcome surfaced to a caller of [`ErrorHandler::handle`] once retries (if
/// any) are exhausted.
#[derive(Debug, thiserror::Error)]
pub enum HandledError<E: std::fmt::Display + std::fmt::Debug> {
    /// The service's breaker is open; the call was never attempted.
    #[error("circuit open for service {0}")]
    CircuitOpen(ServiceName),
    /// Retries (if any) were exhausted, or no retry closure was supplied;
    /// this is the original/last error.
    #[error("{0}")]
    Original(E),
}

/// Bounded history, category counters, per-service breakers and retry
/// policy, and the single seam every outbound call is routed through.
#[derive(Debug)]
pub struct ErrorHandler {
    breakers: CircuitBreakerRegistry,
    service_configs: dashmap::DashMap<ServiceName, ServiceErrorConfig>,
    default_config: ServiceErrorConfig,
    history: Mutex<VecDeque<ErrorContext>>,
    history_capacity: usize,
    category_counts: dashmap::DashMap<ErrorCategory, std::sync::atomic::AtomicU64>,
    notify_hook: Arc<dyn NotifyHook>,
    backoff_base: Duration,
    backoff_cap: Duration,
}

impl ErrorHandler {
    /// Create a handler with the default bounded history size (100 entries)
    /// and a logging-only notify hook.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(100)
    }

    /// Create a handler with an explicit history ring capacity (must be
    /// ≥1).
    #[must_use]
    pub fn with_capacity(history_capacity: usize) -> Self {
        Self {
            breakers: CircuitBreakerRegistry::new(CircuitBreakerConfig::default()),
            service_configs: dashmap::DashMap::new(),
            default_config: ServiceErrorConfig::default(),
            history: Mutex::new(VecDeque::with_capacity(history_capacity.max(1))),
            history_capacity: history_capacity.max(1),
            category_counts: dashmap::DashMap::new(),
            notify_hook: Arc::new(LoggingNotifyHook),
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(60),
        }
    }

    /// Replace the notify hook (default just logs).
    #[must_use]
    pub fn with_notify_hook(mut self, hook: Arc<dyn NotifyHook>) -> Self {
        self.notify_hook = hook;
        self
    }

    /// Configure breaker thresholds and retry budgets for a specific
    /// service, creating its breaker eagerly.
    pub fn configure_service(&self, service: &ServiceName, config: ServiceErrorConfig) {
        self.breakers.configure(service, config.breaker);
        self.service_configs.insert(service.clone(), config);
    }

    fn config_for(&self, service: &ServiceName) -> ServiceErrorConfig {
        self.service_configs
            .get(service)
            .map(|entry| entry.clone())
            .unwrap_or_else(|| self.default_config.clone())
    }

    fn record_category(&self, category: ErrorCategory) {
        self.category_counts
            .entry(category)
            .or_default()
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }

    fn push_history(&self, context: ErrorContext) {
        let mut history = self.history.lock();
        if history.len() >= self.history_capacity {
            history.pop_front();
        }
        history.push_back(context);
    }

    /// Current breaker state for `service`, for the
    /// `circuit_breaker_state{service}` metric.
    #[must_use]
    pub fn breaker_state(&self, service: &ServiceName) -> BreakerState {
        self.breakers.state(service)
    }

    /// Whether `service`'s breaker currently allows a call. Exposed for
    /// callers (the Webhook Deliverer) that drive their own retry loop
    /// instead of going through [`Self::handle`]'s.
    #[must_use]
    pub fn can_proceed(&self, service: &ServiceName) -> bool {
        self.breakers.can_proceed(service)
    }

    /// Record a successful call against `service`'s breaker, bypassing
    /// `handle`'s error-context bookkeeping.
    pub fn record_success(&self, service: &ServiceName) {
        self.breakers.record_success(service);
    }

    /// Record a failed call against `service`'s breaker, bypassing
    /// `handle`'s error-context bookkeeping.
    pub fn record_failure(&self, service: &ServiceName) {
        self.breakers.record_failure(service);
    }

    /// Current count of errors recorded for `category`.
    #[must_use]
    pub fn category_count(&self, category: ErrorCategory) -> u64 {
        self.category_counts
            .get(&category)
            .map_or(0, |c| c.load(std::sync::atomic::Ordering::Relaxed))
    }

    /// Number of entries currently in the bounded history ring.
    #[must_use]
    pub fn history_len(&self) -> usize {
        self.history.lock().len()
    }

    /// Snapshot of the bounded history, most recent last.
    #[must_use]
    pub fn history_snapshot(&self) -> Vec<ErrorContext> {
        self.history.lock().iter().cloned().collect()
    }

    /// Handle `error`: build and record an `ErrorContext`, consult the
    /// breaker, and — if `retry_fn` is supplied — retry with jittered
    /// backoff up to the service/category's retry budget.
    ///
    /// # Errors
    ///
    /// Returns [`HandledError::CircuitOpen`] if the breaker rejects the
    /// call, or [`HandledError::Original`] once retries (if any) are
    /// exhausted.
    pub async fn handle<T, E, F, Fut>(
        &self,
        error: E,
        category: ErrorCategory,
        severity: ErrorSeverity,
        service: &ServiceName,
        details: Option<String>,
        retry_fn: Option<F>,
    ) -> Result<T, HandledError<E>>
    where
        E: std::fmt::Display + std::fmt::Debug,
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let config = self.config_for(service);
        let max_retries = config.retry_policy.max_retries(category);

        let context = ErrorContext::new(
            category,
            severity,
            &error.to_string(),
            details,
            service.clone(),
            max_retries,
        );
        self.record_category(category);
        self.push_history(context.clone());

        match severity {
            ErrorSeverity::Critical => {
                tracing::error!(error_id = %context.id, service = %service, category = %category.as_str(), "critical error");
                self.notify_hook.notify(&context);
            }
            ErrorSeverity::High => {
                tracing::error!(error_id = %context.id, service = %service, category = %category.as_str(), message = %context.redacted_message, "error");
            }
            ErrorSeverity::Medium => {
                tracing::warn!(error_id = %context.id, service = %service, category = %category.as_str(), message = %context.redacted_message, "warning");
            }
            ErrorSeverity::Low => {
                tracing::info!(error_id = %context.id, service = %service, category = %category.as_str(), message = %context.redacted_message, "info");
            }
        }

        if !self.breakers.can_proceed(service) {
            let mut history = self.history.lock();
            history.pop_back();
            drop(history);
            return Err(HandledError::CircuitOpen(service.clone()));
        }

        let Some(retry_fn) = retry_fn else {
            self.breakers.record_failure(service);
            return Err(HandledError::Original(error));
        };

        let mut last_error = error;
        for attempt in 0..max_retries {
            let delay = backoff::jittered(self.backoff_base, attempt, self.backoff_cap);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            match retry_fn().await {
                Ok(value) => {
                    self.breakers.record_success(service);
                    return Ok(value);
                }
                Err(e) => {
                    let mut history = self.history.lock();
                    if let Some(last) = history.back_mut() {
                        last.retry_count += 1;
                    }
                    drop(history);
                    last_error = e;
                }
            }
        }

        self.breakers.record_failure(service);
        Err(HandledError::Original(last_error))
    }
}

impl Default for ErrorHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
