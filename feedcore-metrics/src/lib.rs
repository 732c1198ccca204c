//! Process-local counters and histograms for the ingestion/delivery
//! pipeline.
//!
//! No exposition format is in scope: this crate is a `DashMap`-backed
//! registry with a plain [`Registry::snapshot`] a caller (e.g. the health
//! server) can surface as JSON. Named metrics: `items_fetched`,
//! `items_queued`, `items_dropped{reason}`,
//! `queue_size{priority}`, `queue_overflows{priority}`,
//! `webhook_attempts{status}`, `webhook_latency_seconds`,
//! `webhook_retries`, `rate_limit_wait_seconds`,
//! `circuit_breaker_state{service}`, `errors_total{category}`.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde::Serialize;

/// A counter/histogram name together with its label value, e.g.
/// `("items_dropped", "duplicate")`. Unlabeled metrics use an empty label.
type Key = (&'static str, String);

#[derive(Debug, Default)]
struct HistogramData {
    count: AtomicU64,
    /// Sum of observed values in microseconds, for a cheap mean; spec scope
    /// doesn't call for quantile buckets.
    sum_micros: AtomicU64,
}

impl HistogramData {
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    fn observe(&self, seconds: f64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        let micros = (seconds * 1_000_000.0).round().max(0.0) as u64;
        self.sum_micros.fetch_add(micros, Ordering::Relaxed);
    }

    #[allow(clippy::cast_precision_loss)]
    fn snapshot(&self) -> HistogramSnapshot {
        let count = self.count.load(Ordering::Relaxed);
        let sum_micros = self.sum_micros.load(Ordering::Relaxed);
        HistogramSnapshot {
            count,
            mean_seconds: if count == 0 {
                0.0
            } else {
                (sum_micros as f64 / count as f64) / 1_000_000.0
            },
        }
    }
}

/// Snapshot of one histogram: observation count and mean, in seconds.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct HistogramSnapshot {
    pub count: u64,
    pub mean_seconds: f64,
}

/// The process-local registry. Access via [`registry()`].
#[derive(Debug, Default)]
pub struct Registry {
    counters: DashMap<Key, AtomicU64>,
    histograms: DashMap<Key, HistogramData>,
    gauges: DashMap<Key, AtomicU64>,
}

impl Registry {
    /// Increment `name{label}` (or `name` when `label` is empty) by 1.
    pub fn incr(&self, name: &'static str, label: impl Into<String>) {
        self.add(name, label, 1);
    }

    /// Add `n` to `name{label}`.
    pub fn add(&self, name: &'static str, label: impl Into<String>, n: u64) {
        self.counters
            .entry((name, label.into()))
            .or_default()
            .fetch_add(n, Ordering::Relaxed);
    }

    /// Current value of `name{label}`.
    #[must_use]
    pub fn get(&self, name: &'static str, label: impl Into<String>) -> u64 {
        self.counters
            .get(&(name, label.into()))
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    /// Set a gauge (e.g. `queue_size{priority}`) to an absolute value.
    pub fn set_gauge(&self, name: &'static str, label: impl Into<String>, value: u64) {
        self.gauges
            .entry((name, label.into()))
            .or_default()
            .store(value, Ordering::Relaxed);
    }

    /// Current gauge value.
    #[must_use]
    pub fn gauge(&self, name: &'static str, label: impl Into<String>) -> u64 {
        self.gauges
            .get(&(name, label.into()))
            .map_or(0, |g| g.load(Ordering::Relaxed))
    }

    /// Record one observation (in seconds) into a histogram, e.g.
    /// `webhook_latency_seconds`.
    pub fn observe(&self, name: &'static str, label: impl Into<String>, seconds: f64) {
        self.histograms
            .entry((name, label.into()))
            .or_default()
            .observe(seconds);
    }

    /// A point-in-time JSON-serializable snapshot of every counter, gauge,
    /// and histogram recorded so far. Intended for the health server's
    /// debug surface, not a Prometheus exposition format (out of scope).
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: self
                .counters
                .iter()
                .map(|entry| (label_key(entry.key()), entry.value().load(Ordering::Relaxed)))
                .collect(),
            gauges: self
                .gauges
                .iter()
                .map(|entry| (label_key(entry.key()), entry.value().load(Ordering::Relaxed)))
                .collect(),
            histograms: self
                .histograms
                .iter()
                .map(|entry| (label_key(entry.key()), entry.value().snapshot()))
                .collect(),
        }
    }
}

fn label_key(key: &Key) -> String {
    if key.1.is_empty() {
        key.0.to_string()
    } else {
        format!("{}{{{}}}", key.0, key.1)
    }
}

/// A serializable point-in-time snapshot of [`Registry`].
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub counters: Vec<(String, u64)>,
    pub gauges: Vec<(String, u64)>,
    pub histograms: Vec<(String, HistogramSnapshot)>,
}

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::default);

/// The global process-local metrics registry.
#[must_use]
pub fn registry() -> &'static Registry {
    &REGISTRY
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_accumulates() {
        let registry = Registry::default();
        registry.incr("items_fetched", "");
        registry.incr("items_fetched", "");
        assert_eq!(registry.get("items_fetched", ""), 2);
    }

    #[test]
    fn labeled_counters_are_independent() {
        let registry = Registry::default();
        registry.incr("items_dropped", "duplicate");
        registry.incr("items_dropped", "overflow");
        registry.incr("items_dropped", "overflow");
        assert_eq!(registry.get("items_dropped", "duplicate"), 1);
        assert_eq!(registry.get("items_dropped", "overflow"), 2);
    }

    #[test]
    fn gauge_overwrites_rather_than_accumulates() {
        let registry = Registry::default();
        registry.set_gauge("queue_size", "high", 5);
        registry.set_gauge("queue_size", "high", 3);
        assert_eq!(registry.gauge("queue_size", "high"), 3);
    }

    #[test]
    fn histogram_tracks_count_and_mean() {
        let registry = Registry::default();
        registry.observe("webhook_latency_seconds", "", 1.0);
        registry.observe("webhook_latency_seconds", "", 3.0);
        let snapshot = registry.snapshot();
        let (_, hist) = snapshot
            .histograms
            .iter()
            .find(|(k, _)| k == "webhook_latency_seconds")
            .unwrap();
        assert_eq!(hist.count, 2);
        assert!((hist.mean_seconds - 2.0).abs() < 1e-6);
    }

    #[test]
    fn snapshot_formats_labels() {
        let registry = Registry::default();
        registry.incr("errors_total", "network");
        let snapshot = registry.snapshot();
        assert!(snapshot
            .counters
            .iter()
            .any(|(k, v)| k == "errors_total{network}" && *v == 1));
    }
}
