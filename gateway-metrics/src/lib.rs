//! MetricsCollector (C15): Prometheus counters and histograms scraped at
//! `/metrics`, grounded in `ninelives-prometheus`'s register-at-construction
//! pattern.

use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use tracing::warn;

pub struct MetricsCollector {
    registry: Registry,
    requests_total: IntCounterVec,
    retries_total: IntCounterVec,
    fallbacks_total: IntCounterVec,
    cache_hits_total: IntCounterVec,
    cache_misses_total: IntCounterVec,
    latency_ms: HistogramVec,
    queue_wait_ms: HistogramVec,
}

impl MetricsCollector {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new("requests_total", "Requests processed"),
            &["status", "provider"],
        )?;
        let retries_total = IntCounterVec::new(
            Opts::new("retries_total", "Retry attempts issued"),
            &["provider", "classification"],
        )?;
        let fallbacks_total = IntCounterVec::new(
            Opts::new("fallbacks_total", "Fallback transitions"),
            &["from", "to"],
        )?;
        let cache_hits_total =
            IntCounterVec::new(Opts::new("cache_hits_total", "Cache hits"), &["provider"])?;
        let cache_misses_total =
            IntCounterVec::new(Opts::new("cache_misses_total", "Cache misses"), &["provider"])?;
        let latency_ms = HistogramVec::new(
            HistogramOpts::new("latency_ms", "Backend call latency in milliseconds")
                .buckets(vec![10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 15000.0, 30000.0]),
            &["provider"],
        )?;
        let queue_wait_ms = HistogramVec::new(
            HistogramOpts::new("queue_wait_ms", "Time a request spent queued before dequeue")
                .buckets(vec![5.0, 25.0, 100.0, 500.0, 2000.0, 10000.0]),
            &[],
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(retries_total.clone()))?;
        registry.register(Box::new(fallbacks_total.clone()))?;
        registry.register(Box::new(cache_hits_total.clone()))?;
        registry.register(Box::new(cache_misses_total.clone()))?;
        registry.register(Box::new(latency_ms.clone()))?;
        registry.register(Box::new(queue_wait_ms.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            retries_total,
            fallbacks_total,
            cache_hits_total,
            cache_misses_total,
            latency_ms,
            queue_wait_ms,
        })
    }

    pub fn record_request(&self, status: &str, provider: &str) {
        self.requests_total.with_label_values(&[status, provider]).inc();
    }

    pub fn record_retry(&self, provider: &str, classification: &str) {
        self.retries_total.with_label_values(&[provider, classification]).inc();
    }

    pub fn record_fallback(&self, from: &str, to: &str) {
        self.fallbacks_total.with_label_values(&[from, to]).inc();
    }

    pub fn record_cache_hit(&self, provider: &str) {
        self.cache_hits_total.with_label_values(&[provider]).inc();
    }

    pub fn record_cache_miss(&self, provider: &str) {
        self.cache_misses_total.with_label_values(&[provider]).inc();
    }

    pub fn observe_latency_ms(&self, provider: &str, latency_ms: f64) {
        self.latency_ms.with_label_values(&[provider]).observe(latency_ms);
    }

    pub fn observe_queue_wait_ms(&self, wait_ms: f64) {
        self.queue_wait_ms.with_label_values(&[]).observe(wait_ms);
    }

    /// Renders the registry in Prometheus text exposition format for the
    /// `/metrics` endpoint.
    pub fn export(&self) -> String {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&families, &mut buffer) {
            warn!(error = %e, "failed to encode metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new().expect("static metric definitions are always valid")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_exports_requests_total() {
        let metrics = MetricsCollector::new().unwrap();
        metrics.record_request("completed", "anthropic");
        metrics.record_request("failed", "openai");
        let exported = metrics.export();
        assert!(exported.contains("requests_total"));
        assert!(exported.contains("anthropic"));
    }

    #[test]
    fn observes_latency_histogram() {
        let metrics = MetricsCollector::new().unwrap();
        metrics.observe_latency_ms("anthropic", 120.0);
        let exported = metrics.export();
        assert!(exported.contains("latency_ms_bucket"));
    }

    #[test]
    fn tracks_fallback_and_cache_counters() {
        let metrics = MetricsCollector::new().unwrap();
        metrics.record_fallback("openai", "anthropic");
        metrics.record_cache_hit("openai");
        metrics.record_cache_miss("anthropic");
        let exported = metrics.export();
        assert!(exported.contains("fallbacks_total"));
        assert!(exported.contains("cache_hits_total"));
        assert!(exported.contains("cache_misses_total"));
    }
}
