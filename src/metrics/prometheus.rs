//! Prometheus Metrics Exporter
//!
//! Enterprise Prometheus integration for metrics export.

use super::{MetricsCollector, MetricsSnapshot};
use prometheus::{
    CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use parking_lot::RwLock;

/// Prometheus metrics collector
pub struct PrometheusCollector {
    registry: Arc<Registry>,

    // Request metrics
    requests_total: CounterVec,
    request_duration: HistogramVec,
    requests_in_flight: Gauge,

    // Upstream metrics
    upstream_requests: CounterVec,
    upstream_duration: HistogramVec,

    // Connection metrics
    active_connections: Gauge,

    // Public-Key Cache metrics (C3)
    key_cache_size: Gauge,
    key_cache_source_count: Gauge,
    key_cache_refresh_total: CounterVec,
    key_cache_refresh_duration: HistogramVec,
    key_cache_last_refresh_timestamp: Gauge,

    // Circuit breaker metrics
    circuit_breaker_state: CounterVec,

    // Rate limiting metrics
    rate_limit_total: CounterVec,
    rate_limited_requests: CounterVec,

    // Authentication metrics
    auth_attempts: CounterVec,

    // Event Subscriber metrics (C13)
    events_received_total: CounterVec,

    // Registry Event Publisher metrics (C15)
    events_published_total: CounterVec,

    // Snapshot cache
    snapshot: Arc<RwLock<MetricsSnapshot>>,
}

impl PrometheusCollector {
    /// Create a new Prometheus collector
    pub fn new(buckets: Vec<f64>) -> Result<Self, prometheus::Error> {
        let registry = Arc::new(Registry::new());

        // Request metrics
        let requests_total = CounterVec::new(
            Opts::new("gateway_requests_total", "Total number of HTTP requests")
                .namespace("meridian"),
            &["route", "method", "status"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let request_duration = HistogramVec::new(
            HistogramOpts::new("gateway_request_duration_seconds", "Request duration in seconds")
                .namespace("meridian")
                .buckets(buckets.clone()),
            &["route", "method"],
        )?;
        registry.register(Box::new(request_duration.clone()))?;

        let requests_in_flight = Gauge::new(
            "meridian_gateway_requests_in_flight",
            "Number of requests currently being processed",
        )?;
        registry.register(Box::new(requests_in_flight.clone()))?;

        // Upstream metrics
        let upstream_requests = CounterVec::new(
            Opts::new("gateway_upstream_requests_total", "Total upstream requests")
                .namespace("meridian"),
            &["upstream", "status"],
        )?;
        registry.register(Box::new(upstream_requests.clone()))?;

        let upstream_duration = HistogramVec::new(
            HistogramOpts::new("gateway_upstream_duration_seconds", "Upstream request duration")
                .namespace("meridian")
                .buckets(buckets),
            &["upstream"],
        )?;
        registry.register(Box::new(upstream_duration.clone()))?;

        // Connection metrics
        let active_connections = Gauge::new(
            "meridian_gateway_active_connections",
            "Number of active connections",
        )?;
        registry.register(Box::new(active_connections.clone()))?;

        // Public-Key Cache metrics (C3)
        let key_cache_size = Gauge::new(
            "meridian_gateway_key_cache_size",
            "Number of public keys currently held by the Public-Key Cache",
        )?;
        registry.register(Box::new(key_cache_size.clone()))?;

        let key_cache_source_count = Gauge::new(
            "meridian_gateway_key_cache_source_count",
            "Number of public-key sources currently configured",
        )?;
        registry.register(Box::new(key_cache_source_count.clone()))?;

        let key_cache_refresh_total = CounterVec::new(
            Opts::new("gateway_key_cache_refresh_total", "Public key source refresh attempts")
                .namespace("meridian"),
            &["source_id", "result"],
        )?;
        registry.register(Box::new(key_cache_refresh_total.clone()))?;

        let key_cache_refresh_duration = HistogramVec::new(
            HistogramOpts::new(
                "gateway_key_cache_refresh_duration_seconds",
                "Public key source refresh duration",
            )
            .namespace("meridian")
            .buckets(vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0]),
            &["source_id"],
        )?;
        registry.register(Box::new(key_cache_refresh_duration.clone()))?;

        let key_cache_last_refresh_timestamp = Gauge::new(
            "meridian_gateway_key_cache_last_refresh_timestamp_seconds",
            "Unix timestamp of the most recent key-source refresh attempt, across all sources",
        )?;
        registry.register(Box::new(key_cache_last_refresh_timestamp.clone()))?;

        // Circuit breaker metrics
        let circuit_breaker_state = CounterVec::new(
            Opts::new("gateway_circuit_breaker_state_changes", "Circuit breaker state changes")
                .namespace("meridian"),
            &["upstream", "state"],
        )?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;

        // Rate limiting metrics
        let rate_limit_total = CounterVec::new(
            Opts::new("gateway_rate_limit_checks_total", "Total rate limit checks")
                .namespace("meridian"),
            &["route"],
        )?;
        registry.register(Box::new(rate_limit_total.clone()))?;

        let rate_limited_requests = CounterVec::new(
            Opts::new("gateway_rate_limited_requests_total", "Total rate limited requests")
                .namespace("meridian"),
            &["route"],
        )?;
        registry.register(Box::new(rate_limited_requests.clone()))?;

        // Authentication metrics
        let auth_attempts = CounterVec::new(
            Opts::new("gateway_auth_attempts_total", "Total authentication attempts")
                .namespace("meridian"),
            &["method", "result"],
        )?;
        registry.register(Box::new(auth_attempts.clone()))?;

        // Event Subscriber metrics (C13)
        let events_received_total = CounterVec::new(
            Opts::new("gateway_events_received_total", "RouteChangeEvents consumed by the subscriber")
                .namespace("meridian"),
            &["event_type", "result"],
        )?;
        registry.register(Box::new(events_received_total.clone()))?;

        // Registry Event Publisher metrics (C15)
        let events_published_total = CounterVec::new(
            Opts::new("gateway_events_published_total", "Events published to the shared substrate")
                .namespace("meridian"),
            &["event_type"],
        )?;
        registry.register(Box::new(events_published_total.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            request_duration,
            requests_in_flight,
            upstream_requests,
            upstream_duration,
            active_connections,
            key_cache_size,
            key_cache_source_count,
            key_cache_refresh_total,
            key_cache_refresh_duration,
            key_cache_last_refresh_timestamp,
            circuit_breaker_state,
            rate_limit_total,
            rate_limited_requests,
            auth_attempts,
            events_received_total,
            events_published_total,
            snapshot: Arc::new(RwLock::new(MetricsSnapshot::default())),
        })
    }

    /// Export metrics in Prometheus format
    pub fn export(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).to_string())
    }

    /// Get registry for custom metrics
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }
}

impl MetricsCollector for PrometheusCollector {
    fn record_request(&self, route: &str, method: &str, status: u16, duration: f64) {
        self.requests_total
            .with_label_values(&[route, method, &status.to_string()])
            .inc();

        self.request_duration
            .with_label_values(&[route, method])
            .observe(duration);

        // Update snapshot
        let mut snapshot = self.snapshot.write();
        snapshot.total_requests += 1;
    }

    fn record_upstream(&self, upstream: &str, status: u16, duration: f64) {
        self.upstream_requests
            .with_label_values(&[upstream, &status.to_string()])
            .inc();

        self.upstream_duration
            .with_label_values(&[upstream])
            .observe(duration);
    }

    fn increment_connections(&self) {
        self.active_connections.inc();
        self.requests_in_flight.inc();

        let mut snapshot = self.snapshot.write();
        snapshot.active_connections += 1;
    }

    fn decrement_connections(&self) {
        self.active_connections.dec();
        self.requests_in_flight.dec();

        let mut snapshot = self.snapshot.write();
        snapshot.active_connections = snapshot.active_connections.saturating_sub(1);
    }

    fn record_key_cache_size(&self, size: usize) {
        self.key_cache_size.set(size as f64);

        let mut snapshot = self.snapshot.write();
        snapshot.key_cache_size = size as u64;
    }

    fn record_key_cache_refresh(&self, source_id: &str, success: bool, duration: f64) {
        let result = if success { "success" } else { "failure" };
        self.key_cache_refresh_total.with_label_values(&[source_id, result]).inc();
        self.key_cache_refresh_duration
            .with_label_values(&[source_id])
            .observe(duration);

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        self.key_cache_last_refresh_timestamp.set(now);

        let mut snapshot = self.snapshot.write();
        if success {
            snapshot.key_cache_refresh_success += 1;
        } else {
            snapshot.key_cache_refresh_failure += 1;
        }
    }

    fn record_key_cache_source_count(&self, count: usize) {
        self.key_cache_source_count.set(count as f64);

        let mut snapshot = self.snapshot.write();
        snapshot.key_cache_source_count = count as u64;
    }

    fn record_event_received(&self, event_type: &str, success: bool) {
        let result = if success { "success" } else { "failure" };
        self.events_received_total.with_label_values(&[event_type, result]).inc();

        let mut snapshot = self.snapshot.write();
        snapshot.events_received += 1;
    }

    fn record_event_published(&self, event_type: &str) {
        self.events_published_total.with_label_values(&[event_type]).inc();

        let mut snapshot = self.snapshot.write();
        snapshot.events_published += 1;
    }

    fn record_circuit_breaker(&self, upstream: &str, state: &str) {
        self.circuit_breaker_state
            .with_label_values(&[upstream, state])
            .inc();
    }

    fn record_rate_limit(&self, route: &str, limited: bool) {
        self.rate_limit_total.with_label_values(&[route]).inc();

        if limited {
            self.rate_limited_requests.with_label_values(&[route]).inc();

            let mut snapshot = self.snapshot.write();
            snapshot.rate_limited += 1;
        }
    }

    fn record_auth(&self, method: &str, success: bool) {
        let result = if success { "success" } else { "failure" };
        self.auth_attempts.with_label_values(&[method, result]).inc();

        let mut snapshot = self.snapshot.write();
        if success {
            snapshot.auth_success += 1;
        } else {
            snapshot.auth_failure += 1;
        }
    }

    fn snapshot(&self) -> MetricsSnapshot {
        self.snapshot.read().clone()
    }

    fn export_prometheus(&self) -> Option<String> {
        self.export().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prometheus_collector() {
        let collector = PrometheusCollector::new(vec![0.001, 0.01, 0.1, 1.0]).unwrap();

        collector.record_request("/api/users", "GET", 200, 0.05);
        collector.increment_connections();
        collector.record_key_cache_size(3);
        collector.record_key_cache_source_count(2);
        collector.record_key_cache_refresh("s1", true, 0.02);
        collector.record_event_received("ROUTE_CHANGE", true);
        collector.record_event_published("ROUTE_CHANGE");

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.total_requests, 1);
        assert_eq!(snapshot.active_connections, 1);
        assert_eq!(snapshot.key_cache_size, 3);
        assert_eq!(snapshot.key_cache_source_count, 2);
        assert_eq!(snapshot.key_cache_refresh_success, 1);
        assert_eq!(snapshot.events_received, 1);
        assert_eq!(snapshot.events_published, 1);

        let export = collector.export().unwrap();
        assert!(export.contains("meridian_gateway_requests_total"));
        assert!(export.contains("meridian_gateway_key_cache_size"));
        assert!(export.contains("meridian_gateway_key_cache_source_count"));
        assert!(export.contains("gateway_key_cache_refresh_duration_seconds"));
        assert!(export.contains("meridian_gateway_key_cache_last_refresh_timestamp_seconds"));
    }
}
