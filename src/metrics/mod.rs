//! Metrics Module
//!
//! Enterprise metrics collection and monitoring for the API Gateway.

pub mod prometheus;

use std::sync::Arc;
use std::time::Instant;

/// Metrics collector trait
pub trait MetricsCollector: Send + Sync {
    /// Record request
    fn record_request(&self, route: &str, method: &str, status: u16, duration: f64);

    /// Record upstream request
    fn record_upstream(&self, upstream: &str, status: u16, duration: f64);

    /// Increment active connections
    fn increment_connections(&self);

    /// Decrement active connections
    fn decrement_connections(&self);

    /// Record circuit breaker state change
    fn record_circuit_breaker(&self, upstream: &str, state: &str);

    /// Record rate limit
    fn record_rate_limit(&self, route: &str, limited: bool);

    /// Record authentication attempt
    fn record_auth(&self, method: &str, success: bool);

    /// Record the current size of the Public-Key Cache (C3), sampled after
    /// every insert/refresh.
    fn record_key_cache_size(&self, size: usize);

    /// Record one key-source refresh attempt (C3), including how long the
    /// fetch took, regardless of outcome.
    fn record_key_cache_refresh(&self, source_id: &str, success: bool, duration: f64);

    /// Record the number of public-key sources currently configured (C3).
    fn record_key_cache_source_count(&self, count: usize);

    /// Record one `RouteChangeEvent` delivered to the Event Subscriber
    /// (C13), and whether the resulting refresh succeeded.
    fn record_event_received(&self, event_type: &str, success: bool);

    /// Record one event published by the Registry Event Publisher (C15).
    fn record_event_published(&self, event_type: &str);

    /// Get current metrics snapshot
    fn snapshot(&self) -> MetricsSnapshot;

    /// Renders the collector's metrics in Prometheus text exposition
    /// format, for the `/actuator/prometheus` endpoint. `None` for
    /// collectors (like [`NoOpCollector`]) with nothing to export.
    fn export_prometheus(&self) -> Option<String> {
        None
    }
}

/// Metrics snapshot for reporting
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    /// Total number of requests processed
    pub total_requests: u64,
    /// Number of currently active connections
    pub active_connections: u64,
    /// Number of rate-limited requests
    pub rate_limited: u64,
    /// Number of successful authentications
    pub auth_success: u64,
    /// Number of failed authentications
    pub auth_failure: u64,
    /// Current Public-Key Cache size (C3)
    pub key_cache_size: u64,
    /// Number of public-key sources currently configured (C3)
    pub key_cache_source_count: u64,
    /// Successful key-source refreshes (C3)
    pub key_cache_refresh_success: u64,
    /// Failed key-source refreshes (C3)
    pub key_cache_refresh_failure: u64,
    /// `RouteChangeEvent`s received by the Event Subscriber (C13)
    pub events_received: u64,
    /// Events published by the Registry Event Publisher (C15)
    pub events_published: u64,
}

/// Request timer for automatic duration tracking
pub struct RequestTimer {
    start: Instant,
    collector: Arc<dyn MetricsCollector>,
    route: String,
    method: String,
}

impl RequestTimer {
    /// Create a new request timer
    pub fn new(collector: Arc<dyn MetricsCollector>, route: String, method: String) -> Self {
        Self {
            start: Instant::now(),
            collector,
            route,
            method,
        }
    }

    /// Complete the request and record metrics
    pub fn complete(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();
        self.collector.record_request(&self.route, &self.method, status, duration);
    }
}

impl Drop for RequestTimer {
    fn drop(&mut self) {
        // Record with 0 status if not explicitly completed
        let duration = self.start.elapsed().as_secs_f64();
        self.collector.record_request(&self.route, &self.method, 0, duration);
    }
}

/// No-op metrics collector for testing
pub struct NoOpCollector;

impl MetricsCollector for NoOpCollector {
    fn record_request(&self, _route: &str, _method: &str, _status: u16, _duration: f64) {}
    fn record_upstream(&self, _upstream: &str, _status: u16, _duration: f64) {}
    fn increment_connections(&self) {}
    fn decrement_connections(&self) {}
    fn record_circuit_breaker(&self, _upstream: &str, _state: &str) {}
    fn record_rate_limit(&self, _route: &str, _limited: bool) {}
    fn record_auth(&self, _method: &str, _success: bool) {}
    fn record_key_cache_size(&self, _size: usize) {}
    fn record_key_cache_refresh(&self, _source_id: &str, _success: bool, _duration: f64) {}
    fn record_key_cache_source_count(&self, _count: usize) {}
    fn record_event_received(&self, _event_type: &str, _success: bool) {}
    fn record_event_published(&self, _event_type: &str) {}
    fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot::default()
    }
}
