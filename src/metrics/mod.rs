use crate::server::response::{GatewayBody, ResponseBuilder};
use crate::server::router::{Handler, HandlerFuture};
use dashmap::DashMap;
use hyper::header::CONTENT_TYPE;
use hyper::{Method, Request, StatusCode};
use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default)]
pub struct Metrics {
    pub requests_total: AtomicU64,
    pub requests_duration_ms: AtomicU64,
    pub active_connections: AtomicU64,
    pub proxied_requests: AtomicU64,
    pub upstream_failures: AtomicU64,
    pub status_codes: DashMap<u16, AtomicU64>,
    pub methods: DashMap<&'static str, AtomicU64>,
}

/// Extension methods share one label so clients cannot add series at will.
fn method_label(method: &Method) -> &'static str {
    match *method {
        Method::GET => "GET",
        Method::HEAD => "HEAD",
        Method::POST => "POST",
        Method::PUT => "PUT",
        Method::DELETE => "DELETE",
        Method::PATCH => "PATCH",
        Method::OPTIONS => "OPTIONS",
        Method::CONNECT => "CONNECT",
        Method::TRACE => "TRACE",
        _ => "OTHER",
    }
}

pub struct MetricsCollector {
    metrics: Arc<Metrics>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            metrics: Arc::new(Metrics::default()),
        }
    }

    pub fn record_request(&self, status: StatusCode, method: &Method, duration: Duration) {
        self.metrics.requests_total.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .requests_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);

        self.metrics
            .status_codes
            .entry(status.as_u16())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);

        self.metrics
            .methods
            .entry(method_label(method))
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_proxied(&self) {
        self.metrics.proxied_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_upstream_failure(&self) {
        self.metrics
            .upstream_failures
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_active_connections(&self) {
        self.metrics
            .active_connections
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn decrement_active_connections(&self) {
        self.metrics
            .active_connections
            .fetch_sub(1, Ordering::Relaxed);
    }

    pub fn get_metrics_snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_total: self.metrics.requests_total.load(Ordering::Relaxed),
            requests_duration_ms: self.metrics.requests_duration_ms.load(Ordering::Relaxed),
            active_connections: self.metrics.active_connections.load(Ordering::Relaxed),
            proxied_requests: self.metrics.proxied_requests.load(Ordering::Relaxed),
            upstream_failures: self.metrics.upstream_failures.load(Ordering::Relaxed),
            status_codes: self
                .metrics
                .status_codes
                .iter()
                .map(|entry| (*entry.key(), entry.value().load(Ordering::Relaxed)))
                .collect(),
            methods: self
                .metrics
                .methods
                .iter()
                .map(|entry| (entry.key().to_string(), entry.value().load(Ordering::Relaxed)))
                .collect(),
        }
    }

    /// Prometheus text exposition of the current counters.
    pub fn export_prometheus(&self) -> String {
        let snapshot = self.get_metrics_snapshot();
        let mut output = String::new();

        let mut counter = |name: &str, help: &str, kind: &str, value: u64| {
            let _ = writeln!(output, "# HELP {} {}", name, help);
            let _ = writeln!(output, "# TYPE {} {}", name, kind);
            let _ = writeln!(output, "{} {}", name, value);
        };
        counter(
            "adminui_requests_total",
            "Total number of HTTP requests",
            "counter",
            snapshot.requests_total,
        );
        counter(
            "adminui_request_duration_milliseconds_total",
            "Total time spent handling requests",
            "counter",
            snapshot.requests_duration_ms,
        );
        counter(
            "adminui_active_connections",
            "Currently open client connections",
            "gauge",
            snapshot.active_connections,
        );
        counter(
            "adminui_proxied_requests_total",
            "Requests forwarded to the upstream",
            "counter",
            snapshot.proxied_requests,
        );
        counter(
            "adminui_upstream_failures_total",
            "Forwarded requests that failed before a response arrived",
            "counter",
            snapshot.upstream_failures,
        );

        output.push_str("# HELP adminui_responses_total Responses by status code\n");
        output.push_str("# TYPE adminui_responses_total counter\n");
        for (status, count) in &snapshot.status_codes {
            let _ = writeln!(
                output,
                "adminui_responses_total{{status=\"{}\"}} {}",
                status, count
            );
        }

        output.push_str("# HELP adminui_requests_by_method_total Requests by method\n");
        output.push_str("# TYPE adminui_requests_by_method_total counter\n");
        for (method, count) in &snapshot.methods {
            let _ = writeln!(
                output,
                "adminui_requests_by_method_total{{method=\"{}\"}} {}",
                method, count
            );
        }

        output
    }
}

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub requests_duration_ms: u64,
    pub active_connections: u64,
    pub proxied_requests: u64,
    pub upstream_failures: u64,
    pub status_codes: BTreeMap<u16, u64>,
    pub methods: BTreeMap<String, u64>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

pub struct MetricsHandler {
    metrics: Arc<MetricsCollector>,
}

impl MetricsHandler {
    pub fn new(metrics: Arc<MetricsCollector>) -> Self {
        Self { metrics }
    }
}

impl Handler for MetricsHandler {
    fn handle(&self, _req: Request<GatewayBody>) -> HandlerFuture<'_> {
        Box::pin(async move {
            ResponseBuilder::new(StatusCode::OK)
                .header(CONTENT_TYPE, "text/plain; version=0.0.4")
                .body(self.metrics.export_prometheus())
                .build()
        })
    }
}
