//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by service, method, status
//! - `gateway_request_duration_seconds` (histogram): latency distribution
//! - `gateway_circuit_rejections_total` (counter): fast-failed calls by service
//! - `gateway_circuit_transitions_total` (counter): breaker state changes
//! - `gateway_timeouts_total` (counter): handler overruns by service
//! - `gateway_service_health` (gauge): 1=healthy, 0=unhealthy
//! - `gateway_audit_failures_total` (counter): swallowed automatic audit failures
//! - `gateway_store_errors_total` (counter): shared store errors by component
//!
//! # Design Decisions
//! - Facade macros are no-ops until a recorder is installed (tests, CLI)
//! - Labels kept to bounded sets (service names come from static config)

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(service: &str, method: &str, status: u16, start: Instant) {
    let labels = [
        ("service", service.to_string()),
        ("method", method.to_string()),
        ("status", status.to_string()),
    ];
    counter!("gateway_requests_total", &labels).increment(1);
    histogram!("gateway_request_duration_seconds", &labels)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_circuit_rejected(service: &str) {
    counter!("gateway_circuit_rejections_total", "service" => service.to_string()).increment(1);
}

pub fn record_circuit_transition(service: &str, to: &'static str) {
    counter!(
        "gateway_circuit_transitions_total",
        "service" => service.to_string(),
        "to" => to
    )
    .increment(1);
}

pub fn record_timeout(service: &str) {
    counter!("gateway_timeouts_total", "service" => service.to_string()).increment(1);
}

pub fn record_service_health(service: &str, healthy: bool) {
    gauge!("gateway_service_health", "service" => service.to_string())
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_audit_failure() {
    counter!("gateway_audit_failures_total").increment(1);
}

pub fn record_store_error(component: &'static str) {
    counter!("gateway_store_errors_total", "component" => component).increment(1);
}
