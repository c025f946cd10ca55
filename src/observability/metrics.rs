//! Metrics collection and exposition.
//!
//! # Metrics
//! - `erp_requests_total` (counter): requests by method, status
//! - `erp_request_duration_seconds` (histogram): end-to-end latency
//! - `erp_rate_limited_total` (counter): rate-limit denials by reason code
//! - `erp_validation_rejected_total` (counter): validator rejections by code
//! - `erp_csrf_rejected_total` (counter): CSRF failures
//! - `erp_audit_events_total` (counter): audit events by kind
//! - `erp_audit_sink_failures_total` (counter): sink write failures by sink
//! - `erp_security_events_total` (counter): security events by kind
//!
//! # Design Decisions
//! - Recording is a no-op until `init_metrics` installs the exporter
//! - Label values come from closed sets (codes, kinds), never from user input

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use super::ObservabilityError;

/// Install the Prometheus exporter with its own scrape listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), ObservabilityError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| ObservabilityError::Metrics(e.to_string()))?;

    tracing::info!(address = %addr, "Prometheus metrics exporter started");
    Ok(())
}

pub fn record_request(method: &str, status: u16, start: Instant) {
    counter!(
        "erp_requests_total",
        "method" => method_label(method),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("erp_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

/// Extension methods collapse into one label.
fn method_label(method: &str) -> &'static str {
    match method {
        "GET" => "GET",
        "HEAD" => "HEAD",
        "POST" => "POST",
        "PUT" => "PUT",
        "PATCH" => "PATCH",
        "DELETE" => "DELETE",
        "OPTIONS" => "OPTIONS",
        _ => "OTHER",
    }
}

pub fn record_rate_limited(reason: &'static str) {
    counter!("erp_rate_limited_total", "reason" => reason).increment(1);
}

pub fn record_validation_rejected(code: &'static str) {
    counter!("erp_validation_rejected_total", "code" => code).increment(1);
}

pub fn record_csrf_rejected() {
    counter!("erp_csrf_rejected_total").increment(1);
}

pub fn record_audit_event(kind: &'static str) {
    counter!("erp_audit_events_total", "kind" => kind).increment(1);
}

pub fn record_audit_sink_failure(sink: &'static str) {
    counter!("erp_audit_sink_failures_total", "sink" => sink).increment(1);
}

pub fn record_security_event(kind: &'static str) {
    counter!("erp_security_events_total", "kind" => kind).increment(1);
}
