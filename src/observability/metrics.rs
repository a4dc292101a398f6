//! Metrics collection and exposition.
//!
//! # Metrics
//! - `panda_http_requests_total` (counter): requests by route, status
//! - `panda_http_request_duration_seconds` (histogram): latency distribution
//! - `panda_ws_connections_active` (gauge): open WebSocket connections by path
//! - `panda_ws_handshakes_total` (counter): upgrade outcomes
//! - `panda_ws_frames_total` (counter): frames by direction
//! - `panda_ws_reaped_total` (counter): connections removed by the liveness sweep
//! - `panda_upstream_requests_total` (counter): upstream calls by endpoint, outcome
//! - `panda_rate_limited_total` (counter): rejected requests

use std::net::SocketAddr;
use std::time::Instant;
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(route: &str, status: u16, start: Instant) {
    ::metrics::counter!(
        "panda_http_requests_total",
        "route" => route.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    ::metrics::histogram!("panda_http_request_duration_seconds", "route" => route.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn ws_connection_opened(path: &'static str) {
    ::metrics::gauge!("panda_ws_connections_active", "path" => path).increment(1.0);
}

pub fn ws_connection_closed(path: &'static str) {
    ::metrics::gauge!("panda_ws_connections_active", "path" => path).decrement(1.0);
}

pub fn record_handshake(outcome: &'static str) {
    ::metrics::counter!("panda_ws_handshakes_total", "outcome" => outcome).increment(1);
}

pub fn record_frame(direction: &'static str) {
    ::metrics::counter!("panda_ws_frames_total", "direction" => direction).increment(1);
}

pub fn record_reaped() {
    ::metrics::counter!("panda_ws_reaped_total").increment(1);
}

pub fn record_upstream(endpoint: &'static str, outcome: &'static str) {
    ::metrics::counter!(
        "panda_upstream_requests_total",
        "endpoint" => endpoint,
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_rate_limited() {
    ::metrics::counter!("panda_rate_limited_total").increment(1);
}
