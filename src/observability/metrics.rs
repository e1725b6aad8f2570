//! Metrics collection and exposition.
//!
//! # Metrics
//! - `ingress_http_requests_total` (counter): requests by method, status
//! - `ingress_http_request_duration_seconds` (histogram): dispatch latency
//! - `ingress_auth_decisions_total` (counter): by authenticator, outcome
//! - `ingress_ws_connections_active` (gauge): open WebSocket connections, by variant
//! - `ingress_ws_messages_total` (counter): by outcome
//! - `ingress_udp_datagrams_total` (counter): by outcome
//! - `ingress_events_total` (counter): collector events by outcome
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op, so tests need no setup
//! - Labels are static strings to keep cardinality bounded

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder with its own scrape listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_request(method: &str, status: u16, elapsed: Duration) {
    counter!(
        "ingress_http_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("ingress_http_request_duration_seconds").record(elapsed.as_secs_f64());
}

pub fn record_auth(authenticator: &'static str, outcome: &'static str) {
    counter!(
        "ingress_auth_decisions_total",
        "authenticator" => authenticator,
        "outcome" => outcome
    )
    .increment(1);
}

pub fn ws_connection_opened(variant: &'static str) {
    gauge!("ingress_ws_connections_active", "variant" => variant).increment(1.0);
}

pub fn ws_connection_closed(variant: &'static str) {
    gauge!("ingress_ws_connections_active", "variant" => variant).decrement(1.0);
}

pub fn record_ws_message(outcome: &'static str) {
    counter!("ingress_ws_messages_total", "outcome" => outcome).increment(1);
}

pub fn record_udp(outcome: &'static str) {
    counter!("ingress_udp_datagrams_total", "outcome" => outcome).increment(1);
}

pub fn record_event(outcome: &'static str) {
    counter!("ingress_events_total", "outcome" => outcome).increment(1);
}
