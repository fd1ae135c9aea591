//! Metrics collection and exposition.
//!
//! # Metrics
//! - `hostgate_connections_total` (counter): accepted connections by gate
//! - `hostgate_handshake_failures_total` (counter): unreadable handshakes by gate
//! - `hostgate_unknown_hostname_total` (counter): rejected connections by gate
//! - `hostgate_dispatch_total` (counter): forwarded connections by gate, hostname, outcome
//! - `hostgate_multiplexers` (gauge): registered multiplexers
//!
//! # Design Decisions
//! - Recording is a no-op until an exporter is installed
//! - Prometheus exposition is optional and bound to its own address

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter with an HTTP listener on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), metrics_exporter_prometheus::BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_connection(gate: &str) {
    metrics::counter!("hostgate_connections_total", "gate" => gate.to_string()).increment(1);
}

pub fn record_handshake_failure(gate: &str) {
    metrics::counter!("hostgate_handshake_failures_total", "gate" => gate.to_string()).increment(1);
}

pub fn record_unknown_hostname(gate: &str) {
    metrics::counter!("hostgate_unknown_hostname_total", "gate" => gate.to_string()).increment(1);
}

pub fn record_dispatch(gate: &str, hostname: &str, ok: bool) {
    let outcome = if ok { "ok" } else { "error" };
    metrics::counter!(
        "hostgate_dispatch_total",
        "gate" => gate.to_string(),
        "hostname" => hostname.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn set_multiplexer_count(count: usize) {
    metrics::gauge!("hostgate_multiplexers").set(count as f64);
}
