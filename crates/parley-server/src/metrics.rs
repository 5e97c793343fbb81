//! Metrics collection and export for Parley.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use parley_protocol::EventKind;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "parley_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "parley_connections_active";
    pub const INTENTS_TOTAL: &str = "parley_intents_total";
    pub const FANOUT_TOTAL: &str = "parley_fanout_deliveries_total";
    pub const NOTIFICATIONS_TOTAL: &str = "parley_notifications_total";
    pub const ROOMS_ACTIVE: &str = "parley_rooms_active";
    pub const INTENT_LATENCY_SECONDS: &str = "parley_intent_latency_seconds";
    pub const ERRORS_TOTAL: &str = "parley_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of channel connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of channel connections"
    );
    metrics::describe_counter!(names::INTENTS_TOTAL, "Client intents processed, by kind");
    metrics::describe_counter!(
        names::FANOUT_TOTAL,
        "Events delivered to joined sessions, by kind"
    );
    metrics::describe_counter!(
        names::NOTIFICATIONS_TOTAL,
        "Push delivery attempts, by outcome"
    );
    metrics::describe_gauge!(names::ROOMS_ACTIVE, "Rooms with at least one joined session");
    metrics::describe_histogram!(
        names::INTENT_LATENCY_SECONDS,
        "Intent processing latency in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors, by type");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a processed intent and how long it took.
pub fn record_intent(kind: EventKind, elapsed: Duration) {
    counter!(names::INTENTS_TOTAL, "kind" => kind.as_str()).increment(1);
    histogram!(names::INTENT_LATENCY_SECONDS).record(elapsed.as_secs_f64());
}

/// Record an event written to a session.
pub fn record_fanout(kind: EventKind) {
    counter!(names::FANOUT_TOTAL, "kind" => kind.as_str()).increment(1);
}

/// Record a push delivery attempt.
pub fn record_notification(outcome: &'static str) {
    counter!(names::NOTIFICATIONS_TOTAL, "outcome" => outcome).increment(1);
}

/// Update active room count.
pub fn set_active_rooms(count: usize) {
    gauge!(names::ROOMS_ACTIVE).set(count as f64);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_guard() {
        // Just test that it doesn't panic without a recorder
        let _guard = ConnectionMetricsGuard::new();
        record_intent(EventKind::SendMessage, Duration::from_millis(3));
        record_fanout(EventKind::NewMessage);
    }
}
