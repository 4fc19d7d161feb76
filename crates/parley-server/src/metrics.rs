//! Metrics collection and export for Parley.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use parley_core::{PrivateOutcome, RouterStats};
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "parley_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "parley_connections_active";
    pub const SESSIONS_ACTIVE: &str = "parley_sessions_active";
    pub const FRAMES_TOTAL: &str = "parley_frames_total";
    pub const FRAMES_BYTES: &str = "parley_frames_bytes";
    pub const CHAT_MESSAGES_TOTAL: &str = "parley_chat_messages_total";
    pub const DELIVERIES_TOTAL: &str = "parley_deliveries_total";
    pub const DELIVERIES_FAILED: &str = "parley_deliveries_failed_total";
    pub const SESSIONS_EVICTED: &str = "parley_sessions_evicted_total";
    pub const LATENCY_SECONDS: &str = "parley_latency_seconds";
    pub const ERRORS_TOTAL: &str = "parley_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of open connections"
    );
    metrics::describe_gauge!(names::SESSIONS_ACTIVE, "Current number of registered names");
    metrics::describe_counter!(names::FRAMES_TOTAL, "Total number of frames processed");
    metrics::describe_counter!(names::FRAMES_BYTES, "Total bytes of frames processed");
    metrics::describe_counter!(
        names::CHAT_MESSAGES_TOTAL,
        "Chat requests handled, by kind and outcome"
    );
    metrics::describe_counter!(names::DELIVERIES_TOTAL, "Successful pushes to clients");
    metrics::describe_counter!(names::DELIVERIES_FAILED, "Failed pushes to clients");
    metrics::describe_counter!(
        names::SESSIONS_EVICTED,
        "Sessions removed after a failed push"
    );
    metrics::describe_histogram!(
        names::LATENCY_SECONDS,
        "Inbound frame processing latency in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

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

/// Record a frame.
pub fn record_frame(bytes: usize, direction: &'static str) {
    counter!(names::FRAMES_TOTAL, "direction" => direction).increment(1);
    counter!(names::FRAMES_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record a group send.
pub fn record_group(recipients: usize) {
    let outcome = if recipients == 0 { "dropped" } else { "delivered" };
    counter!(names::CHAT_MESSAGES_TOTAL, "kind" => "group", "outcome" => outcome).increment(1);
}

/// Record a private send.
pub fn record_private(outcome: PrivateOutcome) {
    let outcome = match outcome {
        PrivateOutcome::Delivered => "delivered",
        PrivateOutcome::RecipientOffline => "offline",
        PrivateOutcome::Failed => "failed",
        PrivateOutcome::Dropped => "dropped",
    };
    counter!(names::CHAT_MESSAGES_TOTAL, "kind" => "private", "outcome" => outcome).increment(1);
}

/// Mirror the router's counters.
pub fn record_router_stats(stats: &RouterStats) {
    gauge!(names::SESSIONS_ACTIVE).set(stats.sessions as f64);
    counter!(names::DELIVERIES_TOTAL).absolute(stats.messages_delivered);
    counter!(names::DELIVERIES_FAILED).absolute(stats.deliveries_failed);
    counter!(names::SESSIONS_EVICTED).absolute(stats.sessions_evicted);
}

/// Record frame processing latency.
pub fn record_latency(seconds: f64) {
    histogram!(names::LATENCY_SECONDS).record(seconds);
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
    fn test_recording_without_exporter() {
        // No recorder installed: every call must be a harmless no-op.
        let _guard = ConnectionMetricsGuard::new();
        record_frame(12, "inbound");
        record_group(0);
        record_private(PrivateOutcome::RecipientOffline);
        record_router_stats(&RouterStats::default());
    }
}
