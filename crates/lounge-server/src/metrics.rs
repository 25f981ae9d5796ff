//! Metrics collection and export for Lounge.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "lounge_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "lounge_connections_active";
    pub const MEMBERS_ACTIVE: &str = "lounge_members_active";
    pub const INTENTS_TOTAL: &str = "lounge_intents_total";
    pub const FRAMES_TOTAL: &str = "lounge_frames_total";
    pub const FRAMES_BYTES: &str = "lounge_frames_bytes";
    pub const LATENCY_SECONDS: &str = "lounge_latency_seconds";
    pub const ERRORS_TOTAL: &str = "lounge_errors_total";
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
    metrics::describe_gauge!(names::MEMBERS_ACTIVE, "Current number of joined members");
    metrics::describe_counter!(names::INTENTS_TOTAL, "Total number of intents applied");
    metrics::describe_counter!(names::FRAMES_TOTAL, "Total number of frames sent or received");
    metrics::describe_counter!(names::FRAMES_BYTES, "Total bytes of frames sent or received");
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

/// Update the joined member count.
pub fn set_active_members(count: usize) {
    gauge!(names::MEMBERS_ACTIVE).set(count as f64);
}

/// Record an applied intent.
pub fn record_intent(intent: &'static str) {
    counter!(names::INTENTS_TOTAL, "intent" => intent).increment(1);
}

/// Record a frame.
pub fn record_frame(bytes: usize, direction: &'static str) {
    counter!(names::FRAMES_TOTAL, "direction" => direction).increment(1);
    counter!(names::FRAMES_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record inbound frame latency.
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
