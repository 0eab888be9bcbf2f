//! Relay counters and gauges.
//!
//! Covers socket churn, frame traffic and the fan-out of ambulance alerts.
//! Exposed in Prometheus text format when `metrics.enabled` is set.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use siren_core::{AlertReport, Outcome};
use std::net::SocketAddr;
use tracing::info;

/// Exported series, all prefixed `siren_`.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "siren_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "siren_connections_active";
    pub const MESSAGES_TOTAL: &str = "siren_messages_total";
    pub const MESSAGES_BYTES: &str = "siren_messages_bytes";
    pub const SESSIONS_ACTIVE: &str = "siren_sessions_active";
    pub const ALERT_DECISIONS_TOTAL: &str = "siren_alert_decisions_total";
    pub const ALERTS_DELIVERED_TOTAL: &str = "siren_alerts_delivered_total";
    pub const LATENCY_SECONDS: &str = "siren_latency_seconds";
    pub const ERRORS_TOTAL: &str = "siren_errors_total";
}

/// Register descriptions for every exported series.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "WebSocket sessions opened since start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Open WebSocket sockets"
    );
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Frames relayed, by direction");
    metrics::describe_counter!(names::MESSAGES_BYTES, "Frame payload bytes, by direction");
    metrics::describe_gauge!(names::SESSIONS_ACTIVE, "Sessions held in the registry, simulated ambulances included");
    metrics::describe_counter!(
        names::ALERT_DECISIONS_TOTAL,
        "Alert candidate decisions by outcome"
    );
    metrics::describe_counter!(
        names::ALERTS_DELIVERED_TOTAL,
        "Enriched alerts handed to a live session"
    );
    metrics::describe_histogram!(
        names::LATENCY_SECONDS,
        "Time spent routing one inbound frame"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Dropped frames and socket failures, by kind");

    info!("Metrics initialized");
}

/// Serve the Prometheus scrape endpoint on `port`.
///
/// # Errors
///
/// Fails when the exporter cannot bind or a recorder is already installed.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Count an accepted socket.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Count a closed socket.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Count one frame and its size. `direction` is `inbound` or `outbound`.
pub fn record_message(bytes: usize, direction: &str) {
    counter!(names::MESSAGES_TOTAL, "direction" => direction.to_string()).increment(1);
    counter!(names::MESSAGES_BYTES, "direction" => direction.to_string()).increment(bytes as u64);
}

/// Observe how long one inbound frame took to route.
pub fn record_latency(seconds: f64) {
    histogram!(names::LATENCY_SECONDS).record(seconds);
}

/// Mirror the registry size.
pub fn set_active_sessions(count: usize) {
    gauge!(names::SESSIONS_ACTIVE).set(count as f64);
}

/// Record every candidate decision of one alert.
pub fn record_alert_decisions(report: &AlertReport) {
    for decision in &report.decisions {
        let outcome = match decision.outcome {
            Outcome::Dispatch { .. } => "dispatched",
            Outcome::Skip(reason) => reason.as_str(),
        };
        counter!(names::ALERT_DECISIONS_TOTAL, "outcome" => outcome).increment(1);
    }
}

/// Record alerts that reached a live session.
pub fn record_alerts_delivered(count: usize) {
    counter!(names::ALERTS_DELIVERED_TOTAL).increment(count as u64);
}

/// Count a dropped frame or socket failure of kind `error_type`.
pub fn record_error(error_type: &str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type.to_string()).increment(1);
}

/// Keeps the open-socket gauge balanced for one WebSocket task.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Count the socket as open until the guard drops.
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
