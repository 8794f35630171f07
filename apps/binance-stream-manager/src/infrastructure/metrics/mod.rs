//! Prometheus Metrics Module
//!
//! Exposes stream-manager metrics via Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Events**: frames received, decoded, and dropped per stream
//! - **Connections**: socket-loop starts, crashes, and restarts
//! - **Control**: outbound subscribe/unsubscribe messages sent
//! - **Listen keys**: REST lifecycle calls and the exchange's used-weight
//!
//! # Integration
//!
//! Metrics are rendered at `/metrics` on the health server port.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
#[allow(clippy::expect_used)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let builder = PrometheusBuilder::new();
            let handle = builder
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "binance_stream_events_received_total",
        "Frames received from the exchange, by classification"
    );
    describe_counter!(
        "binance_stream_events_dropped_total",
        "Frames dropped because decoding failed or the buffer was full"
    );
    describe_counter!(
        "binance_stream_control_sent_total",
        "Outbound subscribe/unsubscribe messages sent"
    );
    describe_counter!(
        "binance_stream_crashes_total",
        "Socket-loop crashes, by reason"
    );
    describe_counter!(
        "binance_stream_restarts_total",
        "Supervisor-driven stream restarts"
    );
    describe_counter!(
        "binance_listen_key_requests_total",
        "Listen-key REST calls, by operation and HTTP status"
    );
    describe_gauge!(
        "binance_streams_running",
        "Streams currently connected and active"
    );
    describe_gauge!(
        "binance_api_used_weight",
        "Most recent used-weight value reported by the REST API"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Label values for event classification.
#[derive(Debug, Clone, Copy)]
pub enum EventClass {
    /// Market- or user-data event.
    Data,
    /// Subscribe/unsubscribe ack.
    ControlResult,
    /// Exchange-reported error.
    Error,
}

impl EventClass {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Data => "data",
            Self::ControlResult => "control_result",
            Self::Error => "error",
        }
    }
}

/// Record a received frame.
pub fn record_event_received(class: EventClass) {
    counter!(
        "binance_stream_events_received_total",
        "class" => class.as_str()
    )
    .increment(1);
}

/// Record a dropped frame.
pub fn record_event_dropped(reason: &'static str) {
    counter!(
        "binance_stream_events_dropped_total",
        "reason" => reason
    )
    .increment(1);
}

/// Record an outbound control message.
pub fn record_control_sent() {
    counter!("binance_stream_control_sent_total").increment(1);
}

/// Record a socket-loop crash.
pub fn record_crash(reason: &'static str) {
    counter!(
        "binance_stream_crashes_total",
        "reason" => reason
    )
    .increment(1);
}

/// Record a supervisor-driven restart.
pub fn record_restart() {
    counter!("binance_stream_restarts_total").increment(1);
}

/// Record a listen-key REST call.
pub fn record_listen_key_request(operation: &'static str, status: u16) {
    counter!(
        "binance_listen_key_requests_total",
        "operation" => operation,
        "status" => status.to_string()
    )
    .increment(1);
}

/// Update the running-streams gauge.
pub fn set_streams_running(count: f64) {
    gauge!("binance_streams_running").set(count);
}

/// Update the used-weight gauge from the REST API response header.
pub fn set_api_used_weight(weight: f64) {
    gauge!("binance_api_used_weight").set(weight);
}

// =============================================================================
// Tests
// =============================================================================
