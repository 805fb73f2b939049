//! Prometheus Metrics Module
//!
//! Exposes client metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Messages**: Topic messages received, discarded and unparseable
//! - **Connection**: Bus connection state and reconnect attempts
//! - **REST**: Failed forwarding toggles
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! before [`init_metrics`] is a no-op.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::domain::connection::ConnectionState;
use crate::domain::subscription::TopicKind;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if another global recorder is already installed.
#[allow(clippy::expect_used)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
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
        "quote_stream_messages_received_total",
        "Topic messages received from the message bus"
    );
    describe_counter!(
        "quote_stream_messages_discarded_total",
        "Topic messages dropped (inactive ticker, duplicate, outside window)"
    );
    describe_counter!(
        "quote_stream_parse_failures_total",
        "Topic payloads that failed JSON or schema validation"
    );
    describe_counter!(
        "quote_stream_frame_errors_total",
        "WebSocket payloads that were not valid STOMP"
    );

    describe_gauge!(
        "quote_stream_connection_state",
        "Bus connection state (0 disconnected, 1 connecting, 2 connected)"
    );
    describe_counter!(
        "quote_stream_reconnects_total",
        "Bus reconnection attempts"
    );

    describe_counter!(
        "quote_stream_rest_failures_total",
        "Failed subscription REST calls"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Why a topic message was dropped.
#[derive(Debug, Clone, Copy)]
pub enum DiscardReason {
    /// Ticker is not the active one.
    StaleSymbol,
    /// Execution already in the log.
    Duplicate,
    /// Execution older than the retained window.
    OutsideWindow,
}

impl DiscardReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::StaleSymbol => "stale_symbol",
            Self::Duplicate => "duplicate",
            Self::OutsideWindow => "outside_window",
        }
    }
}

/// Subscription REST call.
#[derive(Debug, Clone, Copy)]
pub enum RestAction {
    /// Forwarding enable.
    Enable,
    /// Forwarding disable.
    Disable,
}

impl RestAction {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Enable => "enable",
            Self::Disable => "disable",
        }
    }
}

/// Record a topic message received.
pub fn record_message_received(topic: TopicKind) {
    counter!(
        "quote_stream_messages_received_total",
        "topic" => topic.as_str()
    )
    .increment(1);
}

/// Record a dropped topic message.
pub fn record_message_discarded(topic: TopicKind, reason: DiscardReason) {
    counter!(
        "quote_stream_messages_discarded_total",
        "topic" => topic.as_str(),
        "reason" => reason.as_str()
    )
    .increment(1);
}

/// Record a payload that failed to parse.
pub fn record_parse_failure(topic: TopicKind) {
    counter!(
        "quote_stream_parse_failures_total",
        "topic" => topic.as_str()
    )
    .increment(1);
}

/// Record a malformed STOMP payload.
pub fn record_frame_error() {
    counter!("quote_stream_frame_errors_total").increment(1);
}

/// Record a failed REST call.
pub fn record_rest_failure(action: RestAction) {
    counter!(
        "quote_stream_rest_failures_total",
        "action" => action.as_str()
    )
    .increment(1);
}

/// Record a reconnection attempt.
pub fn record_reconnect() {
    counter!("quote_stream_reconnects_total").increment(1);
}

/// Update the connection state gauge.
pub fn set_connection_state(state: ConnectionState) {
    gauge!("quote_stream_connection_state").set(connection_state_value(state));
}

const fn connection_state_value(state: ConnectionState) -> f64 {
    match state {
        ConnectionState::Disconnected => 0.0,
        ConnectionState::Connecting => 1.0,
        ConnectionState::Connected => 2.0,
    }
}

// =============================================================================
// Tests
// =============================================================================
