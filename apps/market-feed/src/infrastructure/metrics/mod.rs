//! Prometheus Metrics Module
//!
//! Counters and gauges for the stream session, the feed client and the
//! bar pipeline. Recording goes through the `metrics` facade and is a
//! no-op until [`init_metrics`] installs the Prometheus recorder.
//!
//! # Metrics
//!
//! - **Session**: frames received, reconnects, dropped queued writes,
//!   connection state
//! - **Feed**: bars decoded, decode errors
//! - **Pipeline**: aggregated bars, sequencing errors

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::infrastructure::websocket::ConnectionState;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics setup failures.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Exporter could not be built.
    #[error("failed to build Prometheus exporter: {0}")]
    Build(#[from] metrics_exporter_prometheus::BuildError),

    /// A global recorder is already installed.
    #[error("failed to install metrics recorder: {0}")]
    Install(String),
}

/// Install the Prometheus recorder and serve `/metrics` on `port`.
///
/// Port 0 disables metrics and returns `Ok(None)`. Must be called inside a
/// tokio runtime; the HTTP exporter runs as a spawned task. A second call
/// returns the handle from the first.
///
/// # Errors
///
/// Returns an error if the exporter cannot bind or another recorder is
/// already installed.
pub fn init_metrics(port: u16) -> Result<Option<PrometheusHandle>, MetricsError> {
    if port == 0 {
        return Ok(None);
    }
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(Some(handle.clone()));
    }

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    let (recorder, exporter) = PrometheusBuilder::new()
        .with_http_listener(addr)
        .build()?;
    let handle = recorder.handle();
    metrics::set_global_recorder(recorder).map_err(|e| MetricsError::Install(e.to_string()))?;

    tokio::spawn(async move {
        if let Err(e) = exporter.await {
            tracing::error!(error = ?e, "Prometheus exporter stopped");
        }
    });

    register_metrics();
    tracing::info!(%addr, "Prometheus metrics listening");
    Ok(Some(PROMETHEUS_HANDLE.get_or_init(|| handle).clone()))
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
        "market_feed_frames_received_total",
        "Text frames received from the stream"
    );
    describe_counter!(
        "market_feed_decode_errors_total",
        "Frames or messages that failed to decode"
    );
    describe_counter!("market_feed_bars_total", "Bars decoded from the stream");
    describe_counter!(
        "market_feed_reconnects_total",
        "Reconnection attempts scheduled"
    );
    describe_counter!(
        "market_feed_dropped_writes_total",
        "Queued outbound messages discarded on connection loss"
    );
    describe_counter!(
        "market_feed_state_transitions_total",
        "Session state transitions by target state"
    );
    describe_gauge!(
        "market_feed_connected",
        "1 while the stream is connected, 0 otherwise"
    );
    describe_counter!(
        "market_feed_aggregated_bars_total",
        "Aggregated bars emitted by the pipeline"
    );
    describe_counter!(
        "market_feed_sequencing_errors_total",
        "Bars rejected for breaking the expected sequence"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a text frame delivered to the feed.
pub fn record_frame() {
    counter!("market_feed_frames_received_total").increment(1);
}

/// Record a frame or message that failed to decode.
pub fn record_decode_error() {
    counter!("market_feed_decode_errors_total").increment(1);
}

/// Record a decoded bar.
pub fn record_bar(symbol: &str) {
    counter!("market_feed_bars_total", "symbol" => symbol.to_string()).increment(1);
}

/// Record a scheduled reconnection.
pub fn record_reconnect() {
    counter!("market_feed_reconnects_total").increment(1);
}

/// Record queued writes dropped on connection loss.
pub fn record_dropped_writes(count: u64) {
    counter!("market_feed_dropped_writes_total").increment(count);
}

/// Record a session state transition.
pub fn set_connection_state(state: ConnectionState) {
    counter!("market_feed_state_transitions_total", "state" => state.as_str()).increment(1);
    gauge!("market_feed_connected").set(if state.is_connected() { 1.0 } else { 0.0 });
}

/// Record an aggregated bar.
pub fn record_aggregated_bar(symbol: &str) {
    counter!("market_feed_aggregated_bars_total", "symbol" => symbol.to_string()).increment(1);
}

/// Record a sequencing violation.
pub fn record_sequencing_error(symbol: &str) {
    counter!("market_feed_sequencing_errors_total", "symbol" => symbol.to_string()).increment(1);
}

// =============================================================================
// Tests
// =============================================================================
