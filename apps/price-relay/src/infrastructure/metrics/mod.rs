//! Prometheus Metrics Module
//!
//! Exposes relay metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Ingest**: upstream events received and upstream errors
//! - **Batches**: batches broadcast, batches dropped by reason, batch size
//! - **Sinks**: connected sinks and evictions by reason
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the HTTP port. Recording is a no-op
//! until [`init_metrics`] installs the recorder, so the core can be driven
//! in tests without any setup.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Later calls return the handle installed by the first one.
///
/// # Errors
///
/// Returns [`BuildError`] if the recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
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
        "price_relay_events_received_total",
        "Total ticker events received from the upstream feed"
    );
    describe_counter!(
        "price_relay_upstream_errors_total",
        "Total non-fatal errors reported by the upstream feed"
    );
    describe_counter!(
        "price_relay_batches_broadcast_total",
        "Total batches handed to the broadcast hub"
    );
    describe_counter!(
        "price_relay_batches_dropped_total",
        "Total batches dropped before reaching the hub"
    );
    describe_histogram!(
        "price_relay_batch_symbols",
        "Number of symbols per broadcast batch"
    );
    describe_histogram!(
        "price_relay_fanout_seconds",
        "Time to fan one batch out to every sink"
    );

    describe_gauge!(
        "price_relay_connected_sinks",
        "Number of viewer connections registered with the hub"
    );
    describe_counter!(
        "price_relay_sinks_evicted_total",
        "Total sinks removed by the hub"
    );
    describe_counter!(
        "price_relay_upstream_restarts_total",
        "Total upstream restart attempts"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Why a batch never reached the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Hub intake was full.
    Saturated,
    /// Hub intake was closed.
    Closed,
    /// The batch could not be serialized.
    Serialization,
}

impl DropReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Saturated => "saturated",
            Self::Closed => "closed",
            Self::Serialization => "serialization",
        }
    }
}

/// Why a sink was removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    /// Its queue was full during a broadcast.
    QueueFull,
    /// Its writer was already gone.
    Disconnected,
}

impl EvictionReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::QueueFull => "queue_full",
            Self::Disconnected => "disconnected",
        }
    }
}

/// Record a ticker event received from upstream.
pub fn record_event_received() {
    counter!("price_relay_events_received_total").increment(1);
}

/// Record a non-fatal upstream error.
pub fn record_upstream_error() {
    counter!("price_relay_upstream_errors_total").increment(1);
}

/// Record a batch accepted by the hub.
#[allow(clippy::cast_precision_loss)]
pub fn record_batch_broadcast(symbols: usize) {
    counter!("price_relay_batches_broadcast_total").increment(1);
    histogram!("price_relay_batch_symbols").record(symbols as f64);
}

/// Record a dropped batch.
pub fn record_batch_dropped(reason: DropReason) {
    counter!(
        "price_relay_batches_dropped_total",
        "reason" => reason.as_str()
    )
    .increment(1);
}

/// Record how long one fan-out took.
pub fn record_fanout_duration(duration: Duration) {
    histogram!("price_relay_fanout_seconds").record(duration.as_secs_f64());
}

/// Update the connected sink count.
#[allow(clippy::cast_precision_loss)]
pub fn set_connected_sinks(count: usize) {
    gauge!("price_relay_connected_sinks").set(count as f64);
}

/// Record a sink eviction.
pub fn record_sink_evicted(reason: EvictionReason) {
    counter!(
        "price_relay_sinks_evicted_total",
        "reason" => reason.as_str()
    )
    .increment(1);
}

/// Record an upstream restart attempt.
pub fn record_upstream_restart() {
    counter!("price_relay_upstream_restarts_total").increment(1);
}

// =============================================================================
// Tests
// =============================================================================
