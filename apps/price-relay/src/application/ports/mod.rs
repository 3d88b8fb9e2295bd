//! Port Interfaces
//!
//! Defines the interfaces (ports) between the relay core and the outside
//! world. Infrastructure adapters implement these contracts.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`UpstreamFeed`]: subscription to the external ticker stream
//! - [`BroadcastPort`]: non-blocking hand-off of serialized batches
//! - [`FrameWriter`]: the write half of one viewer connection

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::domain::pricing::Payload;

// =============================================================================
// Upstream Feed
// =============================================================================

/// One raw ticker event as received from the upstream feed.
///
/// Numeric fields stay string-encoded; conversion happens in the ingestor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickerEvent {
    /// Instrument name.
    pub symbol: String,
    /// Last price.
    pub last_price: String,
    /// Absolute price change.
    pub price_change: String,
    /// Percent price change.
    pub price_change_percent: String,
    /// Base asset volume.
    pub base_volume: String,
}

/// Item delivered on the upstream event channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// A ticker update.
    Ticker(TickerEvent),
    /// A non-fatal upstream error.
    Error(String),
}

/// Errors raised while opening an upstream subscription.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// The connection could not be established.
    #[error("upstream connection failed: {0}")]
    Connect(String),

    /// Nothing to subscribe to.
    #[error("no symbols to subscribe")]
    NoSymbols,
}

/// Handle to one open upstream connection.
///
/// Closing is one-shot: the first [`close`](Self::close) requests the
/// connection to stop, every later call is a no-op. The adapter signals
/// [`mark_done`](Self::mark_done) when the connection has actually ended,
/// for whatever reason.
#[derive(Debug, Default)]
pub struct UpstreamHandle {
    closed: AtomicBool,
    stop: CancellationToken,
    done: CancellationToken,
}

impl UpstreamHandle {
    /// Create an open handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request the connection to close.
    ///
    /// Returns `true` only for the call that actually closed the handle.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.stop.cancel();
        true
    }

    /// Check whether a close has been requested.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Wait until a close is requested. Used by adapters.
    pub async fn closed(&self) {
        self.stop.cancelled().await;
    }

    /// Mark the connection as ended. Idempotent.
    pub fn mark_done(&self) {
        self.done.cancel();
    }

    /// Check whether the connection has ended.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.done.is_cancelled()
    }

    /// Wait until the connection has ended.
    pub async fn done(&self) {
        self.done.cancelled().await;
    }
}

/// Streaming source of ticker events.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UpstreamFeed: Send + Sync {
    /// Open one subscription for `symbols`.
    ///
    /// Events and non-fatal errors are delivered on `events` until the
    /// connection ends or the returned handle is closed.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError`] if the connection cannot be established.
    async fn subscribe(
        &self,
        symbols: Vec<String>,
        events: mpsc::Sender<FeedEvent>,
    ) -> Result<std::sync::Arc<UpstreamHandle>, FeedError>;
}

// =============================================================================
// Broadcast
// =============================================================================

/// Reasons a broadcast hand-off was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum IntakeError {
    /// The intake queue is full; the payload was not accepted.
    #[error("broadcast intake saturated")]
    Saturated,
    /// The hub is no longer accepting payloads.
    #[error("broadcast intake closed")]
    Closed,
}

/// Non-blocking entry point into the broadcast hub.
pub trait BroadcastPort: Send + Sync {
    /// Hand a payload to the hub without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`IntakeError`] if the payload was not accepted.
    fn try_broadcast(&self, payload: Payload) -> Result<(), IntakeError>;
}

// =============================================================================
// Connection Writer
// =============================================================================

/// Failure writing to a viewer connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("connection write failed: {0}")]
pub struct WriteError(pub String);

/// Write half of one viewer connection.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FrameWriter: Send {
    /// Write one text frame.
    async fn write_text(&mut self, payload: &str) -> Result<(), WriteError>;

    /// Write the terminal close frame.
    async fn write_close(&mut self) -> Result<(), WriteError>;
}
