//! Connection Sinks
//!
//! A [`Sink`] is the hub's handle on one connected viewer: a bounded FIFO
//! queue plus a lifecycle state. The receiving half, [`SinkQueue`], is owned
//! by exactly one writer task running [`write_pump`], which is the only code
//! path allowed to write to the connection.
//!
//! # Lifecycle
//!
//! ```text
//! Unregistered --register--> Registered --unregister / evict--> Closed
//! ```
//!
//! `Closed` is terminal. A closed sink is never registered again; a new
//! connection needs a new sink.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

use crate::application::ports::FrameWriter;
use crate::domain::pricing::Payload;

const UNREGISTERED: u8 = 0;
const REGISTERED: u8 = 1;
const CLOSED: u8 = 2;

/// Default per-sink queue capacity.
pub const DEFAULT_SINK_CAPACITY: usize = 256;

// =============================================================================
// Identity and State
// =============================================================================

/// Unique identity of a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SinkId(Uuid);

impl SinkId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle state of a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    /// Created but not yet registered with the hub.
    Unregistered,
    /// Registered and receiving broadcasts.
    Registered,
    /// Removed from the hub; its queue is closed. Terminal.
    Closed,
}

/// Outcome of a non-blocking enqueue attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Enqueue {
    Delivered,
    Full,
    Closed,
}

// =============================================================================
// Sink
// =============================================================================

#[derive(Debug)]
struct SinkInner {
    id: SinkId,
    capacity: usize,
    state: AtomicU8,
    tx: Mutex<Option<mpsc::Sender<Payload>>>,
}

/// Registry entry for one connected viewer.
///
/// Cloning a `Sink` yields another handle on the same queue; identity is
/// shared.
#[derive(Debug, Clone)]
pub struct Sink {
    inner: Arc<SinkInner>,
}

impl Sink {
    /// Create a sink with a fixed queue capacity (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> (Self, SinkQueue) {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let sink = Self {
            inner: Arc::new(SinkInner {
                id: SinkId::new(),
                capacity,
                state: AtomicU8::new(UNREGISTERED),
                tx: Mutex::new(Some(tx)),
            }),
        };
        let queue = SinkQueue { id: sink.id(), rx };
        (sink, queue)
    }

    /// Identity of this sink.
    #[must_use]
    pub fn id(&self) -> SinkId {
        self.inner.id
    }

    /// Queue capacity fixed at creation.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SinkState {
        match self.inner.state.load(Ordering::Acquire) {
            UNREGISTERED => SinkState::Unregistered,
            REGISTERED => SinkState::Registered,
            _ => SinkState::Closed,
        }
    }

    /// Check whether the sink has reached its terminal state.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state() == SinkState::Closed
    }

    /// Move `Unregistered -> Registered`. Fails for any other state.
    pub(crate) fn mark_registered(&self) -> bool {
        self.inner
            .state
            .compare_exchange(UNREGISTERED, REGISTERED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Close the queue and enter the terminal state.
    ///
    /// Payloads already queued are still delivered; the writer sees the end
    /// of the queue after them. Returns `true` if this call closed it.
    pub(crate) fn close(&self) -> bool {
        self.inner.state.store(CLOSED, Ordering::Release);
        self.inner.tx.lock().take().is_some()
    }

    /// Attempt to queue a payload without waiting.
    pub(crate) fn try_enqueue(&self, payload: Payload) -> Enqueue {
        let guard = self.inner.tx.lock();
        let Some(tx) = guard.as_ref() else {
            return Enqueue::Closed;
        };
        match tx.try_send(payload) {
            Ok(()) => Enqueue::Delivered,
            Err(TrySendError::Full(_)) => Enqueue::Full,
            Err(TrySendError::Closed(_)) => Enqueue::Closed,
        }
    }
}

// =============================================================================
// Queue and Writer
// =============================================================================

/// Receiving half of a sink's queue, owned by its writer task.
#[derive(Debug)]
pub struct SinkQueue {
    id: SinkId,
    rx: mpsc::Receiver<Payload>,
}

impl SinkQueue {
    /// Identity of the sink this queue belongs to.
    #[must_use]
    pub const fn id(&self) -> SinkId {
        self.id
    }

    /// Wait for the next payload. `None` once the queue is closed and empty.
    pub async fn next(&mut self) -> Option<Payload> {
        self.rx.recv().await
    }
}

/// Why a writer task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterExit {
    /// The queue was closed; one close frame was sent (or attempted).
    QueueClosed,
    /// A write failed; nothing further was sent.
    WriteFailed,
}

/// Deliver queued payloads to one connection, in order, until the queue
/// closes or a write fails.
///
/// On queue closure exactly one close frame is written. On write failure the
/// pump returns immediately; the caller is responsible for unregistering the
/// sink.
pub async fn write_pump<W>(mut queue: SinkQueue, mut writer: W) -> WriterExit
where
    W: FrameWriter,
{
    let sink_id = queue.id();

    while let Some(payload) = queue.next().await {
        if let Err(e) = writer.write_text(&payload).await {
            tracing::warn!(sink_id = %sink_id, error = %e, "Error writing message to sink");
            return WriterExit::WriteFailed;
        }
    }

    if let Err(e) = writer.write_close().await {
        tracing::debug!(sink_id = %sink_id, error = %e, "Error sending close frame");
    }
    tracing::debug!(sink_id = %sink_id, "Sink writer finished");
    WriterExit::QueueClosed
}

// =============================================================================
// Tests
// =============================================================================
