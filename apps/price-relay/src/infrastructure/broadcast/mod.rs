//! Broadcast Hub
//!
//! Fans each serialized batch out to every registered connection sink.
//!
//! # Architecture
//!
//! ```text
//! Ingestor --try_broadcast--> [intake, bounded] --> Hub::run --> Sink queues --> writers
//!                                                     ^
//!                        broadcast (full sink) --evictions--+
//! ```
//!
//! The registry lock is held only for the duration of one map operation or
//! one non-blocking pass over the sinks. Nothing awaits while holding it.
//! A sink whose queue is full during a fan-out is skipped for that payload
//! and scheduled for removal through the eviction channel, so the fan-out
//! itself never waits on the removal.

mod sink;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

pub use sink::{DEFAULT_SINK_CAPACITY, Sink, SinkId, SinkQueue, SinkState, WriterExit, write_pump};

use self::sink::Enqueue;
use crate::HubSettings;
use crate::application::ports::{BroadcastPort, IntakeError};
use crate::domain::pricing::Payload;
use crate::infrastructure::metrics::{self, EvictionReason};

/// Default intake capacity.
pub const DEFAULT_INTAKE_CAPACITY: usize = 256;

// =============================================================================
// Configuration
// =============================================================================

/// Queue capacities for the hub and the sinks it serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubConfig {
    /// Capacity of the broadcast intake queue.
    pub intake_capacity: usize,
    /// Capacity of each connection sink's queue.
    pub sink_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            intake_capacity: DEFAULT_INTAKE_CAPACITY,
            sink_capacity: DEFAULT_SINK_CAPACITY,
        }
    }
}

impl From<HubSettings> for HubConfig {
    fn from(settings: HubSettings) -> Self {
        Self {
            intake_capacity: settings.intake_capacity,
            sink_capacity: settings.sink_capacity,
        }
    }
}

// =============================================================================
// Intake
// =============================================================================

/// Sending half of the hub's bounded intake queue.
#[derive(Debug, Clone)]
pub struct BroadcastIntake {
    tx: mpsc::Sender<Payload>,
}

impl BroadcastIntake {
    /// Create a bounded intake queue (capacity at least one).
    #[must_use]
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<Payload>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl BroadcastPort for BroadcastIntake {
    fn try_broadcast(&self, payload: Payload) -> Result<(), IntakeError> {
        self.tx.try_send(payload).map_err(|e| match e {
            TrySendError::Full(_) => IntakeError::Saturated,
            TrySendError::Closed(_) => IntakeError::Closed,
        })
    }
}

// =============================================================================
// Hub
// =============================================================================

/// Result of one fan-out pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOut {
    /// Sinks the payload was queued for.
    pub delivered: usize,
    /// Sinks scheduled for removal.
    pub evicted: usize,
}

struct HubReceivers {
    intake: mpsc::Receiver<Payload>,
    evictions: mpsc::UnboundedReceiver<(SinkId, EvictionReason)>,
}

/// Registry of connected sinks and the broadcast dispatcher.
pub struct Hub {
    config: HubConfig,
    registry: RwLock<HashMap<SinkId, Sink>>,
    intake: BroadcastIntake,
    evictions: mpsc::UnboundedSender<(SinkId, EvictionReason)>,
    receivers: Mutex<Option<HubReceivers>>,
    accepting: AtomicBool,
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("config", &self.config)
            .field("sinks", &self.count())
            .field("accepting", &self.accepting.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl Hub {
    /// Create a hub with the given capacities.
    #[must_use]
    pub fn new(config: HubConfig) -> Self {
        let (intake, intake_rx) = BroadcastIntake::bounded(config.intake_capacity);
        let (evictions, evictions_rx) = mpsc::unbounded_channel();
        Self {
            config,
            registry: RwLock::new(HashMap::new()),
            intake,
            evictions,
            receivers: Mutex::new(Some(HubReceivers {
                intake: intake_rx,
                evictions: evictions_rx,
            })),
            accepting: AtomicBool::new(true),
        }
    }

    /// Create a hub with default capacities.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(HubConfig::default())
    }

    /// Capacities this hub was built with.
    #[must_use]
    pub const fn config(&self) -> HubConfig {
        self.config
    }

    /// Create a sink sized for this hub. The sink is not registered.
    #[must_use]
    pub fn new_sink(&self) -> (Sink, SinkQueue) {
        Sink::new(self.config.sink_capacity)
    }

    /// Handle for non-blocking submission of payloads.
    #[must_use]
    pub fn intake(&self) -> BroadcastIntake {
        self.intake.clone()
    }

    /// Number of registered sinks.
    #[must_use]
    pub fn count(&self) -> usize {
        self.registry.read().len()
    }

    /// Check whether a sink is currently registered.
    #[must_use]
    pub fn contains(&self, sink: &Sink) -> bool {
        self.registry.read().contains_key(&sink.id())
    }

    /// Add a sink to the registry.
    ///
    /// Registering an already-registered sink is a no-op that returns `true`.
    /// Returns `false` if the sink is closed or the hub has shut down; the
    /// caller should then drop the connection.
    pub fn register(&self, sink: &Sink) -> bool {
        let mut registry = self.registry.write();
        if registry.contains_key(&sink.id()) {
            return true;
        }
        if !self.accepting.load(Ordering::Acquire) {
            drop(registry);
            sink.close();
            tracing::debug!(sink_id = %sink.id(), "Hub is shut down, rejecting sink");
            return false;
        }
        if !sink.mark_registered() {
            drop(registry);
            tracing::warn!(sink_id = %sink.id(), state = ?sink.state(), "Refusing to register sink");
            return false;
        }
        registry.insert(sink.id(), sink.clone());
        let total = registry.len();
        drop(registry);

        metrics::set_connected_sinks(total);
        tracing::info!(sink_id = %sink.id(), total, "Client connected");
        true
    }

    /// Remove a sink from the registry and close its queue.
    ///
    /// Unregistering a sink that is not registered is a no-op. Returns
    /// `true` if the sink was removed by this call.
    pub fn unregister(&self, sink: &Sink) -> bool {
        self.remove(sink.id()).is_some()
    }

    fn remove(&self, id: SinkId) -> Option<Sink> {
        let mut registry = self.registry.write();
        let sink = registry.remove(&id)?;
        let total = registry.len();
        drop(registry);

        sink.close();
        metrics::set_connected_sinks(total);
        tracing::info!(sink_id = %id, total, "Client disconnected");
        Some(sink)
    }

    /// Queue a payload for every registered sink without waiting.
    ///
    /// Sinks whose queue is full (or whose writer is gone) are skipped for
    /// this payload and scheduled for removal.
    pub fn broadcast(&self, payload: &Payload) -> FanOut {
        let started = Instant::now();
        let mut delivered = 0;
        let mut dead = Vec::new();

        {
            let registry = self.registry.read();
            for (id, sink) in registry.iter() {
                match sink.try_enqueue(Payload::clone(payload)) {
                    Enqueue::Delivered => delivered += 1,
                    Enqueue::Full => dead.push((*id, EvictionReason::QueueFull)),
                    Enqueue::Closed => dead.push((*id, EvictionReason::Disconnected)),
                }
            }
        }

        for (id, reason) in &dead {
            tracing::warn!(sink_id = %id, reason = ?reason, "Sink cannot keep up, scheduling removal");
            // The receiver lives as long as the hub.
            let _ = self.evictions.send((*id, *reason));
        }

        metrics::record_fanout_duration(started.elapsed());
        FanOut {
            delivered,
            evicted: dead.len(),
        }
    }

    fn evict(&self, id: SinkId, reason: EvictionReason) {
        if self.remove(id).is_some() {
            metrics::record_sink_evicted(reason);
        }
    }

    /// Close every sink and stop accepting registrations.
    fn close_all(&self) -> usize {
        self.accepting.store(false, Ordering::Release);
        let sinks: Vec<Sink> = self.registry.write().drain().map(|(_, sink)| sink).collect();
        for sink in &sinks {
            sink.close();
        }
        metrics::set_connected_sinks(0);
        sinks.len()
    }

    /// Dispatch intake payloads and evictions until cancelled.
    ///
    /// On cancellation, payloads already in the intake are fanned out, every
    /// sink is closed, and later registrations are refused. Only the first
    /// call runs; later calls return immediately.
    pub async fn run(&self, cancel: CancellationToken) {
        let receivers = self.receivers.lock().take();
        let Some(mut receivers) = receivers else {
            tracing::warn!("Hub dispatcher already started");
            return;
        };

        tracing::info!(
            intake_capacity = self.config.intake_capacity,
            sink_capacity = self.config.sink_capacity,
            "Hub started"
        );

        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => break,

                Some((id, reason)) = receivers.evictions.recv() => self.evict(id, reason),

                payload = receivers.intake.recv() => {
                    let Some(payload) = payload else { break };
                    let fanout = self.broadcast(&payload);
                    tracing::trace!(delivered = fanout.delivered, evicted = fanout.evicted, "Fan-out complete");
                }
            }
        }

        let mut drained = 0_usize;
        while let Ok(payload) = receivers.intake.try_recv() {
            self.broadcast(&payload);
            drained += 1;
        }
        while let Ok((id, reason)) = receivers.evictions.try_recv() {
            self.evict(id, reason);
        }
        let closed = self.close_all();

        tracing::info!(drained, closed, "Hub stopped");
    }
}

// =============================================================================
// Tests
// =============================================================================
