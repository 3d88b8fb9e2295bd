//! Price Ingestor
//!
//! Subscribes to the upstream ticker feed, keeps the symbol cache current,
//! coalesces events into a pending batch, and hands one serialized batch to
//! the broadcast hub per throttle interval.
//!
//! # Concurrency
//!
//! The event path and the flush loop run as separate tasks. The pending batch
//! is the only state they share; it sits behind a mutex held just long enough
//! to upsert one update or swap the whole batch out. Serialization and the
//! hub hand-off happen after the lock is released.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, Utc};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::restart::{RestartConfig, RestartPolicy};
use crate::IngestorSettings;
use crate::application::ports::{
    BroadcastPort, FeedError, FeedEvent, IntakeError, TickerEvent, UpstreamFeed, UpstreamHandle,
};
use crate::domain::pricing::{Batch, PriceUpdate, parse_decimal_or_zero};
use crate::domain::watchlist::{DEFAULT_WATCHLIST, Observation, PriceLookup, SymbolCache};
use crate::infrastructure::metrics::{self, DropReason};

/// Default flush period.
pub const DEFAULT_THROTTLE_INTERVAL: Duration = Duration::from_millis(500);

/// Default capacity of the upstream event channel.
pub const DEFAULT_EVENT_BUFFER: usize = 4096;

// =============================================================================
// Configuration and Errors
// =============================================================================

/// Ingestor configuration, fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestorConfig {
    /// Period between flushes.
    pub throttle_interval: Duration,
    /// Initial watch-list.
    pub watchlist: Vec<String>,
    /// Capacity of the channel between the upstream adapter and the ingestor.
    pub event_buffer: usize,
}

impl Default for IngestorConfig {
    fn default() -> Self {
        Self {
            throttle_interval: DEFAULT_THROTTLE_INTERVAL,
            watchlist: DEFAULT_WATCHLIST.iter().map(ToString::to_string).collect(),
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl From<IngestorSettings> for IngestorConfig {
    fn from(settings: IngestorSettings) -> Self {
        Self {
            throttle_interval: settings.throttle_interval,
            watchlist: settings.symbols,
            event_buffer: settings.event_buffer,
        }
    }
}

/// Errors surfaced by [`Ingestor::start`].
#[derive(Debug, thiserror::Error)]
pub enum IngestorError {
    /// The upstream subscription could not be opened.
    #[error("failed to connect to upstream: {0}")]
    Connect(#[from] FeedError),

    /// The ingestor has been stopped and cannot run again.
    #[error("ingestor has been stopped")]
    Stopped,
}

/// Failed price lookup.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PriceLookupError {
    /// The symbol is not on the watch-list.
    #[error("symbol not found: {0}")]
    NotFound(String),

    /// The symbol is watched but has not received an event yet.
    #[error("no price data yet for {0}")]
    NoDataYet(String),
}

/// Why [`Ingestor::start`] returned without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    /// The watch-list was empty; nothing was subscribed.
    Idle,
    /// [`Ingestor::stop`] was called.
    Cancelled,
    /// The upstream connection ended on its own.
    UpstreamEnded,
}

/// Result of one flush cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was pending.
    Idle,
    /// A batch with this many symbols was handed to the hub.
    Broadcast(usize),
    /// The batch was discarded.
    Dropped(DropReason),
}

// =============================================================================
// Pending Batch
// =============================================================================

/// The pending batch shared by the event path and the flush loop.
#[derive(Debug, Default)]
struct Coalescer {
    batch: Mutex<Batch>,
}

impl Coalescer {
    fn upsert(&self, update: PriceUpdate) {
        self.batch.lock().upsert(update);
    }

    /// Swap the pending batch for an empty one.
    fn take(&self) -> Batch {
        std::mem::take(&mut *self.batch.lock())
    }

    fn len(&self) -> usize {
        self.batch.lock().len()
    }
}

// =============================================================================
// Ingestor
// =============================================================================

/// Upstream-to-hub coalescing stage.
pub struct Ingestor {
    config: IngestorConfig,
    feed: Arc<dyn UpstreamFeed>,
    broadcast: Arc<dyn BroadcastPort>,
    cache: RwLock<SymbolCache>,
    pending: Coalescer,
    cancel: CancellationToken,
    handles: Mutex<Vec<Arc<UpstreamHandle>>>,
}

impl std::fmt::Debug for Ingestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ingestor")
            .field("config", &self.config)
            .field("pending", &self.pending.len())
            .field("stopped", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Ingestor {
    /// Create an ingestor over a feed and a hub intake.
    #[must_use]
    pub fn new(
        config: IngestorConfig,
        feed: Arc<dyn UpstreamFeed>,
        broadcast: Arc<dyn BroadcastPort>,
    ) -> Self {
        let cache = SymbolCache::new(config.watchlist.iter().cloned());
        Self {
            config,
            feed,
            broadcast,
            cache: RwLock::new(cache),
            pending: Coalescer::default(),
            cancel: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Configuration this ingestor was built with.
    #[must_use]
    pub const fn config(&self) -> &IngestorConfig {
        &self.config
    }

    /// Check whether [`stop`](Self::stop) has been called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Number of symbols waiting for the next flush.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    // =========================================================================
    // Run
    // =========================================================================

    /// Subscribe to the current watch-list and process events until the
    /// upstream connection ends or [`stop`](Self::stop) is called.
    ///
    /// The flush loop runs for exactly as long as this call. When the
    /// upstream ends, whatever is pending is flushed once more before
    /// returning. With an empty watch-list this returns [`RunExit::Idle`]
    /// without subscribing.
    ///
    /// # Errors
    ///
    /// Returns [`IngestorError::Connect`] if the subscription cannot be
    /// opened, or [`IngestorError::Stopped`] if the ingestor was stopped.
    pub async fn start(self: Arc<Self>) -> Result<RunExit, IngestorError> {
        if self.is_stopped() {
            return Err(IngestorError::Stopped);
        }

        let symbols = self.symbols();
        if symbols.is_empty() {
            tracing::info!("Watch-list is empty, nothing to subscribe");
            return Ok(RunExit::Idle);
        }

        let (events_tx, mut events) = mpsc::channel(self.config.event_buffer.max(1));
        let handle = match self.feed.subscribe(symbols.clone(), events_tx).await {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!(error = %e, "Failed to connect to upstream feed");
                return Err(e.into());
            }
        };
        {
            let mut handles = self.handles.lock();
            handles.retain(|h| !h.is_closed());
            handles.push(Arc::clone(&handle));
        }
        if self.is_stopped() {
            handle.close();
            return Ok(RunExit::Cancelled);
        }

        tracing::info!(
            symbols = ?symbols,
            throttle_ms = self.config.throttle_interval.as_millis(),
            "Ingestor started"
        );

        let run = self.cancel.child_token();
        let _run_guard = run.clone().drop_guard();
        let flusher = tokio::spawn(Arc::clone(&self).flush_loop(run.clone()));

        let exit = loop {
            tokio::select! {
                biased;

                () = run.cancelled() => break RunExit::Cancelled,

                event = events.recv() => match event {
                    Some(FeedEvent::Ticker(ticker)) => self.handle_ticker(&ticker),
                    Some(FeedEvent::Error(message)) => {
                        metrics::record_upstream_error();
                        tracing::warn!(error = %message, "Upstream feed error");
                    }
                    None => break RunExit::UpstreamEnded,
                },

                () = handle.done() => {
                    while let Ok(event) = events.try_recv() {
                        if let FeedEvent::Ticker(ticker) = event {
                            self.handle_ticker(&ticker);
                        }
                    }
                    break RunExit::UpstreamEnded;
                }
            }
        };

        run.cancel();
        if let Err(e) = flusher.await {
            tracing::error!(error = %e, "Flush loop panicked");
        }
        handle.close();

        match exit {
            RunExit::UpstreamEnded => {
                // Updates received before the disconnect still go out.
                let last = self.flush();
                tracing::warn!(last_flush = ?last, "Upstream connection ended");
            }
            _ => tracing::info!("Ingestor stopped"),
        }
        Ok(exit)
    }

    /// Run [`start`](Self::start) repeatedly, backing off between attempts,
    /// until stopped or the restart budget is spent.
    ///
    /// A run that connected resets the backoff.
    ///
    /// # Errors
    ///
    /// Returns the last connect error once attempts are exhausted.
    pub async fn supervise(self: Arc<Self>, config: RestartConfig) -> Result<(), IngestorError> {
        let mut policy = RestartPolicy::new(config);

        loop {
            let error = match Arc::clone(&self).start().await {
                Ok(RunExit::Idle | RunExit::Cancelled) | Err(IngestorError::Stopped) => return Ok(()),
                Ok(RunExit::UpstreamEnded) => {
                    policy.reset();
                    None
                }
                Err(e) => Some(e),
            };

            let Some(delay) = policy.next_delay() else {
                tracing::error!(attempts = policy.attempts(), "Giving up on upstream restarts");
                return error.map_or(Ok(()), Err);
            };

            metrics::record_upstream_restart();
            tracing::info!(
                attempt = policy.attempts(),
                delay_ms = delay.as_millis(),
                "Restarting upstream subscription"
            );

            tokio::select! {
                () = self.cancel.cancelled() => return Ok(()),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Raise the stop signal and close every upstream handle opened so far.
    ///
    /// Safe to call any number of times.
    pub fn stop(&self) {
        if !self.cancel.is_cancelled() {
            tracing::info!("Stopping ingestor");
        }
        self.cancel.cancel();

        let closed = self
            .handles
            .lock()
            .iter()
            .filter(|handle| handle.close())
            .count();
        if closed > 0 {
            tracing::debug!(closed, "Closed upstream handles");
        }
    }

    // =========================================================================
    // Event Path
    // =========================================================================

    fn handle_ticker(&self, ticker: &TickerEvent) {
        let price = parse_decimal_or_zero(&ticker.last_price);
        let change = parse_decimal_or_zero(&ticker.price_change);
        let change_percent = parse_decimal_or_zero(&ticker.price_change_percent);
        let volume = parse_decimal_or_zero(&ticker.base_volume);
        let now = Utc::now();

        let watched = self.cache.write().observe(
            &ticker.symbol,
            Observation {
                price,
                change,
                change_percent,
                volume,
                at: now,
            },
        );

        self.pending.upsert(PriceUpdate::new(
            ticker.symbol.clone(),
            price,
            change,
            change_percent,
            volume,
            &now.with_timezone(&Local),
        ));

        metrics::record_event_received();
        tracing::trace!(symbol = %ticker.symbol, price = %price, watched, "Ticker received");
    }

    // =========================================================================
    // Flush Path
    // =========================================================================

    async fn flush_loop(self: Arc<Self>, cancel: CancellationToken) {
        let period = self.config.throttle_interval.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.flush();
                }
            }
        }
        tracing::debug!("Flush loop stopped");
    }

    /// Run one flush cycle.
    ///
    /// The pending batch is emptied whatever the outcome; a dropped batch is
    /// never retried.
    pub fn flush(&self) -> FlushOutcome {
        let batch = self.pending.take();
        if batch.is_empty() {
            return FlushOutcome::Idle;
        }
        let symbols = batch.len();

        let payload = match batch.to_payload() {
            Ok(payload) => payload,
            Err(e) => {
                metrics::record_batch_dropped(DropReason::Serialization);
                tracing::warn!(error = %e, symbols, "Failed to serialize batch, skipping cycle");
                return FlushOutcome::Dropped(DropReason::Serialization);
            }
        };

        match self.broadcast.try_broadcast(payload) {
            Ok(()) => {
                metrics::record_batch_broadcast(symbols);
                tracing::debug!(symbols, "Broadcasted symbol updates");
                FlushOutcome::Broadcast(symbols)
            }
            Err(IntakeError::Saturated) => {
                metrics::record_batch_dropped(DropReason::Saturated);
                tracing::warn!(symbols, "Broadcast intake full, dropping batch");
                FlushOutcome::Dropped(DropReason::Saturated)
            }
            Err(IntakeError::Closed) => {
                metrics::record_batch_dropped(DropReason::Closed);
                tracing::warn!(symbols, "Broadcast intake closed, dropping batch");
                FlushOutcome::Dropped(DropReason::Closed)
            }
        }
    }

    // =========================================================================
    // Watch-list
    // =========================================================================

    /// Add a symbol to the watch-list. Applies from the next subscription.
    ///
    /// Returns `false` if it was already watched.
    pub fn add_symbol(&self, name: &str) -> bool {
        let added = self.cache.write().add(name);
        if added {
            tracing::info!(symbol = name, "Symbol added to watch-list");
        }
        added
    }

    /// Remove a symbol from the watch-list. Applies from the next
    /// subscription.
    ///
    /// Returns `false` if it was not watched.
    pub fn remove_symbol(&self, name: &str) -> bool {
        let removed = self.cache.write().remove(name);
        if removed {
            tracing::info!(symbol = name, "Symbol removed from watch-list");
        }
        removed
    }

    /// Snapshot of the watch-list.
    #[must_use]
    pub fn symbols(&self) -> Vec<String> {
        self.cache.read().names()
    }

    /// Last cached price for a symbol.
    ///
    /// # Errors
    ///
    /// Returns [`PriceLookupError::NotFound`] for a symbol that is not
    /// watched and [`PriceLookupError::NoDataYet`] for one that has not
    /// received an event.
    pub fn current_price(&self, name: &str) -> Result<Decimal, PriceLookupError> {
        match self.cache.read().price(name) {
            PriceLookup::Price(price) => Ok(price),
            PriceLookup::NoDataYet => Err(PriceLookupError::NoDataYet(name.to_string())),
            PriceLookup::NotFound => Err(PriceLookupError::NotFound(name.to_string())),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
