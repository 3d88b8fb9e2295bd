//! Shutdown Coordination
//!
//! Tears the pipeline down in a fixed order:
//!
//! 1. stop the ingestor (flush loop halts, upstream handles close)
//! 2. cancel the hub and wait for in-flight broadcasts to drain
//! 3. cancel the serving layer
//!
//! Every wait is bounded by the drain timeout.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::Ingestor;

/// A cancellable background stage and, optionally, the task running it.
#[derive(Debug)]
pub struct Stage {
    name: &'static str,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Stage {
    /// A stage whose task is awaited after cancellation.
    #[must_use]
    pub fn new(name: &'static str, cancel: CancellationToken, task: JoinHandle<()>) -> Self {
        Self {
            name,
            cancel,
            task: Mutex::new(Some(task)),
        }
    }

    /// A stage that is only signalled.
    #[must_use]
    pub fn detached(name: &'static str, cancel: CancellationToken) -> Self {
        Self {
            name,
            cancel,
            task: Mutex::new(None),
        }
    }

    /// Cancel and wait up to `timeout` for the task. Returns `false` on
    /// timeout.
    async fn stop(&self, timeout: Duration) -> bool {
        self.cancel.cancel();
        let task = self.task.lock().take();
        let Some(task) = task else {
            return true;
        };
        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::error!(stage = self.name, error = %e, "Stage task failed");
                true
            }
            Err(_) => {
                tracing::warn!(stage = self.name, timeout_ms = timeout.as_millis(), "Stage did not stop in time");
                false
            }
        }
    }
}

/// Result of a [`Lifecycle::shutdown`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every stage stopped within the timeout.
    Clean,
    /// At least one stage was abandoned after the timeout.
    TimedOut,
    /// An earlier call already performed the shutdown.
    AlreadyShutDown,
}

/// Owns the shutdown order for the relay.
#[derive(Debug)]
pub struct Lifecycle {
    ingestor: Arc<Ingestor>,
    hub: Stage,
    server: Stage,
    drain_timeout: Duration,
    shut_down: AtomicBool,
}

impl Lifecycle {
    /// Create a coordinator.
    #[must_use]
    pub const fn new(ingestor: Arc<Ingestor>, hub: Stage, server: Stage, drain_timeout: Duration) -> Self {
        Self {
            ingestor,
            hub,
            server,
            drain_timeout,
            shut_down: AtomicBool::new(false),
        }
    }

    /// Check whether shutdown has begun.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Shut the pipeline down. Only the first call does any work.
    pub async fn shutdown(&self) -> ShutdownOutcome {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            tracing::debug!("Shutdown already performed");
            return ShutdownOutcome::AlreadyShutDown;
        }

        tracing::info!("Shutting down");
        self.ingestor.stop();
        let hub_drained = self.hub.stop(self.drain_timeout).await;
        let server_stopped = self.server.stop(self.drain_timeout).await;

        if hub_drained && server_stopped {
            tracing::info!("Shutdown complete");
            ShutdownOutcome::Clean
        } else {
            ShutdownOutcome::TimedOut
        }
    }
}
