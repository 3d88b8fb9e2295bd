//! Application Services
//!
//! Services that drive the relay pipeline through its ports.
//!
//! - [`Ingestor`]: upstream subscription, symbol cache, and throttled batching
//! - [`Lifecycle`]: ordered, idempotent shutdown of the pipeline
//! - [`RestartPolicy`]: backoff between upstream restarts

mod ingestor;
mod lifecycle;
mod restart;

pub use ingestor::{
    DEFAULT_EVENT_BUFFER, DEFAULT_THROTTLE_INTERVAL, FlushOutcome, Ingestor, IngestorConfig,
    IngestorError, PriceLookupError, RunExit,
};
pub use lifecycle::{Lifecycle, ShutdownOutcome, Stage};
pub use restart::{RestartConfig, RestartPolicy};
