#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::default_trait_access,
        clippy::items_after_statements
    )
)]

//! Price Relay - Throttled Market Data Fan-out
//!
//! Maintains one upstream subscription to the Binance 24h ticker stream,
//! coalesces the high-frequency events into one snapshot per throttle
//! interval, and fans every snapshot out to all connected WebSocket viewers.
//! A slow viewer is disconnected rather than allowed to stall the others.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure data types
//!   - `pricing`: Price updates, coalescing batches, wire format
//!   - `watchlist`: Watched symbols and their last known state
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Upstream feed, broadcast intake, connection writer
//!   - `services`: Ingestor, shutdown lifecycle, restart policy
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `binance`: WebSocket client for the combined ticker stream
//!   - `broadcast`: Hub registry, sinks, writer tasks
//!   - `http`: Status routes and the `/ws/prices` endpoint
//!   - `config`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//! Binance WS --> Ingestor --(every 500ms)--> Hub --> Sink --> writer --> viewer 1
//!                (coalesce)                     \--> Sink --> writer --> viewer 2
//!                                                \-> Sink --> writer --> viewer N
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::pricing::{Batch, Payload, PriceUpdate};
pub use domain::watchlist::{DEFAULT_WATCHLIST, SymbolCache, SymbolState};

// Ports
pub use application::ports::{
    BroadcastPort, FeedError, FeedEvent, FrameWriter, IntakeError, TickerEvent, UpstreamFeed,
    UpstreamHandle, WriteError,
};

// Services
pub use application::services::{
    FlushOutcome, Ingestor, IngestorConfig, IngestorError, Lifecycle, PriceLookupError,
    RestartConfig, RunExit, ShutdownOutcome, Stage,
};

// Infrastructure config
pub use infrastructure::config::{
    ConfigError, HubSettings, IngestorSettings, RelayConfig, RestartSettings, ServerSettings,
    UpstreamSettings,
};

// Broadcast hub
pub use infrastructure::broadcast::{
    BroadcastIntake, Hub, HubConfig, Sink, SinkId, SinkQueue, SinkState, WriterExit, write_pump,
};

// Upstream adapter
pub use infrastructure::binance::{BinanceFeed, BinanceFeedConfig};

// HTTP server
pub use infrastructure::http::{AppState, HttpServer, HttpServerError, router};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
