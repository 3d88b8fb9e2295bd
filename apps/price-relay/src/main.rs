//! Price Relay Binary
//!
//! Starts the throttled price relay.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin price-relay
//! ```
//!
//! # Environment Variables
//!
//! - `PORT`: HTTP/WebSocket port (default: 8080)
//! - `PRICE_RELAY_THROTTLE_MS`: Flush period (default: 500)
//! - `PRICE_RELAY_SYMBOLS`: Comma-separated watch-list (default: six majors)
//! - `PRICE_RELAY_EVENT_BUFFER`: Upstream event channel capacity (default: 4096)
//! - `PRICE_RELAY_INTAKE_CAPACITY`: Hub intake capacity (default: 256)
//! - `PRICE_RELAY_SINK_CAPACITY`: Per-viewer queue capacity (default: 256)
//! - `PRICE_RELAY_SHUTDOWN_TIMEOUT_SECS`: Max wait per shutdown stage (default: 5)
//! - `BINANCE_STREAM_URL`: Upstream base URL (default: <wss://stream.binance.com:9443>)
//! - `PRICE_RELAY_RESTART`: Restart the upstream subscription when it ends (default: false)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `RUST_LOG`: Log filter (default: `price_relay=info`)

use std::sync::Arc;

use price_relay::infrastructure::telemetry;
use price_relay::{
    AppState, BinanceFeed, BinanceFeedConfig, BroadcastPort, HttpServer, Hub, HubConfig, Ingestor,
    IngestorConfig, Lifecycle, RelayConfig, RestartConfig, Stage, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    let _telemetry_guard = telemetry::init()?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting price relay");

    let _metrics_handle = init_metrics()?;

    let config = RelayConfig::from_env()?;
    log_config(&config);

    // Hub dispatcher
    let hub = Arc::new(Hub::new(HubConfig::from(config.hub)));
    let hub_cancel = CancellationToken::new();
    let hub_task = {
        let hub = Arc::clone(&hub);
        let cancel = hub_cancel.clone();
        tokio::spawn(async move { hub.run(cancel).await })
    };

    // Ingestor over the Binance ticker stream
    let feed = Arc::new(BinanceFeed::new(BinanceFeedConfig::from(&config.upstream)));
    let intake: Arc<dyn BroadcastPort> = Arc::new(hub.intake());
    let ingestor = Arc::new(Ingestor::new(
        IngestorConfig::from(config.ingestor.clone()),
        feed,
        intake,
    ));

    let ingest_task = Arc::clone(&ingestor);
    let restart = config.restart.enabled.then(|| RestartConfig::from(&config.restart));
    tokio::spawn(async move {
        let result = match restart {
            Some(restart) => ingest_task.supervise(restart).await,
            None => ingest_task.start().await.map(|exit| {
                tracing::info!(exit = ?exit, "Ingestor finished");
            }),
        };
        if let Err(e) = result {
            tracing::error!(error = %e, "Ingestor error");
        }
    });

    // HTTP server
    let server_cancel = CancellationToken::new();
    let server = HttpServer::new(
        config.server.port,
        Arc::new(AppState::new(Arc::clone(&hub), Arc::clone(&ingestor))),
        server_cancel.clone(),
    );
    let server_task = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            tracing::error!(error = %e, "HTTP server error");
        }
    });

    let lifecycle = Lifecycle::new(
        ingestor,
        Stage::new("hub", hub_cancel, hub_task),
        Stage::new("http", server_cancel, server_task),
        config.shutdown_timeout,
    );

    tracing::info!("Price relay ready");

    await_shutdown().await;
    tracing::info!(
        timeout_secs = config.shutdown_timeout.as_secs(),
        "Graceful shutdown started"
    );
    let outcome = lifecycle.shutdown().await;

    tracing::info!(outcome = ?outcome, "Price relay stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &RelayConfig) {
    tracing::info!(
        port = config.server.port,
        throttle_ms = config.ingestor.throttle_interval.as_millis(),
        symbols = ?config.ingestor.symbols,
        intake_capacity = config.hub.intake_capacity,
        sink_capacity = config.hub.sink_capacity,
        restart = config.restart.enabled,
        "Configuration loaded"
    );
    tracing::debug!(stream_url = %config.upstream.stream_url, "Upstream endpoint");
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for SIGTERM or SIGINT.
#[allow(clippy::expect_used)]
async fn await_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
