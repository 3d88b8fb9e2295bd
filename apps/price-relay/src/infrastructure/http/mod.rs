//! HTTP and WebSocket Serving Layer
//!
//! Thin boundary over the hub and the ingestor. Viewers connect to
//! `/ws/prices`; every other route is read-only status.
//!
//! # Endpoints
//!
//! - `GET /` - Service info
//! - `GET /health` - JSON status with the number of connected viewers
//! - `GET /healthz` - Liveness probe (simple OK)
//! - `GET /metrics` - Prometheus metrics in text format
//! - `GET /api/symbols` - Current watch-list
//! - `GET /api/prices/{symbol}` - Last cached price for one symbol
//! - `GET /ws/prices` - WebSocket stream of `multi_update` batches

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{FrameWriter, WriteError};
use crate::application::services::{Ingestor, PriceLookupError};
use crate::domain::pricing::serialize_decimal_number;
use crate::infrastructure::broadcast::{Hub, WriterExit, write_pump};
use crate::infrastructure::metrics::get_metrics_handle;

/// Service name reported by `/`.
pub const SERVICE_NAME: &str = "price-relay";

/// How long a connection waits for its writer to send the close frame.
const WRITER_GRACE: Duration = Duration::from_secs(2);

// =============================================================================
// Response Types
// =============================================================================

/// Body of `GET /`.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceInfo {
    /// Service name.
    pub service: &'static str,
    /// Crate version.
    pub version: &'static str,
    /// Path of the price stream.
    pub stream: &'static str,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `ok` while the process serves requests.
    pub status: &'static str,
    /// Connected viewers.
    pub active_clients: usize,
    /// Watched symbols.
    pub symbols: usize,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
}

/// Body of `GET /api/symbols`.
#[derive(Debug, Clone, Serialize)]
pub struct SymbolsResponse {
    /// Watch-list.
    pub symbols: Vec<String>,
}

/// Body of a successful `GET /api/prices/{symbol}`.
#[derive(Debug, Clone, Serialize)]
pub struct PriceResponse {
    /// Symbol.
    pub symbol: String,
    /// Last cached price.
    #[serde(serialize_with = "serialize_decimal_number")]
    pub price: Decimal,
}

/// Body of a failed lookup.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Human-readable reason.
    pub error: String,
}

// =============================================================================
// State
// =============================================================================

/// Shared state for the HTTP server.
#[derive(Debug)]
pub struct AppState {
    hub: Arc<Hub>,
    ingestor: Arc<Ingestor>,
    started_at: Instant,
}

impl AppState {
    /// Create server state.
    #[must_use]
    pub fn new(hub: Arc<Hub>, ingestor: Arc<Ingestor>) -> Self {
        Self {
            hub,
            ingestor,
            started_at: Instant::now(),
        }
    }
}

/// Build the router over shared state.
#[must_use]
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(info_handler))
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/metrics", get(metrics_handler))
        .route("/api/symbols", get(symbols_handler))
        .route("/api/prices/{symbol}", get(price_handler))
        .route("/ws/prices", get(ws_handler))
        .with_state(state)
}

// =============================================================================
// Server
// =============================================================================

/// HTTP server for status routes and the price stream.
pub struct HttpServer {
    port: u16,
    state: Arc<AppState>,
    cancel: CancellationToken,
}

impl HttpServer {
    /// Create a new server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<AppState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Bind the configured port and serve until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HttpServerError` if binding fails or the server hits a fatal
    /// error while running.
    pub async fn run(self) -> Result<(), HttpServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HttpServerError::BindFailed(self.port, e.to_string()))?;
        self.serve(listener).await
    }

    /// Serve on an already-bound listener until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HttpServerError::ServerFailed` on a fatal server error.
    pub async fn serve(self, listener: TcpListener) -> Result<(), HttpServerError> {
        let local = listener.local_addr().ok();
        tracing::info!(addr = ?local, "HTTP server listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HttpServerError::ServerFailed(e.to_string()))?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn info_handler() -> impl IntoResponse {
    Json(ServiceInfo {
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
        stream: "/ws/prices",
    })
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        active_clients: state.hub.count(),
        symbols: state.ingestor.symbols().len(),
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

async fn symbols_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(SymbolsResponse {
        symbols: state.ingestor.symbols(),
    })
}

async fn price_handler(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
) -> Response {
    let symbol = symbol.to_uppercase();
    match state.ingestor.current_price(&symbol) {
        Ok(price) => Json(PriceResponse { symbol, price }).into_response(),
        Err(e) => {
            let status = match e {
                PriceLookupError::NotFound(_) => StatusCode::NOT_FOUND,
                PriceLookupError::NoDataYet(_) => StatusCode::CONFLICT,
            };
            (status, Json(ErrorResponse { error: e.to_string() })).into_response()
        }
    }
}

// =============================================================================
// WebSocket
// =============================================================================

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Write half of an upgraded connection.
struct SocketWriter(SplitSink<WebSocket, Message>);

#[async_trait]
impl FrameWriter for SocketWriter {
    async fn write_text(&mut self, payload: &str) -> Result<(), WriteError> {
        self.0
            .send(Message::Text(payload.into()))
            .await
            .map_err(|e| WriteError(e.to_string()))
    }

    async fn write_close(&mut self) -> Result<(), WriteError> {
        self.0
            .send(Message::Close(None))
            .await
            .map_err(|e| WriteError(e.to_string()))
    }
}

/// Register one viewer, run its writer, and unregister it when either side
/// ends.
async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>) {
    let (sink, queue) = state.hub.new_sink();
    if !state.hub.register(&sink) {
        if let Err(e) = socket.send(Message::Close(None)).await {
            tracing::debug!(
                sink_id = %sink.id(),
                error = %e,
                "Error sending close frame to rejected client"
            );
        }
        return;
    }
    let sink_id = sink.id();

    let (writer, mut reader) = socket.split();
    let mut writer_task = tokio::spawn(write_pump(queue, SocketWriter(writer)));
    let mut writer_exit = None;

    loop {
        tokio::select! {
            exit = &mut writer_task => {
                writer_exit = Some(exit);
                break;
            }
            frame = reader.next() => match frame {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(sink_id = %sink_id, error = %e, "Client read error");
                    break;
                }
            }
        }
    }

    state.hub.unregister(&sink);

    let exit = match writer_exit {
        Some(exit) => Some(exit),
        None => tokio::time::timeout(WRITER_GRACE, &mut writer_task).await.ok(),
    };
    match exit {
        Some(Ok(WriterExit::WriteFailed)) => {
            tracing::debug!(sink_id = %sink_id, "Connection ended after write failure");
        }
        Some(Ok(WriterExit::QueueClosed)) => {}
        Some(Err(e)) => tracing::error!(sink_id = %sink_id, error = %e, "Writer task failed"),
        None => {
            writer_task.abort();
            tracing::debug!(sink_id = %sink_id, "Writer did not finish in time");
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// HTTP server errors.
#[derive(Debug, thiserror::Error)]
pub enum HttpServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
