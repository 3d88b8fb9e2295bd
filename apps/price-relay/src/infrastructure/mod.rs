//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Binance ticker stream adapter.
pub mod binance;

/// Broadcast hub and connection sinks.
pub mod broadcast;

/// Environment configuration.
pub mod config;

/// HTTP routes and the WebSocket price stream.
pub mod http;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Tracing subscriber and OpenTelemetry integration.
pub mod telemetry;
