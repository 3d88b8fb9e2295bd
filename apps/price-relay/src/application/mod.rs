//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the ingestion and lifecycle services and the port
//! interfaces that decouple them from the upstream feed, the broadcast hub
//! and the connection transport.

/// Port interfaces for external systems (upstream feed, broadcast, writers).
pub mod ports;

/// Application services for ingestion and lifecycle management.
pub mod services;
