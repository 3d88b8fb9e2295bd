//! Configuration Module
//!
//! Environment-driven configuration for the relay.

mod settings;

pub use settings::{
    ConfigError, DEFAULT_STREAM_URL, HubSettings, IngestorSettings, RelayConfig, RestartSettings,
    ServerSettings, UpstreamSettings,
};
