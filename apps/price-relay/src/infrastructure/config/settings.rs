//! Relay Configuration Settings
//!
//! Configuration types for the price relay, loaded from environment
//! variables. Every value is optional; malformed numbers fall back to their
//! defaults.

use std::time::Duration;

use crate::domain::watchlist::DEFAULT_WATCHLIST;

/// Default upstream base URL.
pub const DEFAULT_STREAM_URL: &str = "wss://stream.binance.com:9443";

/// HTTP server settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Port for HTTP routes and the WebSocket endpoint.
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

/// Ingestor settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestorSettings {
    /// Flush period.
    pub throttle_interval: Duration,
    /// Initial watch-list.
    pub symbols: Vec<String>,
    /// Capacity of the upstream event channel.
    pub event_buffer: usize,
}

impl Default for IngestorSettings {
    fn default() -> Self {
        Self {
            throttle_interval: Duration::from_millis(500),
            symbols: DEFAULT_WATCHLIST.iter().map(ToString::to_string).collect(),
            event_buffer: 4096,
        }
    }
}

/// Hub queue settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubSettings {
    /// Capacity of the broadcast intake.
    pub intake_capacity: usize,
    /// Capacity of each connection sink.
    pub sink_capacity: usize,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            intake_capacity: 256,
            sink_capacity: 256,
        }
    }
}

/// Upstream feed settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamSettings {
    /// Base WebSocket URL of the ticker stream.
    pub stream_url: String,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            stream_url: DEFAULT_STREAM_URL.to_string(),
        }
    }
}

/// Upstream restart settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RestartSettings {
    /// Restart the upstream subscription when it ends or fails to connect.
    pub enabled: bool,
    /// Initial restart delay.
    pub delay_initial: Duration,
    /// Maximum restart delay.
    pub delay_max: Duration,
    /// Delay multiplier for exponential backoff.
    pub delay_multiplier: f64,
    /// Consecutive attempts before giving up (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for RestartSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            delay_initial: Duration::from_millis(500),
            delay_max: Duration::from_secs(30),
            delay_multiplier: 2.0,
            max_attempts: 0,
        }
    }
}

/// Complete relay configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayConfig {
    /// HTTP server settings.
    pub server: ServerSettings,
    /// Ingestor settings.
    pub ingestor: IngestorSettings,
    /// Hub settings.
    pub hub: HubSettings,
    /// Upstream feed settings.
    pub upstream: UpstreamSettings,
    /// Restart settings.
    pub restart: RestartSettings,
    /// Maximum wait for each shutdown stage.
    pub shutdown_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            ingestor: IngestorSettings::default(),
            hub: HubSettings::default(),
            upstream: UpstreamSettings::default(),
            restart: RestartSettings::default(),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl RelayConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `PRICE_RELAY_SYMBOLS` is set but names no symbol.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if `PRICE_RELAY_SYMBOLS` is set but names no symbol.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);
        let defaults = Self::default();

        let symbols = match env.get("PRICE_RELAY_SYMBOLS") {
            Some(raw) => {
                let symbols = parse_symbol_list(&raw);
                if symbols.is_empty() {
                    return Err(ConfigError::EmptyWatchlist);
                }
                symbols
            }
            None => defaults.ingestor.symbols,
        };

        let server = ServerSettings {
            port: env.parse("PORT", defaults.server.port),
        };

        let ingestor = IngestorSettings {
            throttle_interval: env.millis(
                "PRICE_RELAY_THROTTLE_MS",
                defaults.ingestor.throttle_interval,
            ),
            symbols,
            event_buffer: env.parse("PRICE_RELAY_EVENT_BUFFER", defaults.ingestor.event_buffer),
        };
        if ingestor.throttle_interval.is_zero() {
            return Err(ConfigError::InvalidValue("PRICE_RELAY_THROTTLE_MS".to_string()));
        }

        let hub = HubSettings {
            intake_capacity: env.parse("PRICE_RELAY_INTAKE_CAPACITY", defaults.hub.intake_capacity),
            sink_capacity: env.parse("PRICE_RELAY_SINK_CAPACITY", defaults.hub.sink_capacity),
        };

        let upstream = UpstreamSettings {
            stream_url: env
                .get("BINANCE_STREAM_URL")
                .map(|url| url.trim().trim_end_matches('/').to_string())
                .filter(|url| !url.is_empty())
                .unwrap_or(defaults.upstream.stream_url),
        };

        let restart = RestartSettings {
            enabled: env.flag("PRICE_RELAY_RESTART", defaults.restart.enabled),
            delay_initial: env.millis(
                "PRICE_RELAY_RESTART_DELAY_INITIAL_MS",
                defaults.restart.delay_initial,
            ),
            delay_max: env.secs(
                "PRICE_RELAY_RESTART_DELAY_MAX_SECS",
                defaults.restart.delay_max,
            ),
            delay_multiplier: env.parse(
                "PRICE_RELAY_RESTART_DELAY_MULTIPLIER",
                defaults.restart.delay_multiplier,
            ),
            max_attempts: env.parse("PRICE_RELAY_MAX_RESTARTS", defaults.restart.max_attempts),
        };

        Ok(Self {
            server,
            ingestor,
            hub,
            upstream,
            restart,
            shutdown_timeout: env.secs(
                "PRICE_RELAY_SHUTDOWN_TIMEOUT_SECS",
                defaults.shutdown_timeout,
            ),
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The symbol list contained no names.
    #[error("PRICE_RELAY_SYMBOLS must name at least one symbol")]
    EmptyWatchlist,
    /// A value is present but unusable.
    #[error("invalid value for environment variable {0}")]
    InvalidValue(String),
}

/// Split a comma-separated list, trimming and upper-casing each name and
/// dropping blanks.
fn parse_symbol_list(raw: &str) -> Vec<String> {
    let mut symbols: Vec<String> = Vec::new();
    for name in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let name = name.to_uppercase();
        if !symbols.contains(&name) {
            symbols.push(name);
        }
    }
    symbols
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        self.get(key).map_or(default, |v| {
            matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
        })
    }

    fn secs(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn millis(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<RelayConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        RelayConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config, RelayConfig::default());
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.ingestor.throttle_interval, Duration::from_millis(500));
        assert_eq!(config.ingestor.symbols.len(), 6);
        assert_eq!(config.hub.intake_capacity, 256);
        assert_eq!(config.hub.sink_capacity, 256);
        assert_eq!(config.upstream.stream_url, DEFAULT_STREAM_URL);
        assert!(!config.restart.enabled);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(5));
    }

    #[test]
    fn overrides_are_applied() {
        let config = config_from(&[
            ("PORT", "9000"),
            ("PRICE_RELAY_THROTTLE_MS", "250"),
            ("PRICE_RELAY_SYMBOLS", " btcusdt, ETHUSDT ,,btcusdt"),
            ("PRICE_RELAY_SINK_CAPACITY", "16"),
            ("BINANCE_STREAM_URL", "wss://example.test:9443/"),
            ("PRICE_RELAY_RESTART", "true"),
            ("PRICE_RELAY_MAX_RESTARTS", "7"),
        ])
        .unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.ingestor.throttle_interval, Duration::from_millis(250));
        assert_eq!(config.ingestor.symbols, vec!["BTCUSDT", "ETHUSDT"]);
        assert_eq!(config.hub.sink_capacity, 16);
        assert_eq!(config.upstream.stream_url, "wss://example.test:9443");
        assert!(config.restart.enabled);
        assert_eq!(config.restart.max_attempts, 7);
    }

    #[test]
    fn malformed_numbers_fall_back() {
        let config = config_from(&[("PORT", "eighty"), ("PRICE_RELAY_INTAKE_CAPACITY", "-1")]).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.hub.intake_capacity, 256);
    }

    #[test]
    fn blank_symbol_list_is_rejected() {
        let err = config_from(&[("PRICE_RELAY_SYMBOLS", " , ,")]).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyWatchlist));
    }

    #[test]
    fn zero_throttle_is_rejected() {
        let err = config_from(&[("PRICE_RELAY_THROTTLE_MS", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(key) if key == "PRICE_RELAY_THROTTLE_MS"));
    }

    #[test]
    fn restart_flag_values() {
        for value in ["1", "true", "YES", "on"] {
            assert!(config_from(&[("PRICE_RELAY_RESTART", value)]).unwrap().restart.enabled);
        }
        assert!(!config_from(&[("PRICE_RELAY_RESTART", "no")]).unwrap().restart.enabled);
    }
}
