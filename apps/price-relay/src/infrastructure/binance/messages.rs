//! Binance Stream Message Types
//!
//! Wire types for the frames received on the combined ticker stream.
//! Numeric fields arrive as JSON strings and are kept that way; conversion
//! happens in the ingestor.
//!
//! # Combined Stream Envelope
//!
//! ```json
//! {"stream":"btcusdt@ticker","data":{"e":"24hrTicker","s":"BTCUSDT","c":"94250.50",...}}
//! ```

use serde::Deserialize;

use crate::application::ports::TickerEvent;

/// Event type of a 24h rolling ticker payload.
pub const TICKER_EVENT_TYPE: &str = "24hrTicker";

/// Combined-stream wrapper around every payload.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamEnvelope {
    /// Stream name, e.g. `btcusdt@ticker`.
    pub stream: String,
    /// The wrapped payload.
    pub data: serde_json::Value,
}

/// 24h rolling window ticker.
///
/// Only the fields the relay forwards are declared; the rest are ignored.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TickerMessage {
    /// Event type (`24hrTicker`).
    #[serde(rename = "e")]
    pub event_type: String,
    /// Event time in milliseconds since the epoch.
    #[serde(rename = "E", default)]
    pub event_time: i64,
    /// Symbol.
    #[serde(rename = "s")]
    pub symbol: String,
    /// Absolute price change.
    #[serde(rename = "p", default)]
    pub price_change: String,
    /// Percent price change.
    #[serde(rename = "P", default)]
    pub price_change_percent: String,
    /// Last price.
    #[serde(rename = "c", default)]
    pub last_price: String,
    /// Total traded base asset volume.
    #[serde(rename = "v", default)]
    pub base_volume: String,
}

impl From<TickerMessage> for TickerEvent {
    fn from(msg: TickerMessage) -> Self {
        Self {
            symbol: msg.symbol,
            last_price: msg.last_price,
            price_change: msg.price_change,
            price_change_percent: msg.price_change_percent,
            base_volume: msg.base_volume,
        }
    }
}

/// Error frame sent by the server.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ErrorMessage {
    /// Error code.
    pub code: i64,
    /// Error description.
    pub msg: String,
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BinanceMessage {
    /// Ticker update.
    Ticker(TickerMessage),
    /// Server-reported error.
    Error(ErrorMessage),
    /// Response to a control request (`{"result":null,"id":1}`).
    Ack,
}
