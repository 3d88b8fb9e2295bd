//! Stream Codec
//!
//! Decodes text frames from the ticker stream. Both the combined-stream
//! envelope and bare payloads (raw stream endpoints) are accepted.

use serde_json::Value;

use super::messages::{
    BinanceMessage, ErrorMessage, StreamEnvelope, TICKER_EVENT_TYPE, TickerMessage,
};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// The payload carries an event type the relay does not handle.
    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    /// The frame does not look like any known message.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
}

/// JSON codec for the ticker stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct TickerCodec;

impl TickerCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode one text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not valid JSON or is not a ticker,
    /// error, or ack frame.
    pub fn decode(&self, text: &str) -> Result<BinanceMessage, CodecError> {
        let value: Value = serde_json::from_str(text.trim())?;

        if value.get("stream").is_some() {
            let envelope: StreamEnvelope = serde_json::from_value(value)?;
            return Self::decode_payload(envelope.data);
        }

        Self::decode_payload(value)
    }

    fn decode_payload(value: Value) -> Result<BinanceMessage, CodecError> {
        match value.get("e").and_then(Value::as_str) {
            Some(TICKER_EVENT_TYPE) => {
                let msg: TickerMessage = serde_json::from_value(value)?;
                Ok(BinanceMessage::Ticker(msg))
            }
            Some(other) => Err(CodecError::UnknownEventType(other.to_string())),
            None if value.get("code").is_some() => {
                let msg: ErrorMessage = serde_json::from_value(value)?;
                Ok(BinanceMessage::Error(msg))
            }
            None if value.get("id").is_some() => Ok(BinanceMessage::Ack),
            None => {
                let raw = value.to_string();
                Err(CodecError::InvalidFormat(format!(
                    "unrecognized frame: {}...",
                    raw.chars().take(50).collect::<String>()
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMBINED: &str = r#"{"stream":"btcusdt@ticker","data":{"e":"24hrTicker","E":1,"s":"BTCUSDT","p":"150.5","P":"0.16","c":"94250.50","v":"12345.678"}}"#;

    #[test]
    fn decodes_combined_ticker() {
        let msg = TickerCodec::new().decode(COMBINED).unwrap();
        let BinanceMessage::Ticker(ticker) = msg else {
            panic!("expected ticker, got {msg:?}");
        };
        assert_eq!(ticker.symbol, "BTCUSDT");
        assert_eq!(ticker.last_price, "94250.50");
        assert_eq!(ticker.base_volume, "12345.678");
    }

    #[test]
    fn decodes_bare_ticker() {
        let msg = TickerCodec::new()
            .decode(r#"{"e":"24hrTicker","s":"SOLUSDT","c":"180.1"}"#)
            .unwrap();
        assert!(matches!(msg, BinanceMessage::Ticker(t) if t.symbol == "SOLUSDT" && t.price_change.is_empty()));
    }

    #[test]
    fn decodes_error_and_ack() {
        let codec = TickerCodec::new();
        assert_eq!(
            codec.decode(r#"{"code":2,"msg":"Invalid request"}"#).unwrap(),
            BinanceMessage::Error(ErrorMessage {
                code: 2,
                msg: "Invalid request".to_string()
            })
        );
        assert_eq!(
            codec.decode(r#"{"result":null,"id":1}"#).unwrap(),
            BinanceMessage::Ack
        );
    }

    #[test]
    fn rejects_other_events() {
        let err = TickerCodec::new()
            .decode(r#"{"stream":"btcusdt@trade","data":{"e":"trade","s":"BTCUSDT"}}"#)
            .unwrap_err();
        assert!(matches!(err, CodecError::UnknownEventType(t) if t == "trade"));
    }

    #[test]
    fn rejects_malformed_frames() {
        let codec = TickerCodec::new();
        assert!(matches!(codec.decode("not json"), Err(CodecError::Json(_))));
        assert!(matches!(
            codec.decode(r#"{"stream":"btcusdt@ticker"}"#),
            Err(CodecError::InvalidFormat(_))
        ));
        assert!(matches!(codec.decode("{}"), Err(CodecError::InvalidFormat(_))));
    }

    #[test]
    fn ticker_without_symbol_is_error() {
        let err = TickerCodec::new()
            .decode(r#"{"e":"24hrTicker","c":"1"}"#)
            .unwrap_err();
        assert!(matches!(err, CodecError::Json(_)));
    }
}
