//! Ticker Stream Client
//!
//! Opens one combined-stream connection per subscription and runs a reader
//! task that forwards decoded tickers to the ingestor.
//!
//! # Stream URL
//!
//! `<base>/stream?streams=btcusdt@ticker/ethusdt@ticker/...`
//!
//! # Connection End
//!
//! The reader stops on a close frame, end of stream, read error, or when
//! the subscription handle is closed. Whatever the cause, it marks the
//! handle done on the way out. Reconnecting is not this module's concern.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

use super::codec::TickerCodec;
use super::messages::BinanceMessage;
use crate::UpstreamSettings;
use crate::application::ports::{FeedError, FeedEvent, UpstreamFeed, UpstreamHandle};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the ticker stream client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinanceFeedConfig {
    /// Base WebSocket URL, without a trailing slash.
    pub base_url: String,
}

impl Default for BinanceFeedConfig {
    fn default() -> Self {
        Self::from(&UpstreamSettings::default())
    }
}

impl From<&UpstreamSettings> for BinanceFeedConfig {
    fn from(settings: &UpstreamSettings) -> Self {
        Self {
            base_url: settings.stream_url.trim_end_matches('/').to_string(),
        }
    }
}

impl BinanceFeedConfig {
    /// Build the combined-stream URL for a set of symbols.
    #[must_use]
    pub fn stream_url(&self, symbols: &[String]) -> String {
        let streams = symbols
            .iter()
            .map(|symbol| format!("{}@ticker", symbol.to_lowercase()))
            .collect::<Vec<_>>()
            .join("/");
        format!("{}/stream?streams={streams}", self.base_url)
    }
}

// =============================================================================
// Feed
// =============================================================================

/// Upstream feed backed by the Binance 24h ticker stream.
#[derive(Debug, Clone, Default)]
pub struct BinanceFeed {
    config: BinanceFeedConfig,
    codec: TickerCodec,
}

impl BinanceFeed {
    /// Create a new feed.
    #[must_use]
    pub const fn new(config: BinanceFeedConfig) -> Self {
        Self {
            config,
            codec: TickerCodec::new(),
        }
    }
}

#[async_trait]
impl UpstreamFeed for BinanceFeed {
    async fn subscribe(
        &self,
        symbols: Vec<String>,
        events: mpsc::Sender<FeedEvent>,
    ) -> Result<Arc<UpstreamHandle>, FeedError> {
        if symbols.is_empty() {
            return Err(FeedError::NoSymbols);
        }

        let url = self.config.stream_url(&symbols);
        tracing::info!(url = %url, symbols = symbols.len(), "Connecting to ticker stream");

        let (ws_stream, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| FeedError::Connect(e.to_string()))?;

        tracing::info!("Ticker stream connected");

        let handle = Arc::new(UpstreamHandle::new());
        tokio::spawn(read_frames(
            ws_stream,
            self.codec,
            events,
            Arc::clone(&handle),
        ));
        Ok(handle)
    }
}

/// Forward frames from one connection until it ends or the handle closes.
async fn read_frames<S>(
    mut ws: WebSocketStream<S>,
    codec: TickerCodec,
    events: mpsc::Sender<FeedEvent>,
    handle: Arc<UpstreamHandle>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            () = handle.closed() => {
                tracing::debug!("Closing ticker stream on request");
                if let Err(e) = ws.close(None).await {
                    tracing::debug!(error = %e, "Error closing ticker stream");
                }
                break;
            }
            frame = ws.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let event = match codec.decode(text.as_str()) {
                        Ok(BinanceMessage::Ticker(ticker)) => FeedEvent::Ticker(ticker.into()),
                        Ok(BinanceMessage::Error(error)) => {
                            FeedEvent::Error(format!("upstream error {}: {}", error.code, error.msg))
                        }
                        Ok(BinanceMessage::Ack) => continue,
                        Err(e) => FeedEvent::Error(e.to_string()),
                    };
                    if events.send(event).await.is_err() {
                        tracing::debug!("Event receiver dropped, closing ticker stream");
                        break;
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = ws.send(Message::Pong(data)).await {
                        tracing::warn!(error = %e, "Failed to answer ping");
                        break;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(frame = ?frame, "Server sent close frame");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Ticker stream read error");
                    break;
                }
                None => {
                    tracing::info!("Ticker stream ended");
                    break;
                }
            }
        }
    }

    handle.mark_done();
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::net::TcpListener;

    use super::*;

    const TICKER: &str = r#"{"stream":"btcusdt@ticker","data":{"e":"24hrTicker","s":"BTCUSDT","p":"1","P":"0.1","c":"100.5","v":"10"}}"#;

    async fn local_feed() -> (BinanceFeed, TcpListener) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let feed = BinanceFeed::new(BinanceFeedConfig {
            base_url: format!("ws://{addr}"),
        });
        (feed, listener)
    }

    #[test]
    fn stream_url_lists_every_symbol() {
        let config = BinanceFeedConfig {
            base_url: "wss://stream.example:9443".to_string(),
        };
        let url = config.stream_url(&["BTCUSDT".to_string(), "EthUsdt".to_string()]);
        assert_eq!(
            url,
            "wss://stream.example:9443/stream?streams=btcusdt@ticker/ethusdt@ticker"
        );
    }

    #[test]
    fn default_config_trims_trailing_slash() {
        let config = BinanceFeedConfig::from(&UpstreamSettings {
            stream_url: "wss://host:9443/".to_string(),
        });
        assert_eq!(config.base_url, "wss://host:9443");
        assert_eq!(
            BinanceFeedConfig::default().base_url,
            "wss://stream.binance.com:9443"
        );
    }

    #[tokio::test]
    async fn empty_symbol_list_is_rejected() {
        let (tx, _rx) = mpsc::channel(1);
        let err = BinanceFeed::default().subscribe(vec![], tx).await.unwrap_err();
        assert!(matches!(err, FeedError::NoSymbols));
    }

    #[tokio::test]
    async fn connect_failure_is_reported() {
        let (feed, listener) = local_feed().await;
        drop(listener);

        let (tx, _rx) = mpsc::channel(1);
        let err = feed.subscribe(vec!["BTCUSDT".to_string()], tx).await.unwrap_err();
        assert!(matches!(err, FeedError::Connect(_)));
    }

    #[tokio::test]
    async fn forwards_tickers_and_errors_until_close() {
        let (feed, listener) = local_feed().await;
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            ws.send(Message::Text(TICKER.into())).await.unwrap();
            ws.send(Message::Text(r#"{"result":null,"id":1}"#.into())).await.unwrap();
            ws.send(Message::Text("garbage".into())).await.unwrap();
            ws.close(None).await.unwrap();
        });

        let (tx, mut rx) = mpsc::channel(8);
        let handle = feed.subscribe(vec!["BTCUSDT".to_string()], tx).await.unwrap();

        let first = rx.recv().await.unwrap();
        let FeedEvent::Ticker(ticker) = first else {
            panic!("expected ticker, got {first:?}");
        };
        assert_eq!(ticker.symbol, "BTCUSDT");
        assert_eq!(ticker.last_price, "100.5");

        assert!(matches!(rx.recv().await, Some(FeedEvent::Error(_))));

        tokio::time::timeout(Duration::from_secs(5), handle.done())
            .await
            .unwrap();
        assert!(!handle.is_closed());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn closing_handle_ends_connection() {
        let (feed, listener) = local_feed().await;
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            while let Some(Ok(frame)) = ws.next().await {
                if frame.is_close() {
                    break;
                }
            }
        });

        let (tx, _rx) = mpsc::channel(8);
        let handle = feed.subscribe(vec!["BTCUSDT".to_string()], tx).await.unwrap();

        assert!(handle.close());
        assert!(!handle.close());
        tokio::time::timeout(Duration::from_secs(5), handle.done())
            .await
            .unwrap();
        server.await.unwrap();
    }
}
