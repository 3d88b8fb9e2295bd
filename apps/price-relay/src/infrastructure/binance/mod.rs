//! Binance Ticker Stream Adapter
//!
//! Implements [`UpstreamFeed`](crate::application::ports::UpstreamFeed) over
//! Binance's combined-stream WebSocket endpoint, subscribing to the 24h
//! rolling ticker of each watched symbol.
//!
//! # Modules
//!
//! - [`messages`]: wire types for ticker, error, and ack frames
//! - [`codec`]: JSON decoding of combined-stream frames
//! - [`client`]: connection and reader task

pub mod client;
pub mod codec;
pub mod messages;

pub use client::{BinanceFeed, BinanceFeedConfig};
