//! Shared fakes for integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};

use price_relay::{FeedError, FeedEvent, FrameWriter, TickerEvent, UpstreamFeed, UpstreamHandle, WriteError};

/// A frame observed by [`RecordingWriter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Close,
}

/// Frame writer that records every frame and can be told to fail.
#[derive(Debug, Clone)]
pub struct RecordingWriter {
    frames: Arc<Mutex<Vec<Frame>>>,
    fail_after: Option<usize>,
}

impl RecordingWriter {
    pub fn new() -> (Self, Arc<Mutex<Vec<Frame>>>) {
        let frames = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                frames: Arc::clone(&frames),
                fail_after: None,
            },
            frames,
        )
    }

    /// Accept `n` text frames, then fail every write.
    pub fn failing_after(n: usize) -> (Self, Arc<Mutex<Vec<Frame>>>) {
        let (mut writer, frames) = Self::new();
        writer.fail_after = Some(n);
        (writer, frames)
    }
}

#[async_trait]
impl FrameWriter for RecordingWriter {
    async fn write_text(&mut self, payload: &str) -> Result<(), WriteError> {
        let mut frames = self.frames.lock();
        if self.fail_after.is_some_and(|n| frames.len() >= n) {
            return Err(WriteError("connection reset".to_string()));
        }
        frames.push(Frame::Text(payload.to_string()));
        Ok(())
    }

    async fn write_close(&mut self) -> Result<(), WriteError> {
        self.frames.lock().push(Frame::Close);
        Ok(())
    }
}

/// Upstream feed whose events are pushed by the test.
#[derive(Debug, Default)]
pub struct ChannelFeed {
    sender: Mutex<Option<mpsc::Sender<FeedEvent>>>,
    handle: Mutex<Option<Arc<UpstreamHandle>>>,
    subscriptions: Mutex<Vec<Vec<String>>>,
    subscribed: Notify,
}

impl ChannelFeed {
    /// Wait for the next subscription and return its event sender.
    pub async fn sender(&self) -> mpsc::Sender<FeedEvent> {
        loop {
            if let Some(tx) = self.sender.lock().clone() {
                return tx;
            }
            self.subscribed.notified().await;
        }
    }

    pub fn handle(&self) -> Option<Arc<UpstreamHandle>> {
        self.handle.lock().clone()
    }

    pub fn subscriptions(&self) -> Vec<Vec<String>> {
        self.subscriptions.lock().clone()
    }

    /// Simulate the upstream connection dropping.
    pub fn disconnect(&self) {
        self.sender.lock().take();
        if let Some(handle) = self.handle.lock().take() {
            handle.mark_done();
        }
    }
}

#[async_trait]
impl UpstreamFeed for ChannelFeed {
    async fn subscribe(
        &self,
        symbols: Vec<String>,
        events: mpsc::Sender<FeedEvent>,
    ) -> Result<Arc<UpstreamHandle>, FeedError> {
        let handle = Arc::new(UpstreamHandle::new());
        self.subscriptions.lock().push(symbols);
        *self.sender.lock() = Some(events);
        *self.handle.lock() = Some(Arc::clone(&handle));
        self.subscribed.notify_one();
        Ok(handle)
    }
}

pub fn ticker(symbol: &str, price: &str) -> FeedEvent {
    FeedEvent::Ticker(TickerEvent {
        symbol: symbol.to_string(),
        last_price: price.to_string(),
        price_change: "0.5".to_string(),
        price_change_percent: "0.01".to_string(),
        base_volume: "1000".to_string(),
    })
}

pub fn text_frames(frames: &Mutex<Vec<Frame>>) -> Vec<serde_json::Value> {
    frames
        .lock()
        .iter()
        .filter_map(|frame| match frame {
            Frame::Text(text) => Some(serde_json::from_str(text).unwrap()),
            Frame::Close => None,
        })
        .collect()
}

/// Poll `condition` until it holds, failing the test after `limit`.
pub async fn eventually<F>(limit: std::time::Duration, mut condition: F)
where
    F: FnMut() -> bool,
{
    tokio::time::timeout(limit, async {
        while !condition() {
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
