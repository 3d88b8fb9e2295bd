//! End-to-end tests over a real socket: fake upstream, live hub, axum
//! server, tokio-tungstenite client.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use price_relay::{
    AppState, BroadcastPort, HttpServer, Hub, Ingestor, IngestorConfig, UpstreamFeed,
};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;

use common::{ChannelFeed, eventually, ticker};

const WAIT: Duration = Duration::from_secs(5);

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Relay {
    addr: SocketAddr,
    feed: Arc<ChannelFeed>,
    hub: Arc<Hub>,
    ingestor: Arc<Ingestor>,
    hub_cancel: CancellationToken,
    server_cancel: CancellationToken,
}

impl Drop for Relay {
    fn drop(&mut self) {
        self.ingestor.stop();
        self.hub_cancel.cancel();
        self.server_cancel.cancel();
    }
}

async fn start_relay() -> Relay {
    let feed = Arc::new(ChannelFeed::default());
    let hub = Arc::new(Hub::with_defaults());
    let hub_cancel = CancellationToken::new();
    {
        let hub = Arc::clone(&hub);
        let cancel = hub_cancel.clone();
        tokio::spawn(async move { hub.run(cancel).await });
    }

    let upstream: Arc<dyn UpstreamFeed> = Arc::clone(&feed) as Arc<dyn UpstreamFeed>;
    let intake: Arc<dyn BroadcastPort> = Arc::new(hub.intake());
    let ingestor = Arc::new(Ingestor::new(
        IngestorConfig {
            throttle_interval: Duration::from_millis(50),
            watchlist: vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()],
            ..IngestorConfig::default()
        },
        upstream,
        intake,
    ));
    tokio::spawn(Arc::clone(&ingestor).start());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server_cancel = CancellationToken::new();
    let server = HttpServer::new(
        addr.port(),
        Arc::new(AppState::new(Arc::clone(&hub), Arc::clone(&ingestor))),
        server_cancel.clone(),
    );
    tokio::spawn(server.serve(listener));

    Relay {
        addr,
        feed,
        hub,
        ingestor,
        hub_cancel,
        server_cancel,
    }
}

async fn connect(relay: &Relay) -> Client {
    let url = format!("ws://{}/ws/prices", relay.addr);
    let (client, _response) = tokio::time::timeout(WAIT, connect_async(url.as_str()))
        .await
        .expect("connect timed out")
        .expect("websocket handshake failed");
    client
}

async fn next_message(client: &mut Client) -> Message {
    tokio::time::timeout(WAIT, client.next())
        .await
        .expect("no message in time")
        .expect("stream ended")
        .expect("read failed")
}

#[tokio::test]
async fn viewer_receives_coalesced_updates() {
    let relay = start_relay().await;
    let mut client = connect(&relay).await;
    eventually(WAIT, || relay.hub.count() == 1).await;

    let tx = relay.feed.sender().await;
    tx.send(ticker("BTCUSDT", "94250.50")).await.unwrap();
    tx.send(ticker("ETHUSDT", "3120")).await.unwrap();
    tx.send(ticker("BTCUSDT", "94251")).await.unwrap();

    // Updates may straddle a flush boundary; every frame still carries at
    // most one entry per symbol and the last price wins.
    loop {
        let message = next_message(&mut client).await;
        let value: serde_json::Value = serde_json::from_str(message.to_text().unwrap()).unwrap();
        assert_eq!(value["type"], "multi_update");

        let data = value["data"].as_array().unwrap();
        let btc: Vec<_> = data.iter().filter(|u| u["symbol"] == "BTCUSDT").collect();
        assert!(btc.len() <= 1, "{value}");
        for update in data {
            assert_eq!(update["timestamp"].as_str().unwrap().len(), "00:00:00.000".len());
        }
        if btc.first().is_some_and(|u| u["price"] == 94251) {
            break;
        }
    }
}

#[tokio::test]
async fn hub_shutdown_closes_the_connection() {
    let relay = start_relay().await;
    let mut client = connect(&relay).await;
    eventually(WAIT, || relay.hub.count() == 1).await;

    relay.hub_cancel.cancel();

    loop {
        match next_message(&mut client).await {
            Message::Close(_) => break,
            Message::Text(_) | Message::Ping(_) | Message::Pong(_) => {}
            other => panic!("unexpected frame: {other:?}"),
        }
    }
    assert_eq!(relay.hub.count(), 0);
}

#[tokio::test]
async fn client_disconnect_unregisters_the_viewer() {
    let relay = start_relay().await;
    let mut first = connect(&relay).await;
    let second = connect(&relay).await;
    eventually(WAIT, || relay.hub.count() == 2).await;

    first.close(None).await.unwrap();
    eventually(WAIT, || relay.hub.count() == 1).await;

    drop(second);
    eventually(WAIT, || relay.hub.count() == 0).await;
}

#[tokio::test]
async fn connections_after_shutdown_are_refused() {
    let relay = start_relay().await;
    relay.hub_cancel.cancel();
    let (late, _queue) = relay.hub.new_sink();
    eventually(WAIT, || !relay.hub.register(&late)).await;

    let mut client = connect(&relay).await;
    assert!(matches!(next_message(&mut client).await, Message::Close(_)));
    assert_eq!(relay.hub.count(), 0);
}
