//! Streamer Session Integration Tests
//!
//! Drives the connection manager and price aggregator against a local
//! WebSocket server that speaks the streamer protocol.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::frame::Frame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::{Data, OpCode};
use tokio_util::sync::CancellationToken;

use portfolio_tracker::application::ports::PriceNotifier;
use portfolio_tracker::infrastructure::config::ApiKey;
use portfolio_tracker::infrastructure::cryptocompare::{HeartbeatConfig, ReconnectConfig};
use portfolio_tracker::{
    BroadcastHub, ConnectionManager, ConnectionState, PairKey, PriceAggregator, PriceTable,
    SharedPriceTable, StreamerConfig,
};

const WELCOME: &str = r#"{"TYPE":"20","MESSAGE":"STREAMERWELCOME"}"#;
const WAIT: Duration = Duration::from_secs(5);

/// What a fake session does after sending the welcome frame.
#[derive(Debug, Clone, Copy)]
enum Behavior {
    /// Reads commands and answers pings.
    Responsive,
    /// Never reads, so pings go unanswered.
    Silent,
}

/// One accepted client connection.
struct Session {
    index: usize,
    outbound: mpsc::UnboundedSender<Message>,
}

impl Session {
    fn send_json(&self, value: &Value) {
        self.outbound
            .send(Message::Text(value.to_string().into()))
            .unwrap();
    }

    /// Text frame whose payload is not UTF-8.
    fn send_invalid_text(&self) {
        let frame = Frame::message(vec![0xC3, 0x28], OpCode::Data(Data::Text), true);
        self.outbound.send(Message::Frame(frame)).unwrap();
    }
}

struct FakeStreamer {
    url: String,
    sessions: mpsc::UnboundedReceiver<Session>,
    commands: mpsc::UnboundedReceiver<(usize, Value)>,
    closes: mpsc::UnboundedReceiver<usize>,
}

impl FakeStreamer {
    async fn next_session(&mut self) -> Session {
        timeout(WAIT, self.sessions.recv()).await.unwrap().unwrap()
    }

    async fn next_command(&mut self) -> (usize, Value) {
        timeout(WAIT, self.commands.recv()).await.unwrap().unwrap()
    }

    async fn no_session_within(&mut self, window: Duration) -> bool {
        timeout(window, self.sessions.recv()).await.is_err()
    }
}

async fn start_streamer(behaviors: Vec<Behavior>) -> FakeStreamer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (sessions_tx, sessions) = mpsc::unbounded_channel();
    let (commands_tx, commands) = mpsc::unbounded_channel();
    let (closes_tx, closes) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut index = 0;
        while let Ok((stream, _)) = listener.accept().await {
            let behavior = behaviors.get(index).copied().unwrap_or(Behavior::Responsive);
            tokio::spawn(serve_session(
                stream,
                index,
                behavior,
                sessions_tx.clone(),
                commands_tx.clone(),
                closes_tx.clone(),
            ));
            index += 1;
        }
    });

    FakeStreamer {
        url: format!("ws://{addr}/v2"),
        sessions,
        commands,
        closes,
    }
}

async fn serve_session(
    stream: tokio::net::TcpStream,
    index: usize,
    behavior: Behavior,
    sessions_tx: mpsc::UnboundedSender<Session>,
    commands_tx: mpsc::UnboundedSender<(usize, Value)>,
    closes_tx: mpsc::UnboundedSender<usize>,
) {
    let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    let (mut write, mut read) = ws.split();
    if write.send(Message::Text(WELCOME.into())).await.is_err() {
        return;
    }

    let (outbound, mut outbound_rx) = mpsc::unbounded_channel();
    let _ = sessions_tx.send(Session { index, outbound });

    match behavior {
        Behavior::Silent => {
            let _read = read;
            while let Some(msg) = outbound_rx.recv().await {
                if write.send(msg).await.is_err() {
                    break;
                }
            }
        }
        Behavior::Responsive => loop {
            tokio::select! {
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        let value: Value = serde_json::from_str(&text).unwrap();
                        let _ = commands_tx.send((index, value));
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) => {
                        let _ = closes_tx.send(index);
                        let _ = write.flush().await;
                        break;
                    }
                    Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                },
                Some(msg) = outbound_rx.recv() => {
                    let closing = matches!(msg, Message::Close(_));
                    if write.send(msg).await.is_err() || closing {
                        break;
                    }
                }
            }
        },
    }
}

fn pair(s: &str) -> PairKey {
    s.parse().unwrap()
}

fn tokens(command: &Value) -> BTreeSet<String> {
    command["subs"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t.as_str().unwrap().to_string())
        .collect()
}

fn fast_config(url: &str) -> StreamerConfig {
    let mut config = StreamerConfig::new(url, ApiKey::new("test-key".to_string()));
    config.reconnect = ReconnectConfig {
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        ..ReconnectConfig::default()
    }
    .without_jitter();
    config
}

struct Tracker {
    manager: Arc<ConnectionManager>,
    table: SharedPriceTable,
    shutdown: CancellationToken,
}

fn tracker(config: StreamerConfig) -> Tracker {
    let hub = Arc::new(BroadcastHub::with_defaults());
    let table: SharedPriceTable = Arc::new(RwLock::new(PriceTable::new()));
    let notifier: Arc<dyn PriceNotifier> = Arc::clone(&hub) as Arc<dyn PriceNotifier>;
    let aggregator = Arc::new(PriceAggregator::new(Arc::clone(&table), "USD", notifier));
    let shutdown = CancellationToken::new();
    tokio::spawn(Arc::clone(&aggregator).run(hub.ticker_updates_rx(), shutdown.clone()));

    Tracker {
        manager: Arc::new(ConnectionManager::new(config, hub)),
        table,
        shutdown,
    }
}

async fn wait_for_pair(table: &SharedPriceTable, from: &str, to: &str) -> f64 {
    timeout(WAIT, async {
        loop {
            if let Some(ticker) = table.read().get_pair(from, to) {
                return ticker.price;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap()
}

#[tokio::test]
async fn ticker_frame_reaches_price_table() {
    let mut streamer = start_streamer(vec![Behavior::Responsive]).await;
    let tracker = tracker(fast_config(&streamer.url));
    let mut updates = tracker.manager.ticker_updates();

    tracker.manager.subscribe(&[pair("BTC-USD")]);
    timeout(WAIT, tracker.manager.connect()).await.unwrap().unwrap();
    assert_eq!(tracker.manager.state(), ConnectionState::Open);

    let session = streamer.next_session().await;
    let (_, command) = streamer.next_command().await;
    assert_eq!(
        command,
        json!({"action": "SubAdd", "subs": ["5~CCCAGG~BTC~USD"]})
    );

    session.send_json(&json!({"TYPE": "5", "FROMSYMBOL": "ETH", "TOSYMBOL": "USD", "PRICE": 0, "LASTUPDATE": 1_700_000_000}));
    session.send_json(&json!({"TYPE": "5", "FROMSYMBOL": "BTC", "TOSYMBOL": "USD", "PRICE": 50000, "LASTUPDATE": 1_700_000_000}));

    let price = wait_for_pair(&tracker.table, "BTC", "USD").await;
    assert!((price - 50_000.0).abs() < f64::EPSILON);

    let update = timeout(WAIT, updates.recv()).await.unwrap().unwrap();
    assert_eq!(update.from, "BTC");
    assert!(updates.try_recv().is_err());
    assert!(tracker.table.read().get_pair("ETH", "USD").is_none());

    tracker.manager.disconnect().await;
    tracker.shutdown.cancel();
}

#[tokio::test]
async fn bridged_price_is_derived_from_btc_fiat() {
    let mut streamer = start_streamer(vec![Behavior::Responsive]).await;
    let tracker = tracker(fast_config(&streamer.url));

    tracker.manager.subscribe(&[pair("BTC-USD"), pair("XMR-BTC")]);
    timeout(WAIT, tracker.manager.connect()).await.unwrap().unwrap();
    let session = streamer.next_session().await;

    session.send_json(&json!({"TYPE": "5", "FROMSYMBOL": "BTC", "TOSYMBOL": "USD", "PRICE": 50000, "LASTUPDATE": 1_700_000_000}));
    wait_for_pair(&tracker.table, "BTC", "USD").await;
    session.send_json(&json!({"TYPE": "5", "FROMSYMBOL": "XMR", "TOSYMBOL": "BTC", "PRICE": 0.002, "LASTUPDATE": 1_700_000_000}));
    wait_for_pair(&tracker.table, "XMR", "BTC").await;

    let derived = tracker
        .table
        .read()
        .get_pair("XMR", "BTC")
        .and_then(|t| t.derived_fiat_price)
        .unwrap();
    assert!((derived - 100.0).abs() < 1e-9);

    tracker.manager.disconnect().await;
    tracker.shutdown.cancel();
}

#[tokio::test]
async fn subscriptions_are_replayed_after_peer_close() {
    let mut streamer = start_streamer(vec![Behavior::Responsive, Behavior::Responsive]).await;
    let tracker = tracker(fast_config(&streamer.url));

    tracker.manager.subscribe(&[pair("BTC-USD"), pair("ETH-USD")]);
    timeout(WAIT, tracker.manager.connect()).await.unwrap().unwrap();
    let first = streamer.next_session().await;
    let (index, command) = streamer.next_command().await;
    assert_eq!(index, 0);
    assert_eq!(tokens(&command).len(), 2);

    tracker.manager.subscribe(&[pair("ADA-BTC")]);
    let (_, command) = streamer.next_command().await;
    assert_eq!(command["action"], "SubAdd");
    assert_eq!(tokens(&command), BTreeSet::from(["5~CCCAGG~ADA~BTC".to_string()]));

    first.outbound.send(Message::Close(None)).unwrap();

    let second = streamer.next_session().await;
    assert_eq!(second.index, 1);
    let (index, command) = streamer.next_command().await;
    assert_eq!(index, 1);
    assert_eq!(
        tokens(&command),
        BTreeSet::from([
            "5~CCCAGG~ADA~BTC".to_string(),
            "5~CCCAGG~BTC~USD".to_string(),
            "5~CCCAGG~ETH~USD".to_string(),
        ])
    );

    let mut states = tracker.manager.state_changes();
    timeout(WAIT, states.wait_for(|s| *s == ConnectionState::Open))
        .await
        .unwrap()
        .unwrap();

    tracker.manager.disconnect().await;
    tracker.shutdown.cancel();
}

#[tokio::test]
async fn unanswered_pings_force_reconnect() {
    let mut streamer = start_streamer(vec![Behavior::Silent, Behavior::Responsive]).await;
    let mut config = fast_config(&streamer.url);
    config.heartbeat = HeartbeatConfig::new(Duration::from_millis(50), 3);
    let tracker = tracker(config);

    tracker.manager.subscribe(&[pair("BTC-USD")]);
    timeout(WAIT, tracker.manager.connect()).await.unwrap().unwrap();
    let silent = streamer.next_session().await;
    assert_eq!(silent.index, 0);

    let replacement = streamer.next_session().await;
    assert_eq!(replacement.index, 1);

    let (index, command) = streamer.next_command().await;
    assert_eq!(index, 1);
    assert_eq!(
        command,
        json!({"action": "SubAdd", "subs": ["5~CCCAGG~BTC~USD"]})
    );

    tracker.manager.disconnect().await;
    tracker.shutdown.cancel();
}

#[tokio::test]
async fn transport_error_leaves_reconnect_to_heartbeat() {
    let mut streamer = start_streamer(vec![Behavior::Responsive, Behavior::Responsive]).await;
    let mut config = fast_config(&streamer.url);
    let interval = Duration::from_millis(300);
    config.heartbeat = HeartbeatConfig::new(interval, 3);
    let tracker = tracker(config);

    timeout(WAIT, tracker.manager.connect()).await.unwrap().unwrap();
    let session = streamer.next_session().await;
    assert_eq!(session.index, 0);

    session.send_invalid_text();
    session.send_json(&json!({"TYPE": "5", "FROMSYMBOL": "BTC", "TOSYMBOL": "USD", "PRICE": 50000, "LASTUPDATE": 1_700_000_000}));

    assert!(streamer.no_session_within(interval).await);
    assert_eq!(tracker.manager.state(), ConnectionState::Open);
    assert!(tracker.table.read().get_pair("BTC", "USD").is_none());

    // Nothing is read after the error, so the heartbeat window expires.
    let replacement = streamer.next_session().await;
    assert_eq!(replacement.index, 1);

    tracker.manager.disconnect().await;
    tracker.shutdown.cancel();
}

#[tokio::test]
async fn unsubscribe_while_open_sends_sub_remove() {
    let mut streamer = start_streamer(vec![Behavior::Responsive]).await;
    let tracker = tracker(fast_config(&streamer.url));

    tracker.manager.subscribe(&[pair("BTC-USD"), pair("ETH-USD")]);
    timeout(WAIT, tracker.manager.connect()).await.unwrap().unwrap();
    streamer.next_command().await;

    tracker.manager.unsubscribe(&[pair("ETH-USD"), pair("DOGE-USD")]);
    let (_, command) = streamer.next_command().await;
    assert_eq!(
        command,
        json!({"action": "SubRemove", "subs": ["5~CCCAGG~ETH~USD"]})
    );
    assert_eq!(tracker.manager.subscriptions(), vec![pair("BTC-USD")]);

    tracker.manager.disconnect().await;
    tracker.shutdown.cancel();
}

#[tokio::test]
async fn disconnect_is_terminal() {
    let mut streamer = start_streamer(vec![Behavior::Responsive]).await;
    let tracker = tracker(fast_config(&streamer.url));

    timeout(WAIT, tracker.manager.connect()).await.unwrap().unwrap();
    streamer.next_session().await;

    timeout(WAIT, tracker.manager.disconnect()).await.unwrap();
    assert_eq!(tracker.manager.state(), ConnectionState::Closed);
    assert_eq!(streamer.closes.try_recv().unwrap(), 0);

    tracker.manager.subscribe(&[pair("BTC-USD")]);
    assert_eq!(tracker.manager.state(), ConnectionState::Closed);
    assert_eq!(tracker.manager.subscriptions(), vec![pair("BTC-USD")]);
    tracker.shutdown.cancel();
}
