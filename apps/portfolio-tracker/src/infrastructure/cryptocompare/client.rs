//! Streamer Connection Manager
//!
//! Owns the single WebSocket session to the CryptoCompare streamer and keeps
//! it alive: heartbeat monitoring, reconnection with backoff, and replay of
//! every desired subscription whenever a session opens.
//!
//! # Stream URL
//!
//! - Production: `wss://streamer.cryptocompare.com/v2?api_key=<key>`
//!
//! # States
//!
//! ```text
//! Idle ─connect─► Connecting ─STREAMERWELCOME─► Open
//!                     ▲                          │ heartbeat timeout / close
//!                     └────── Reconnecting ◄─────┘
//! any ─disconnect─► Closed
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;

use super::dispatcher::{FeedEvent, MessageDispatcher};
use super::heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState};
use super::messages::{SubscriptionRequest, connection_url};
use super::reconnect::{ReconnectConfig, ReconnectError, ReconnectPolicy};
use crate::domain::streaming::{PairKey, TickerUpdate};
use crate::domain::subscription::SubscriptionRegistry;
use crate::infrastructure::broadcast::SharedBroadcastHub;
use crate::infrastructure::config::{ApiKey, StreamSettings};
use crate::infrastructure::metrics::{self, ReconnectReason};

/// How long `disconnect()` waits for the streamer to answer the close frame.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

// =============================================================================
// Error Type
// =============================================================================

/// Errors that can occur in the connection manager.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// The endpoint cannot be turned into a WebSocket request.
    #[error("invalid streamer endpoint: {0}")]
    InvalidRequest(#[source] tungstenite::Error),

    /// The endpoint is not a `ws://` or `wss://` URL.
    #[error("unsupported streamer endpoint scheme: {0}")]
    UnsupportedScheme(String),

    /// `connect()` was already called on this manager.
    #[error("connection manager already started")]
    AlreadyStarted,

    /// The manager closed before a session opened.
    #[error("connection closed before the session opened")]
    Closed,

    /// WebSocket handshake failed.
    #[error("WebSocket connection failed: {0}")]
    Connect(#[source] tungstenite::Error),

    /// Ping could not be written.
    #[error("failed to send ping: {0}")]
    PingFailed(#[source] tungstenite::Error),

    /// No pong during a full heartbeat window.
    #[error("heartbeat timeout")]
    HeartbeatTimeout,

    /// Provider closed the socket or the stream ended.
    #[error("connection closed by streamer")]
    ClosedByPeer,
}

impl StreamError {
    /// Reconnect reason label for session-ending errors.
    const fn reconnect_reason(&self) -> ReconnectReason {
        match self {
            Self::HeartbeatTimeout => ReconnectReason::HeartbeatTimeout,
            Self::PingFailed(_) => ReconnectReason::PingFailed,
            Self::ClosedByPeer => ReconnectReason::Closed,
            _ => ReconnectReason::ConnectFailed,
        }
    }
}

// =============================================================================
// Connection State
// =============================================================================

/// Lifecycle state of the connection manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Created, `connect()` not yet called.
    Idle,
    /// Opening a socket and waiting for the welcome frame.
    Connecting,
    /// Session open, subscriptions flowing.
    Open,
    /// Waiting out the backoff delay before the next attempt.
    Reconnecting,
    /// Terminal.
    Closed,
}

impl ConnectionState {
    /// Lower-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Reconnecting => "reconnecting",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the connection manager.
#[derive(Debug, Clone)]
pub struct StreamerConfig {
    /// Streamer endpoint, without the API key.
    pub url: String,
    /// API credential appended to the endpoint.
    pub api_key: ApiKey,
    /// Reconnection configuration.
    pub reconnect: ReconnectConfig,
    /// Heartbeat configuration.
    pub heartbeat: HeartbeatConfig,
}

impl StreamerConfig {
    /// Create a configuration with default heartbeat and backoff.
    #[must_use]
    pub fn new(url: impl Into<String>, api_key: ApiKey) -> Self {
        Self {
            url: url.into(),
            api_key,
            reconnect: ReconnectConfig::default(),
            heartbeat: HeartbeatConfig::default(),
        }
    }

    /// Build from the stream settings section of the tracker config.
    #[must_use]
    pub fn from_settings(settings: &StreamSettings) -> Self {
        Self {
            url: settings.url.clone(),
            api_key: settings.api_key.clone(),
            reconnect: ReconnectConfig::from_stream_settings(settings),
            heartbeat: HeartbeatConfig::new(
                settings.heartbeat_interval,
                settings.heartbeat_max_lost,
            ),
        }
    }
}

// =============================================================================
// Connection Manager
// =============================================================================

/// Registry plus the outbound command channel of the open session, if any.
#[derive(Debug, Default)]
struct Inner {
    registry: SubscriptionRegistry,
    outbound: Option<mpsc::UnboundedSender<SubscriptionRequest>>,
}

/// Resilient streamer connection.
///
/// Manages the connection lifecycle including:
/// - Session open detection (`STREAMERWELCOME`)
/// - Heartbeat monitoring with ping/pong counting
/// - Automatic reconnection with exponential backoff
/// - Subscription replay on every open
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
///
/// use portfolio_tracker::infrastructure::broadcast::BroadcastHub;
/// use portfolio_tracker::infrastructure::config::ApiKey;
/// use portfolio_tracker::infrastructure::cryptocompare::{ConnectionManager, StreamerConfig};
///
/// async fn example() -> Result<(), Box<dyn std::error::Error>> {
///     let config = StreamerConfig::new(
///         "wss://streamer.cryptocompare.com/v2",
///         ApiKey::new("key".to_string()),
///     );
///     let manager = Arc::new(ConnectionManager::new(config, Arc::new(BroadcastHub::with_defaults())));
///
///     let mut updates = manager.ticker_updates();
///     manager.connect().await?;
///     manager.subscribe(&["BTC-USD".parse()?]);
///
///     while let Ok(update) = updates.recv().await {
///         println!("{}-{}: {}", update.from, update.to, update.price);
///     }
///     manager.disconnect().await;
///     Ok(())
/// }
/// ```
pub struct ConnectionManager {
    config: StreamerConfig,
    dispatcher: MessageDispatcher,
    hub: SharedBroadcastHub,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    /// Create a new, idle connection manager publishing into `hub`.
    #[must_use]
    pub fn new(config: StreamerConfig, hub: SharedBroadcastHub) -> Self {
        Self {
            config,
            dispatcher: MessageDispatcher::new(),
            hub,
            inner: Mutex::new(Inner::default()),
            state_tx: watch::Sender::new(ConnectionState::Idle),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// Open the session and wait until the streamer confirms it.
    ///
    /// Connection failures before the first open are retried with backoff;
    /// this only returns once the session is open or the manager closed.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is invalid, if called more than
    /// once, or if the manager closed (disconnect or exhausted attempts)
    /// before a session opened.
    pub async fn connect(self: &Arc<Self>) -> Result<(), StreamError> {
        let url = connection_url(&self.config.url, self.config.api_key.expose());
        let request = url.as_str().into_client_request().map_err(StreamError::InvalidRequest)?;
        match request.uri().scheme_str() {
            Some("ws" | "wss") => {}
            other => return Err(StreamError::UnsupportedScheme(other.unwrap_or("").to_string())),
        }

        let mut state_rx = self.state_tx.subscribe();
        {
            let mut task = self.task.lock();
            if task.is_some() || *self.state_tx.borrow() != ConnectionState::Idle {
                return Err(StreamError::AlreadyStarted);
            }
            self.set_state(ConnectionState::Connecting);
            *task = Some(tokio::spawn(Arc::clone(self).run(url)));
        }

        let state = state_rx
            .wait_for(|s| matches!(s, ConnectionState::Open | ConnectionState::Closed))
            .await
            .map(|s| *s)
            .map_err(|_| StreamError::Closed)?;

        match state {
            ConnectionState::Open => Ok(()),
            _ => Err(StreamError::Closed),
        }
    }

    /// Close the session and stop reconnecting. Idempotent.
    ///
    /// Waits briefly for the streamer to answer the close frame.
    pub async fn disconnect(&self) {
        self.cancel.cancel();

        let handle = self.task.lock().take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            tracing::warn!(error = %e, "Connection task ended abnormally");
        }

        self.detach_session();
        self.set_state(ConnectionState::Closed);
        tracing::debug!("Disconnected");
    }

    /// Add pairs to the desired set.
    ///
    /// While a session is open the new pairs are subscribed immediately;
    /// otherwise they are replayed on the next open.
    pub fn subscribe(&self, pairs: &[PairKey]) {
        let mut inner = self.inner.lock();
        let added = inner.registry.subscribe(pairs);
        metrics::set_subscriptions(inner.registry.len());
        if added.is_empty() {
            return;
        }

        let sent = inner
            .outbound
            .as_ref()
            .is_some_and(|tx| tx.send(SubscriptionRequest::add(&added)).is_ok());
        if sent {
            inner.registry.mark_registered(&added);
            tracing::debug!(count = added.len(), "Subscribing");
        } else {
            tracing::debug!(count = added.len(), "Subscriptions queued until session opens");
        }
    }

    /// Remove pairs from the desired set.
    ///
    /// Pairs registered on the open session are unsubscribed immediately.
    pub fn unsubscribe(&self, pairs: &[PairKey]) {
        let mut inner = self.inner.lock();
        let removed = inner.registry.unsubscribe(pairs);
        metrics::set_subscriptions(inner.registry.len());
        if removed.is_empty() {
            return;
        }

        if let Some(tx) = inner.outbound.as_ref()
            && tx.send(SubscriptionRequest::remove(&removed)).is_ok()
        {
            tracing::debug!(count = removed.len(), "Unsubscribing");
        }
    }

    /// Every desired pair, registered or pending.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<PairKey> {
        self.inner.lock().registry.snapshot().into_iter().collect()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Receiver notified on every state change.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// New receiver on the ticker-update channel.
    #[must_use]
    pub fn ticker_updates(&self) -> broadcast::Receiver<TickerUpdate> {
        self.hub.ticker_updates_rx()
    }

    // =========================================================================
    // Connection Loop
    // =========================================================================

    /// Reconnect loop; runs until cancelled or attempts are exhausted.
    async fn run(self: Arc<Self>, url: String) {
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());

        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            self.set_state(ConnectionState::Connecting);

            match self.connect_and_run(&url, &mut policy).await {
                Ok(()) => {
                    tracing::info!("Streamer connection closed");
                    break;
                }
                Err(e) => {
                    self.detach_session();
                    metrics::record_reconnect(e.reconnect_reason());
                    tracing::warn!(error = %e, "Streamer session ended");
                }
            }

            let Some(delay) = policy.next_delay() else {
                let error = ReconnectError::MaxAttemptsExceeded(policy.attempt_count());
                tracing::error!(error = %error, "Giving up on streamer");
                break;
            };

            self.set_state(ConnectionState::Reconnecting);
            tracing::info!(
                attempt = policy.attempt_count(),
                delay_ms = delay.as_millis(),
                "Reconnecting to streamer"
            );

            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Cancelled during reconnect delay");
                    break;
                }
                () = tokio::time::sleep(delay) => {}
            }
        }

        self.detach_session();
        self.set_state(ConnectionState::Closed);
    }

    /// One session: connect, process frames, return when it ends.
    ///
    /// `Ok(())` means the session was cancelled by `disconnect()`.
    async fn connect_and_run(
        &self,
        url: &str,
        policy: &mut ReconnectPolicy,
    ) -> Result<(), StreamError> {
        tracing::info!(endpoint = %self.config.url, "Connecting to streamer");

        let (ws_stream, _response) = tokio::select! {
            () = self.cancel.cancelled() => return Ok(()),
            result = tokio_tungstenite::connect_async(url) => result.map_err(StreamError::Connect)?,
        };
        let (mut write, mut read) = ws_stream.split();

        let heartbeat_state = Arc::new(HeartbeatState::new());
        let (heartbeat_tx, mut heartbeat_rx) = mpsc::channel::<HeartbeatEvent>(8);
        let heartbeat_cancel = self.cancel.child_token();
        let _heartbeat_guard = heartbeat_cancel.clone().drop_guard();
        tokio::spawn(
            HeartbeatManager::new(
                self.config.heartbeat.clone(),
                Arc::clone(&heartbeat_state),
                heartbeat_tx,
                heartbeat_cancel,
            )
            .run(),
        );

        let mut commands: Option<mpsc::UnboundedReceiver<SubscriptionRequest>> = None;
        let mut heartbeat_open = true;
        let mut read_open = true;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    if let Err(e) = write.send(Message::Close(None)).await {
                        tracing::debug!(error = %e, "Close frame not sent");
                    } else if read_open {
                        await_close_reply(&mut read).await;
                    }
                    return Ok(());
                }
                event = heartbeat_rx.recv(), if heartbeat_open => {
                    match event {
                        Some(HeartbeatEvent::SendPing) => {
                            write
                                .send(Message::Ping(Vec::new().into()))
                                .await
                                .map_err(StreamError::PingFailed)?;
                            heartbeat_state.record_ping();
                        }
                        Some(HeartbeatEvent::Timeout) => return Err(StreamError::HeartbeatTimeout),
                        None => {
                            tracing::warn!("Heartbeat monitor stopped, session has no liveness check");
                            heartbeat_open = false;
                        }
                    }
                }
                request = next_command(&mut commands) => {
                    send_request(&mut write, &request).await;
                }
                msg = read.next(), if read_open => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            match self.dispatcher.dispatch(&text) {
                                Some(FeedEvent::SessionWelcome) => {
                                    let (replay, rx) = self.open_session();
                                    if !replay.is_empty() {
                                        send_request(&mut write, &SubscriptionRequest::add(&replay)).await;
                                    }
                                    commands = Some(rx);
                                    heartbeat_state.reset();
                                    policy.reset();
                                    self.set_state(ConnectionState::Open);
                                    tracing::info!(subscriptions = replay.len(), "Streamer session open");
                                }
                                Some(FeedEvent::Ticker(update)) => {
                                    self.hub.send_ticker_update(update);
                                }
                                Some(FeedEvent::Heartbeat) => heartbeat_state.record_pong(),
                                _ => {}
                            }
                        }
                        Some(Ok(Message::Pong(_))) => {
                            tracing::trace!("Ping reply received");
                            heartbeat_state.record_pong();
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = write.send(Message::Pong(data)).await {
                                tracing::warn!(error = %e, "Failed to answer ping");
                                metrics::record_transport_error();
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(frame = ?frame, "Streamer sent close frame");
                            return Err(StreamError::ClosedByPeer);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(
                            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed,
                        ))
                        | None => {
                            tracing::info!("Streamer socket closed");
                            return Err(StreamError::ClosedByPeer);
                        }
                        Some(Err(e)) => {
                            // The stream is fused after an error. Reconnect is left to
                            // the heartbeat window: no pong can be read from here on.
                            tracing::warn!(error = %e, "Transport error");
                            metrics::record_transport_error();
                            read_open = false;
                        }
                    }
                }
            }
        }
    }

    /// Promote pending pairs and attach a fresh outbound channel.
    fn open_session(&self) -> (Vec<PairKey>, mpsc::UnboundedReceiver<SubscriptionRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock();
        let replay = inner.registry.take_replay();
        inner.outbound = Some(tx);
        (replay, rx)
    }

    /// Drop the outbound channel so new subscriptions queue as pending.
    fn detach_session(&self) {
        self.inner.lock().outbound = None;
    }

    /// Transition unless already closed.
    fn set_state(&self, next: ConnectionState) {
        let changed = self.state_tx.send_if_modified(|state| {
            if *state == ConnectionState::Closed || *state == next {
                return false;
            }
            *state = next;
            true
        });
        if changed {
            metrics::set_connection_open(next == ConnectionState::Open);
            tracing::debug!(state = %next, "Connection state changed");
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Next queued command; pends forever without an open session.
async fn next_command(
    commands: &mut Option<mpsc::UnboundedReceiver<SubscriptionRequest>>,
) -> SubscriptionRequest {
    if let Some(rx) = commands
        && let Some(request) = rx.recv().await
    {
        return request;
    }
    std::future::pending().await
}

/// Read until the peer acknowledges our close frame or the socket ends.
async fn await_close_reply<R>(read: &mut R)
where
    R: futures_util::Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    let drained = tokio::time::timeout(CLOSE_TIMEOUT, async {
        while let Some(msg) = read.next().await {
            if matches!(msg, Ok(Message::Close(_)) | Err(_)) {
                break;
            }
        }
    })
    .await;
    if drained.is_err() {
        tracing::debug!(timeout_ms = CLOSE_TIMEOUT.as_millis(), "No close reply from streamer");
    }
}

/// Write a subscription command. Failures are logged; the registry replays
/// everything on the next open.
async fn send_request<W>(write: &mut W, request: &SubscriptionRequest)
where
    W: Sink<Message> + Unpin,
    W::Error: fmt::Display,
{
    let json = match serde_json::to_string(request) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode subscription request");
            return;
        }
    };

    tracing::trace!(request = %json, "Sending subscription request");
    if let Err(e) = write.send(Message::Text(json.into())).await {
        tracing::warn!(error = %e, "Failed to send subscription request");
        metrics::record_transport_error();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::broadcast::BroadcastHub;

    fn manager(url: &str) -> Arc<ConnectionManager> {
        let config = StreamerConfig::new(url, ApiKey::new("key".to_string()));
        Arc::new(ConnectionManager::new(
            config,
            Arc::new(BroadcastHub::with_defaults()),
        ))
    }

    fn pair(s: &str) -> PairKey {
        s.parse().unwrap()
    }

    #[test]
    fn starts_idle() {
        let manager = manager("wss://example.invalid/v2");
        assert_eq!(manager.state(), ConnectionState::Idle);
        assert!(manager.subscriptions().is_empty());
    }

    #[tokio::test]
    async fn connect_rejects_invalid_endpoint() {
        let manager = manager("not a url");
        assert!(matches!(
            manager.connect().await,
            Err(StreamError::InvalidRequest(_))
        ));
        assert_eq!(manager.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn connect_rejects_http_scheme() {
        let manager = manager("http://127.0.0.1:1/v2");
        assert!(matches!(
            manager.connect().await,
            Err(StreamError::UnsupportedScheme(s)) if s == "http"
        ));
    }

    #[tokio::test]
    async fn subscriptions_queue_while_idle() {
        let manager = manager("wss://example.invalid/v2");
        manager.subscribe(&[pair("BTC-USD"), pair("ETH-USD")]);
        manager.unsubscribe(&[pair("ETH-USD")]);

        assert_eq!(manager.subscriptions(), vec![pair("BTC-USD")]);
    }

    #[tokio::test]
    async fn disconnect_is_idempotent_and_terminal() {
        let manager = manager("wss://example.invalid/v2");
        manager.disconnect().await;
        manager.disconnect().await;

        assert_eq!(manager.state(), ConnectionState::Closed);
        assert!(matches!(
            manager.connect().await,
            Err(StreamError::AlreadyStarted)
        ));
    }

    #[tokio::test]
    async fn exhausted_attempts_close_before_open() {
        let mut config = StreamerConfig::new("ws://127.0.0.1:1/v2", ApiKey::new("key".to_string()));
        config.reconnect = ReconnectConfig {
            initial_delay: std::time::Duration::from_millis(1),
            max_attempts: 2,
            ..ReconnectConfig::default()
        }
        .without_jitter();
        let manager = Arc::new(ConnectionManager::new(
            config,
            Arc::new(BroadcastHub::with_defaults()),
        ));

        let result = tokio::time::timeout(std::time::Duration::from_secs(5), manager.connect())
            .await
            .expect("connect should give up");
        assert!(matches!(result, Err(StreamError::Closed)));
        assert_eq!(manager.state(), ConnectionState::Closed);
    }

    #[test]
    fn state_names() {
        assert_eq!(ConnectionState::Reconnecting.to_string(), "reconnecting");
        assert_eq!(ConnectionState::Open.as_str(), "open");
    }
}
