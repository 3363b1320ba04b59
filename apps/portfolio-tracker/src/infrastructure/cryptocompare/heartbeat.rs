//! Heartbeat Manager
//!
//! Monitors streamer session liveness by counting pings sent against pongs
//! received. Every `max_pings_lost` pings the counters are checked: if not a
//! single pong came back during that window the session is declared dead and
//! the client reconnects.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Shortest ping interval the manager will schedule.
pub const MIN_PING_INTERVAL: Duration = Duration::from_millis(1);

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Interval between ping messages.
    pub ping_interval: Duration,
    /// Pings sent without any pong before the session is considered dead.
    pub max_pings_lost: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            max_pings_lost: 3,
        }
    }
}

impl HeartbeatConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(ping_interval: Duration, max_pings_lost: u32) -> Self {
        Self {
            ping_interval,
            max_pings_lost,
        }
    }
}

/// Events emitted by the heartbeat manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// Request to send a ping message.
    SendPing,
    /// No pong for a full window of pings; the session must be restarted.
    Timeout,
}

/// Result of the per-tick liveness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatVerdict {
    /// Window not complete yet.
    Pending,
    /// Window complete with at least one pong; counters were reset.
    Healthy,
    /// Window complete without a single pong.
    Dead,
}

/// Ping/pong counters shared between the heartbeat manager and the session.
#[derive(Debug, Default)]
pub struct HeartbeatState {
    pings_sent: AtomicU32,
    pongs_received: AtomicU32,
}

impl HeartbeatState {
    /// Create new heartbeat state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a ping was written to the socket.
    pub fn record_ping(&self) {
        self.pings_sent.fetch_add(1, Ordering::SeqCst);
    }

    /// Record that a pong (or provider heartbeat) was received.
    pub fn record_pong(&self) {
        self.pongs_received.fetch_add(1, Ordering::SeqCst);
    }

    /// Pings sent in the current window.
    #[must_use]
    pub fn pings_sent(&self) -> u32 {
        self.pings_sent.load(Ordering::SeqCst)
    }

    /// Pongs received in the current window.
    #[must_use]
    pub fn pongs_received(&self) -> u32 {
        self.pongs_received.load(Ordering::SeqCst)
    }

    /// Evaluate the window once `max_pings_lost` pings have been sent.
    ///
    /// A healthy window resets both counters.
    pub fn check(&self, max_pings_lost: u32) -> HeartbeatVerdict {
        if self.pings_sent() < max_pings_lost {
            return HeartbeatVerdict::Pending;
        }
        if self.pongs_received() == 0 {
            return HeartbeatVerdict::Dead;
        }
        self.reset();
        HeartbeatVerdict::Healthy
    }

    /// Reset state for a new session.
    pub fn reset(&self) {
        self.pings_sent.store(0, Ordering::SeqCst);
        self.pongs_received.store(0, Ordering::SeqCst);
    }
}

/// Heartbeat manager that monitors session health.
///
/// # Example
///
/// ```rust,no_run
/// use portfolio_tracker::infrastructure::cryptocompare::heartbeat::{
///     HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState,
/// };
/// use std::sync::Arc;
/// use tokio::sync::mpsc;
/// use tokio_util::sync::CancellationToken;
///
/// async fn example() {
///     let state = Arc::new(HeartbeatState::new());
///     let (event_tx, mut event_rx) = mpsc::channel(10);
///     let cancel = CancellationToken::new();
///
///     let manager =
///         HeartbeatManager::new(HeartbeatConfig::default(), state.clone(), event_tx, cancel);
///     tokio::spawn(manager.run());
///
///     while let Some(event) = event_rx.recv().await {
///         match event {
///             HeartbeatEvent::SendPing => {
///                 // write a ping frame, then:
///                 state.record_ping();
///             }
///             HeartbeatEvent::Timeout => break,
///         }
///     }
/// }
/// ```
pub struct HeartbeatManager {
    config: HeartbeatConfig,
    state: Arc<HeartbeatState>,
    event_tx: mpsc::Sender<HeartbeatEvent>,
    cancel: CancellationToken,
}

impl HeartbeatManager {
    /// Create a new heartbeat manager.
    #[must_use]
    pub const fn new(
        config: HeartbeatConfig,
        state: Arc<HeartbeatState>,
        event_tx: mpsc::Sender<HeartbeatEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            state,
            event_tx,
            cancel,
        }
    }

    /// Run the heartbeat loop until cancelled or a timeout is detected.
    ///
    /// The first ping goes out one interval after start. Intervals shorter
    /// than [`MIN_PING_INTERVAL`] are raised to it.
    pub async fn run(self) {
        let period = self.config.ping_interval.max(MIN_PING_INTERVAL);
        let start = tokio::time::Instant::now() + period;
        let mut interval = tokio::time::interval_at(start, period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Heartbeat manager cancelled");
                    break;
                }
                _ = interval.tick() => {
                    if self.check_and_ping().await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    /// Check the window and request the next ping.
    ///
    /// Returns `Err(())` if a timeout occurred and the loop should exit.
    async fn check_and_ping(&self) -> Result<(), ()> {
        if self.state.check(self.config.max_pings_lost) == HeartbeatVerdict::Dead {
            tracing::warn!(
                pings_sent = self.state.pings_sent(),
                max_pings_lost = self.config.max_pings_lost,
                "Lost ping replies, reconnecting"
            );
            let _ = self.event_tx.send(HeartbeatEvent::Timeout).await;
            return Err(());
        }

        if self.event_tx.send(HeartbeatEvent::SendPing).await.is_err() {
            tracing::debug!("Event channel closed, stopping heartbeat");
            return Err(());
        }

        Ok(())
    }
}
