//! Prometheus Metrics Module
//!
//! Application metrics recorded through the `metrics` facade and exported
//! in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Frames**: Streamer frames received by kind, frames dropped
//! - **Connection**: Session state, reconnects by reason, subscriptions
//! - **Valuation**: Portfolio totals, missing coins, valuation latency
//! - **Persistence**: Report and cache write failures
//!
//! # Integration
//!
//! When a port is configured the exporter serves `/metrics` on its own
//! HTTP listener. Without a port the recorder is still installed so the
//! counters are cheap no-ops for callers.

use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

// =============================================================================
// Installation
// =============================================================================

static INSTALLED: OnceLock<()> = OnceLock::new();

/// Install the Prometheus recorder, optionally with an HTTP listener.
///
/// Subsequent calls are no-ops. Must be called inside a tokio runtime when
/// a port is given.
///
/// # Errors
///
/// Returns an error if the recorder or listener cannot be installed.
pub fn init_metrics(port: Option<u16>) -> Result<(), BuildError> {
    if INSTALLED.get().is_some() {
        return Ok(());
    }

    let builder = PrometheusBuilder::new();
    match port {
        Some(port) => {
            let addr = SocketAddr::from(([0, 0, 0, 0], port));
            builder.with_http_listener(addr).install()?;
            tracing::info!(%addr, "Prometheus exporter listening");
        }
        None => {
            builder.install_recorder()?;
        }
    }

    register_metrics();
    let _ = INSTALLED.set(());
    Ok(())
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "tracker_frames_received_total",
        "Streamer frames received by kind"
    );
    describe_counter!(
        "tracker_frames_dropped_total",
        "Streamer frames dropped by reason"
    );
    describe_counter!(
        "tracker_ticker_updates_total",
        "Ticker updates applied to the price table"
    );

    describe_gauge!(
        "tracker_connection_open",
        "1 while a streamer session is open"
    );
    describe_counter!(
        "tracker_transport_errors_total",
        "Socket errors that did not close the session"
    );
    describe_counter!(
        "tracker_reconnects_total",
        "Streamer reconnects by reason"
    );
    describe_gauge!(
        "tracker_subscriptions",
        "Desired ticker subscriptions"
    );

    describe_gauge!(
        "tracker_portfolio_value",
        "Total fiat value per portfolio"
    );
    describe_gauge!(
        "tracker_missing_coins",
        "Coins without a resolvable price per portfolio"
    );
    describe_histogram!(
        "tracker_valuation_seconds",
        "Time to value and persist one portfolio"
    );

    describe_counter!(
        "tracker_persistence_errors_total",
        "Failed report and cache writes by target"
    );
}

// =============================================================================
// Metric Labels
// =============================================================================

/// Metric labels for inbound frame kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Session control (welcome, subscribe/load complete).
    Control,
    /// Ticker update.
    Ticker,
    /// Provider error.
    Error,
    /// Provider heartbeat.
    Heartbeat,
    /// Unrecognized discriminator.
    Unknown,
}

impl FrameKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Control => "control",
            Self::Ticker => "ticker",
            Self::Error => "error",
            Self::Heartbeat => "heartbeat",
            Self::Unknown => "unknown",
        }
    }
}

/// Metric labels for reconnect causes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectReason {
    /// A full heartbeat window passed without a pong.
    HeartbeatTimeout,
    /// Ping could not be written.
    PingFailed,
    /// Provider closed the socket or the stream ended.
    Closed,
    /// Connection attempt failed.
    ConnectFailed,
}

impl ReconnectReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::HeartbeatTimeout => "heartbeat_timeout",
            Self::PingFailed => "ping_failed",
            Self::Closed => "closed",
            Self::ConnectFailed => "connect_failed",
        }
    }
}

/// Metric labels for persistence targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistTarget {
    /// Portfolio report files.
    Report,
    /// Price table cache.
    Cache,
    /// Portfolio reload.
    Portfolio,
}

impl PersistTarget {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Report => "report",
            Self::Cache => "cache",
            Self::Portfolio => "portfolio",
        }
    }
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a frame received from the streamer.
pub fn record_frame_received(kind: FrameKind) {
    counter!("tracker_frames_received_total", "kind" => kind.as_str()).increment(1);
}

/// Record a frame dropped before classification.
pub fn record_frame_dropped(reason: &'static str) {
    counter!("tracker_frames_dropped_total", "reason" => reason).increment(1);
}

/// Record a ticker written to the price table.
pub fn record_ticker_update() {
    counter!("tracker_ticker_updates_total").increment(1);
}

/// Update the session-open gauge.
pub fn set_connection_open(open: bool) {
    gauge!("tracker_connection_open").set(if open { 1.0 } else { 0.0 });
}

/// Record a socket error that did not end the session.
pub fn record_transport_error() {
    counter!("tracker_transport_errors_total").increment(1);
}

/// Record a reconnect.
pub fn record_reconnect(reason: ReconnectReason) {
    counter!("tracker_reconnects_total", "reason" => reason.as_str()).increment(1);
}

/// Update the desired subscription count.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscriptions(count: usize) {
    gauge!("tracker_subscriptions").set(count as f64);
}

/// Update a portfolio's valuation gauges.
#[allow(clippy::cast_precision_loss)]
pub fn record_valuation(portfolio: &str, currency: &str, total: f64, missing: usize, took: Duration) {
    gauge!(
        "tracker_portfolio_value",
        "portfolio" => portfolio.to_string(),
        "currency" => currency.to_string()
    )
    .set(total);
    gauge!("tracker_missing_coins", "portfolio" => portfolio.to_string()).set(missing as f64);
    histogram!("tracker_valuation_seconds").record(took.as_secs_f64());
}

/// Record a failed write.
pub fn record_persistence_error(target: PersistTarget) {
    counter!("tracker_persistence_errors_total", "target" => target.as_str()).increment(1);
}

// =============================================================================
// Tests
// =============================================================================
