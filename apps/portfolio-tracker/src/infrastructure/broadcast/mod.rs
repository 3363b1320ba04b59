//! Broadcast Channel Adapters
//!
//! Fan-out of streaming events to any number of in-process listeners using
//! tokio broadcast channels.
//!
//! # Architecture
//!
//! The `BroadcastHub` provides one channel per event kind:
//! - Ticker updates as received from the streamer
//! - Price table writes, carrying the stored ticker after bridging
//!
//! Slow receivers lag and skip messages instead of blocking the sender.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::application::ports::PriceNotifier;
use crate::domain::streaming::{Ticker, TickerUpdate};

/// Notification sent after a ticker was written to the price table.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceUpdate {
    /// The stored ticker, including any derived fiat price.
    pub ticker: Ticker,
}

/// Configuration for broadcast channel capacities.
#[derive(Debug, Clone, Copy)]
pub struct BroadcastConfig {
    /// Capacity for the ticker-update channel.
    pub ticker_updates_capacity: usize,
    /// Capacity for the price-update channel.
    pub price_updates_capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            ticker_updates_capacity: 1024,
            price_updates_capacity: 1024,
        }
    }
}

impl BroadcastConfig {
    /// Same capacity for every channel.
    #[must_use]
    pub const fn with_capacity(capacity: usize) -> Self {
        Self {
            ticker_updates_capacity: capacity,
            price_updates_capacity: capacity,
        }
    }
}

/// Central hub for all broadcast channels.
///
/// # Example
///
/// ```rust
/// use portfolio_tracker::domain::streaming::{Ticker, TickerUpdate};
/// use portfolio_tracker::infrastructure::broadcast::{BroadcastConfig, BroadcastHub};
///
/// let hub = BroadcastHub::new(BroadcastConfig::default());
/// let mut rx = hub.ticker_updates_rx();
///
/// let update = TickerUpdate::from(Ticker::new("BTC", "USD", 50_000.0, 1));
/// assert_eq!(hub.send_ticker_update(update), Some(1));
/// assert_eq!(rx.try_recv().unwrap().from, "BTC");
/// ```
#[derive(Debug)]
pub struct BroadcastHub {
    ticker_updates_tx: broadcast::Sender<TickerUpdate>,
    price_updates_tx: broadcast::Sender<PriceUpdate>,
}

impl BroadcastHub {
    /// Create a new broadcast hub with the given configuration.
    #[must_use]
    pub fn new(config: BroadcastConfig) -> Self {
        Self {
            ticker_updates_tx: broadcast::channel(config.ticker_updates_capacity.max(1)).0,
            price_updates_tx: broadcast::channel(config.price_updates_capacity.max(1)).0,
        }
    }

    /// Create a new broadcast hub with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(BroadcastConfig::default())
    }

    // =========================================================================
    // Ticker Update Channel
    // =========================================================================

    /// Send a ticker update to all subscribers.
    ///
    /// Returns the number of receivers, or `None` if nobody is listening.
    pub fn send_ticker_update(&self, update: TickerUpdate) -> Option<usize> {
        self.ticker_updates_tx.send(update).ok()
    }

    /// Get a new receiver for ticker updates.
    #[must_use]
    pub fn ticker_updates_rx(&self) -> broadcast::Receiver<TickerUpdate> {
        self.ticker_updates_tx.subscribe()
    }

    // =========================================================================
    // Price Update Channel
    // =========================================================================

    /// Send a price-table write notification to all subscribers.
    pub fn send_price_update(&self, ticker: Ticker) -> Option<usize> {
        self.price_updates_tx.send(PriceUpdate { ticker }).ok()
    }

    /// Get a new receiver for price-table writes.
    #[must_use]
    pub fn price_updates_rx(&self) -> broadcast::Receiver<PriceUpdate> {
        self.price_updates_tx.subscribe()
    }

    // =========================================================================
    // Statistics
    // =========================================================================

    /// Get statistics about all channels.
    #[must_use]
    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            ticker_updates_receivers: self.ticker_updates_tx.receiver_count(),
            price_updates_receivers: self.price_updates_tx.receiver_count(),
        }
    }
}

impl PriceNotifier for BroadcastHub {
    fn price_updated(&self, ticker: &Ticker) {
        self.send_price_update(ticker.clone());
    }
}

/// Shared broadcast hub reference.
pub type SharedBroadcastHub = Arc<BroadcastHub>;

/// Statistics about broadcast channels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    /// Number of ticker-update receivers.
    pub ticker_updates_receivers: usize,
    /// Number of price-update receivers.
    pub price_updates_receivers: usize,
}

impl BroadcastStats {
    /// Total number of receivers across all channels.
    #[must_use]
    pub const fn total_receivers(&self) -> usize {
        self.ticker_updates_receivers + self.price_updates_receivers
    }
}

// =============================================================================
// Tests
// =============================================================================
