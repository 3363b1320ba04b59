//! Price Aggregator Service
//!
//! Sole writer of the shared price table. Consumes ticker updates from the
//! streamer, stores them with their bridged fiat price, and notifies
//! listeners with the stored ticker.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::application::ports::PriceNotifier;
use crate::domain::pricing::PriceTable;
use crate::domain::streaming::{Ticker, TickerUpdate};
use crate::infrastructure::metrics;

/// Price table shared between the aggregator and its readers.
pub type SharedPriceTable = Arc<RwLock<PriceTable>>;

/// Writes ticker updates into the price table.
pub struct PriceAggregator {
    table: SharedPriceTable,
    fiat: String,
    notifier: Arc<dyn PriceNotifier>,
}

impl PriceAggregator {
    /// Create an aggregator bridging to `fiat`.
    #[must_use]
    pub fn new(table: SharedPriceTable, fiat: impl Into<String>, notifier: Arc<dyn PriceNotifier>) -> Self {
        Self {
            table,
            fiat: fiat.into(),
            notifier,
        }
    }

    /// Handle to the shared table.
    #[must_use]
    pub fn table(&self) -> SharedPriceTable {
        Arc::clone(&self.table)
    }

    /// Store one update and notify listeners.
    ///
    /// Returns the stored ticker, or `None` if the update was rejected.
    pub fn apply(&self, update: TickerUpdate) -> Option<Ticker> {
        let stored = {
            let mut table = self.table.write();
            match table.apply(update.ticker, &self.fiat) {
                Ok(stored) => stored.clone(),
                Err(e) => {
                    tracing::warn!(error = %e, "Rejected ticker update");
                    return None;
                }
            }
        };

        metrics::record_ticker_update();
        tracing::trace!(
            from = %stored.from,
            to = %stored.to,
            price = stored.price,
            derived = ?stored.derived_fiat_price,
            "Price updated"
        );
        self.notifier.price_updated(&stored);
        Some(stored)
    }

    /// Consume updates until cancelled or the channel closes.
    pub async fn run(self: Arc<Self>, mut updates: broadcast::Receiver<TickerUpdate>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                result = updates.recv() => {
                    match result {
                        Ok(update) => {
                            self.apply(update);
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!(skipped = n, "Price aggregator lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            tracing::info!("Ticker channel closed");
                            break;
                        }
                    }
                }
                () = shutdown.cancelled() => {
                    tracing::debug!("Price aggregator shutting down");
                    break;
                }
            }
        }
    }
}
