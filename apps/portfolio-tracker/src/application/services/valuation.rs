//! Valuation Service
//!
//! Values every tracked portfolio against the live price table and hands
//! the resulting reports to the configured sink.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;

use super::price_aggregator::SharedPriceTable;
use crate::application::ports::{PortfolioReport, TrackedPortfolio, ValuationSink};
use crate::domain::portfolio::{CoinMappings, ticker_subscriptions};
use crate::domain::presentation::{PortfolioStats, TickerFormat};
use crate::domain::streaming::PairKey;
use crate::domain::valuation::{ValuationResult, compute_valuation};
use crate::infrastructure::metrics::{self, PersistTarget};

/// Periodic valuation of the tracked portfolios.
pub struct ValuationService {
    table: SharedPriceTable,
    portfolios: RwLock<Vec<TrackedPortfolio>>,
    fiat: String,
    format: TickerFormat,
    sink: Arc<dyn ValuationSink>,
}

impl ValuationService {
    /// Create a service valuing in `fiat`.
    ///
    /// `format.max_ticker_age` doubles as the staleness threshold of the
    /// valuation.
    #[must_use]
    pub fn new(
        table: SharedPriceTable,
        fiat: impl Into<String>,
        format: TickerFormat,
        sink: Arc<dyn ValuationSink>,
    ) -> Self {
        Self {
            table,
            portfolios: RwLock::new(Vec::new()),
            fiat: fiat.into(),
            format,
            sink,
        }
    }

    /// Replace the tracked portfolios.
    ///
    /// Returns the pairs the new set needs streamed.
    pub fn replace_portfolios(&self, portfolios: Vec<TrackedPortfolio>) -> Vec<PairKey> {
        let pairs = ticker_subscriptions(
            portfolios.iter().map(|p| &p.data),
            &CoinMappings::for_fiat(&self.fiat),
            &self.fiat,
        );
        tracing::info!(
            portfolios = portfolios.len(),
            pairs = pairs.len(),
            "Tracking portfolios"
        );
        *self.portfolios.write() = portfolios;
        pairs
    }

    /// Currently tracked portfolios.
    #[must_use]
    pub fn portfolios(&self) -> Vec<TrackedPortfolio> {
        self.portfolios.read().clone()
    }

    /// Value one portfolio at `now` (unix seconds).
    #[must_use]
    pub fn value(&self, portfolio: &TrackedPortfolio, now: i64) -> PortfolioReport {
        let table = self.table.read();
        let valuation = compute_valuation(
            &portfolio.data.holdings(),
            &table,
            &self.fiat,
            self.format.max_ticker_age,
            now,
        );
        let stats = PortfolioStats::build(&valuation, &table, &self.format);
        drop(table);

        PortfolioReport {
            key: portfolio.key.clone(),
            destination: portfolio.destination.clone(),
            valuation,
            stats,
        }
    }

    /// Value and publish every tracked portfolio.
    ///
    /// Sink failures are logged and counted; the remaining portfolios are
    /// still published. Returns the valuations in portfolio order.
    pub async fn publish_all(&self, now: i64) -> Vec<ValuationResult> {
        let portfolios = self.portfolios();
        let mut results = Vec::with_capacity(portfolios.len());

        for portfolio in &portfolios {
            let started = Instant::now();
            let report = self.value(portfolio, now);

            if let Err(e) = self.sink.publish(&report).await {
                tracing::warn!(portfolio = %report.key, error = %e, "Failed to publish report");
                metrics::record_persistence_error(PersistTarget::Report);
            }

            metrics::record_valuation(
                &report.key,
                &report.valuation.currency,
                report.valuation.total_fiat_value,
                report.valuation.missing_coins.len(),
                started.elapsed(),
            );
            tracing::debug!(
                portfolio = %report.key,
                total = report.valuation.total_fiat_value,
                missing = report.valuation.missing_coins.len(),
                outdated = report.valuation.outdated_count(),
                "Portfolio valued"
            );
            results.push(report.valuation);
        }

        results
    }
}
