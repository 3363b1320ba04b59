//! Port Interfaces
//!
//! Contracts between the application services and the adapters that
//! implement them.
//!
//! ## Driven Ports (Outbound)
//!
//! - `ValuationSink`: Receives each portfolio report on the save tick
//! - `PriceNotifier`: Told about every ticker written to the price table

use std::path::PathBuf;

use async_trait::async_trait;

use crate::domain::portfolio::PortfolioData;
use crate::domain::presentation::PortfolioStats;
use crate::domain::streaming::Ticker;
use crate::domain::valuation::ValuationResult;

// =============================================================================
// Portfolio Report
// =============================================================================

/// A loaded portfolio and where its reports go.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedPortfolio {
    /// Portfolio key, the file stem of its source.
    pub key: String,
    /// Directory the reports are written into.
    pub destination: PathBuf,
    /// Parsed holdings document.
    pub data: PortfolioData,
}

/// Everything a sink needs to persist one portfolio's valuation.
#[derive(Debug, Clone, PartialEq)]
pub struct PortfolioReport {
    /// Portfolio key.
    pub key: String,
    /// Report directory.
    pub destination: PathBuf,
    /// Valuation snapshot.
    pub valuation: ValuationResult,
    /// Rendered stats document.
    pub stats: PortfolioStats,
}

// =============================================================================
// Valuation Sink
// =============================================================================

/// Error publishing a portfolio report.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SinkError {
    /// Report could not be encoded.
    #[error("report encoding failed: {message}")]
    Encoding {
        /// Error details.
        message: String,
    },

    /// Report could not be written.
    #[error("report write failed: {message}")]
    WriteFailed {
        /// Error details.
        message: String,
    },
}

/// Port receiving portfolio reports.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ValuationSink: Send + Sync {
    /// Persist or forward one report.
    async fn publish(&self, report: &PortfolioReport) -> Result<(), SinkError>;
}

// =============================================================================
// Price Notifier
// =============================================================================

/// Port notified after each price table write.
#[cfg_attr(test, mockall::automock)]
pub trait PriceNotifier: Send + Sync {
    /// The stored ticker, including any derived fiat price.
    fn price_updated(&self, ticker: &Ticker);
}
