//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `PriceAggregator`: Sole writer of the live price table
//! - `ValuationService`: Values tracked portfolios and publishes reports

mod price_aggregator;
mod valuation;

pub use price_aggregator::{PriceAggregator, SharedPriceTable};
pub use valuation::ValuationService;
