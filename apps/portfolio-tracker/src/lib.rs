#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Portfolio Tracker - Streaming Crypto Portfolio Valuation
//!
//! Keeps one resilient WebSocket session to the CryptoCompare streamer,
//! maintains a live price table from its ticker updates, and periodically
//! values portfolio holdings in a target fiat currency.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure pricing and valuation logic
//!   - `streaming`: Pair keys, tickers, ticker-update events
//!   - `subscription`: Desired-subscription registry
//!   - `pricing`: Price table and BTC/ETH fiat bridging
//!   - `portfolio`: Holdings and subscription derivation
//!   - `valuation`: Valuation engine and display rounding
//!   - `presentation`: Ticker lines and report shapes
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Report sink and price notification interfaces
//!   - `services`: Price aggregation, portfolio valuation
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `cryptocompare`: Streamer connection manager
//!   - `broadcast`: Channel-based fan-out
//!   - `config`: Environment configuration
//!   - `portfolio`, `report`, `cache`: File I/O
//!   - `scheduler`: Periodic save and reload tasks
//!
//! # Data Flow
//!
//! ```text
//! CryptoCompare WS ──► ConnectionManager ──► BroadcastHub ──► PriceAggregator
//!                                                                  │
//!                                                                  ▼
//!        report files ◄── ReportWriter ◄── ValuationService ◄── PriceTable
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Pricing and valuation types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::portfolio::{CoinMappings, Holding, PortfolioData, ticker_subscriptions};
pub use domain::pricing::PriceTable;
pub use domain::streaming::{PairKey, PairKeyError, Ticker, TickerUpdate};
pub use domain::subscription::SubscriptionRegistry;
pub use domain::valuation::{RoundingTier, ValuationResult, compute_valuation, round_for_display};

// Application services
pub use application::ports::{PortfolioReport, TrackedPortfolio, ValuationSink};
pub use application::services::{PriceAggregator, SharedPriceTable, ValuationService};

// Infrastructure config
pub use infrastructure::config::{ConfigError, TrackerConfig};

// Streamer client (for integration tests)
pub use infrastructure::cryptocompare::{
    ConnectionManager, ConnectionState, StreamError, StreamerConfig,
};

// Broadcast hub (for integration tests)
pub use infrastructure::broadcast::{
    BroadcastConfig, BroadcastHub, BroadcastStats, SharedBroadcastHub,
};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
