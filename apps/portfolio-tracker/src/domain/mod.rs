//! Domain Layer - Core pricing and valuation logic.
//!
//! This layer contains the pure domain types and computations of the
//! tracker: no I/O, no async. All types here are plain Rust with
//! serialization support where they are persisted.

/// Pair keys, tickers and ticker-update events.
pub mod streaming;

/// Desired-subscription registry and channel tokens.
pub mod subscription;

/// Price table and BTC/ETH fiat bridging.
pub mod pricing;

/// Portfolio documents, holdings and subscription derivation.
pub mod portfolio;

/// Holdings valuation and display rounding.
pub mod valuation;

/// Ticker formatting and report shapes.
pub mod presentation;
