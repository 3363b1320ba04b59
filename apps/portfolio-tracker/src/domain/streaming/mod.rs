//! Market Data Streaming Types
//!
//! Core domain types for the ticker stream: pair keys, tickers and the
//! ticker-update event. These types are codec-agnostic and represent the
//! canonical internal representation of a price quote.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Pair Key
// =============================================================================

/// Canonical `FROM-TO` identifier for a tradable symbol pair.
///
/// The first `-` separates the two symbols, so `"BTC-USD"` parses to
/// `from = "BTC"`, `to = "USD"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PairKey {
    from: String,
    to: String,
}

impl PairKey {
    /// Create a pair key from its two symbols, upper-cased.
    ///
    /// # Errors
    ///
    /// Returns an error if either symbol is empty.
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Result<Self, PairKeyError> {
        let from = from.into().to_uppercase();
        let to = to.into().to_uppercase();
        if from.is_empty() || to.is_empty() {
            return Err(PairKeyError::EmptySymbol(format!("{from}-{to}")));
        }
        Ok(Self { from, to })
    }

    /// Base symbol.
    #[must_use]
    pub fn from_symbol(&self) -> &str {
        &self.from
    }

    /// Quote symbol.
    #[must_use]
    pub fn to_symbol(&self) -> &str {
        &self.to
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.from, self.to)
    }
}

impl FromStr for PairKey {
    type Err = PairKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (from, to) = s
            .split_once('-')
            .ok_or_else(|| PairKeyError::MissingDelimiter(s.to_string()))?;
        Self::new(from, to)
    }
}

impl TryFrom<String> for PairKey {
    type Error = PairKeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PairKey> for String {
    fn from(key: PairKey) -> Self {
        key.to_string()
    }
}

/// Pair key parsing errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PairKeyError {
    /// No `-` between the two symbols.
    #[error("pair key {0:?} has no '-' delimiter")]
    MissingDelimiter(String),
    /// One of the symbols is empty.
    #[error("pair key {0:?} has an empty symbol")]
    EmptySymbol(String),
}

// =============================================================================
// Ticker
// =============================================================================

/// Latest known quote for one pair.
///
/// Volume fields and market/flags are optional because the provider sends
/// partial updates carrying only the fields that changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    /// Base symbol.
    pub from: String,
    /// Quote symbol.
    pub to: String,
    /// Last price of `from` expressed in `to`.
    pub price: f64,
    /// 24h volume in the base symbol.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_24h_from: Option<f64>,
    /// 24h volume in the quote symbol.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_24h_to: Option<f64>,
    /// 24h top-tier exchange volume in the base symbol.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_tier_volume_24h_from: Option<f64>,
    /// 24h top-tier exchange volume in the quote symbol.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_tier_volume_24h_to: Option<f64>,
    /// Last update, unix seconds.
    pub timestamp: i64,
    /// Exchange that produced the last trade.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_market: Option<String>,
    /// Provider price-direction flags.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flags: Option<u64>,
    /// Fiat price bridged through BTC or ETH, set by the price aggregator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derived_fiat_price: Option<f64>,
}

impl Ticker {
    /// Minimal ticker with only price and timestamp.
    #[must_use]
    pub fn new(from: impl Into<String>, to: impl Into<String>, price: f64, timestamp: i64) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            price,
            volume_24h_from: None,
            volume_24h_to: None,
            top_tier_volume_24h_from: None,
            top_tier_volume_24h_to: None,
            timestamp,
            last_market: None,
            flags: None,
            derived_fiat_price: None,
        }
    }

    /// Key of this ticker in the price table.
    ///
    /// # Errors
    ///
    /// Returns an error if either symbol is empty.
    pub fn pair(&self) -> Result<PairKey, PairKeyError> {
        PairKey::new(self.from.clone(), self.to.clone())
    }

    /// Last update as a UTC datetime.
    #[must_use]
    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.timestamp, 0)
    }

    /// Whether `now - timestamp` exceeds `max_age`.
    #[must_use]
    pub fn is_outdated(&self, now: i64, max_age: Duration) -> bool {
        let max_age = i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX);
        now.saturating_sub(self.timestamp) > max_age
    }

    /// Fold a newer partial update into this ticker.
    ///
    /// Price and timestamp always come from `update`; optional fields are
    /// only overwritten when the update carries them. The derived fiat price
    /// is cleared since it was computed against the previous price.
    pub fn merge(&mut self, update: Self) {
        self.price = update.price;
        self.timestamp = update.timestamp;
        self.derived_fiat_price = None;

        if update.volume_24h_from.is_some() {
            self.volume_24h_from = update.volume_24h_from;
        }
        if update.volume_24h_to.is_some() {
            self.volume_24h_to = update.volume_24h_to;
        }
        if update.top_tier_volume_24h_from.is_some() {
            self.top_tier_volume_24h_from = update.top_tier_volume_24h_from;
        }
        if update.top_tier_volume_24h_to.is_some() {
            self.top_tier_volume_24h_to = update.top_tier_volume_24h_to;
        }
        if update.last_market.is_some() {
            self.last_market = update.last_market;
        }
        if update.flags.is_some() {
            self.flags = update.flags;
        }
    }
}

// =============================================================================
// Ticker Update Event
// =============================================================================

/// Ticker-update notification emitted for every accepted ticker frame.
#[derive(Debug, Clone, PartialEq)]
pub struct TickerUpdate {
    /// Base symbol.
    pub from: String,
    /// Quote symbol.
    pub to: String,
    /// Last price.
    pub price: f64,
    /// Full normalized ticker.
    pub ticker: Ticker,
}

impl From<Ticker> for TickerUpdate {
    fn from(ticker: Ticker) -> Self {
        Self {
            from: ticker.from.clone(),
            to: ticker.to.clone(),
            price: ticker.price,
            ticker,
        }
    }
}
