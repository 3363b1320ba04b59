//! Price Table
//!
//! Live table of the latest ticker per pair, plus the bridging rule that
//! derives a fiat price for pairs quoted in BTC or ETH.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::streaming::{PairKey, PairKeyError, Ticker};

/// Quote symbols that can be bridged to fiat through their own fiat pair.
pub const BRIDGE_SYMBOLS: [&str; 2] = ["BTC", "ETH"];

/// Latest ticker per pair, keyed by `FROM-TO`.
///
/// Tickers are merged in place on update and never removed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PriceTable {
    tickers: BTreeMap<PairKey, Ticker>,
}

impl PriceTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a ticker update and recompute its bridged fiat price.
    ///
    /// When the ticker is quoted in BTC or ETH and the table holds a
    /// `BTC-<fiat>` / `ETH-<fiat>` ticker, the derived fiat price is
    /// `bridge.price * ticker.price`. Bridging happens only here, so a later
    /// change of the bridge ticker does not touch already stored tickers.
    ///
    /// # Errors
    ///
    /// Returns an error if the ticker has an empty symbol.
    pub fn apply(&mut self, ticker: Ticker, fiat: &str) -> Result<&Ticker, PairKeyError> {
        let key = ticker.pair()?;
        let derived = self.bridge_price(&ticker, fiat);

        let stored = match self.tickers.entry(key) {
            std::collections::btree_map::Entry::Occupied(entry) => {
                let stored = entry.into_mut();
                stored.merge(ticker);
                stored
            }
            std::collections::btree_map::Entry::Vacant(entry) => entry.insert(ticker),
        };
        stored.derived_fiat_price = derived;

        Ok(stored)
    }

    /// Fiat price of `ticker` bridged through its quote symbol, if possible.
    #[must_use]
    pub fn bridge_price(&self, ticker: &Ticker, fiat: &str) -> Option<f64> {
        if ticker.to == fiat || !BRIDGE_SYMBOLS.contains(&ticker.to.as_str()) {
            return None;
        }
        self.get_pair(&ticker.to, fiat)
            .map(|bridge| bridge.price * ticker.price)
    }

    /// Look up a ticker by key.
    #[must_use]
    pub fn get(&self, key: &PairKey) -> Option<&Ticker> {
        self.tickers.get(key)
    }

    /// Look up a ticker by its two symbols.
    #[must_use]
    pub fn get_pair(&self, from: &str, to: &str) -> Option<&Ticker> {
        PairKey::new(from, to)
            .ok()
            .and_then(|key| self.tickers.get(&key))
    }

    /// Iterate tickers in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&PairKey, &Ticker)> {
        self.tickers.iter()
    }

    /// Number of pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tickers.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tickers.is_empty()
    }
}
