//! Portfolio Holdings
//!
//! Portfolio document model, per-coin holdings aggregated from wallets, and
//! derivation of the ticker subscriptions a set of portfolios needs.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::domain::pricing::BRIDGE_SYMBOLS;
use crate::domain::streaming::PairKey;

/// Total quantity of one coin across all wallets of a portfolio.
#[derive(Debug, Clone, PartialEq)]
pub struct Holding {
    /// Coin symbol.
    pub coin: String,
    /// Summed wallet totals.
    pub quantity: f64,
}

impl Holding {
    /// Create a holding.
    #[must_use]
    pub fn new(coin: impl Into<String>, quantity: f64) -> Self {
        Self {
            coin: coin.into(),
            quantity,
        }
    }
}

/// A single wallet entry. Only `total` is interpreted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    /// Amount held in this wallet.
    #[serde(default)]
    pub total: Option<f64>,
}

/// Wallets holding one coin.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoinEntry {
    /// Wallets for the coin.
    #[serde(default)]
    pub wallets: Vec<Wallet>,
}

/// Parsed portfolio document: `{ "<COIN>": { "wallets": [{ "total": n }] } }`.
///
/// Coin symbols are upper-cased; entries that differ only in case are merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, CoinEntry>", into = "BTreeMap<String, CoinEntry>")]
pub struct PortfolioData {
    coins: BTreeMap<String, CoinEntry>,
}

impl PortfolioData {
    /// Build from a coin map.
    #[must_use]
    pub fn new(coins: BTreeMap<String, CoinEntry>) -> Self {
        let mut normalized: BTreeMap<String, CoinEntry> = BTreeMap::new();
        for (coin, entry) in coins {
            normalized
                .entry(coin.to_uppercase())
                .or_default()
                .wallets
                .extend(entry.wallets);
        }
        Self { coins: normalized }
    }

    /// Coin symbols in the portfolio.
    pub fn coins(&self) -> impl Iterator<Item = &str> {
        self.coins.keys().map(String::as_str)
    }

    /// Aggregate wallet totals per coin. Missing or zero totals are skipped.
    #[must_use]
    pub fn holdings(&self) -> Vec<Holding> {
        self.coins
            .iter()
            .map(|(coin, entry)| {
                let quantity = entry
                    .wallets
                    .iter()
                    .filter_map(|w| w.total)
                    .filter(|total| *total != 0.0)
                    .sum::<f64>();
                Holding::new(coin.clone(), quantity)
            })
            .collect()
    }
}

impl From<BTreeMap<String, CoinEntry>> for PortfolioData {
    fn from(coins: BTreeMap<String, CoinEntry>) -> Self {
        Self::new(coins)
    }
}

impl From<PortfolioData> for BTreeMap<String, CoinEntry> {
    fn from(data: PortfolioData) -> Self {
        data.coins
    }
}

/// Explicit quote symbols per coin; unmapped coins are quoted in BTC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinMappings {
    quotes: HashMap<String, Vec<String>>,
}

impl CoinMappings {
    /// Built-in mappings for a target fiat: BTC → [fiat], ETH → [fiat, BTC].
    #[must_use]
    pub fn for_fiat(fiat: &str) -> Self {
        let mut quotes = HashMap::new();
        quotes.insert("BTC".to_string(), vec![fiat.to_string()]);
        quotes.insert("ETH".to_string(), vec![fiat.to_string(), "BTC".to_string()]);
        Self { quotes }
    }

    /// Override the quote symbols for a coin.
    #[must_use]
    pub fn with(mut self, coin: impl Into<String>, quotes: Vec<String>) -> Self {
        self.quotes.insert(coin.into(), quotes);
        self
    }

    /// Quote symbols to subscribe for `coin`.
    #[must_use]
    pub fn quotes_for(&self, coin: &str) -> Vec<String> {
        self.quotes
            .get(coin)
            .cloned()
            .unwrap_or_else(|| vec!["BTC".to_string()])
    }
}

/// Every pair needed to value the given portfolios in `fiat`.
///
/// Includes the `BTC-<fiat>` and `ETH-<fiat>` bridges so BTC/ETH quoted
/// pairs can always be converted. Coins equal to the fiat symbol need no
/// ticker.
#[must_use]
pub fn ticker_subscriptions<'a>(
    portfolios: impl IntoIterator<Item = &'a PortfolioData>,
    mappings: &CoinMappings,
    fiat: &str,
) -> Vec<PairKey> {
    let mut pairs = BTreeSet::new();

    for bridge in BRIDGE_SYMBOLS {
        if let Ok(key) = PairKey::new(bridge, fiat) {
            pairs.insert(key);
        }
    }

    for portfolio in portfolios {
        for coin in portfolio.coins() {
            if coin == fiat {
                continue;
            }
            for quote in mappings.quotes_for(coin) {
                match PairKey::new(coin, quote) {
                    Ok(key) => {
                        pairs.insert(key);
                    }
                    Err(e) => tracing::warn!(coin, error = %e, "Skipping invalid pair"),
                }
            }
        }
    }

    pairs.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn portfolio(json: &str) -> PortfolioData {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn holdings_sum_wallets_and_skip_empty() {
        let data = portfolio(
            r#"{
                "BTC": {"wallets": [{"total": 0.5}, {"total": 0.25}, {}]},
                "ADA": {"wallets": [{"total": 0}]},
                "XMR": {}
            }"#,
        );

        let holdings = data.holdings();
        assert_eq!(holdings.len(), 3);

        let btc = holdings.iter().find(|h| h.coin == "BTC").unwrap();
        assert!((btc.quantity - 0.75).abs() < f64::EPSILON);

        let ada = holdings.iter().find(|h| h.coin == "ADA").unwrap();
        assert!(ada.quantity.abs() < f64::EPSILON);
    }

    #[test]
    fn wallet_extra_fields_are_ignored() {
        let data = portfolio(r#"{"ETH": {"wallets": [{"name": "ledger", "total": 2}]}}"#);
        assert!((data.holdings()[0].quantity - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn coin_symbols_are_upper_cased_and_merged() {
        let data = portfolio(r#"{"btc": {"wallets": [{"total": 1}]}, "BTC": {"wallets": [{"total": 2}]}}"#);

        assert_eq!(data.coins().collect::<Vec<_>>(), vec!["BTC"]);
        assert_eq!(data.holdings(), vec![Holding::new("BTC", 3.0)]);

        let pairs = ticker_subscriptions([&data], &CoinMappings::for_fiat("USD"), "USD");
        assert!(!pairs.iter().any(|p| p.to_string() == "BTC-BTC"));
        assert!(pairs.contains(&"BTC-USD".parse().unwrap()));
    }

    #[test]
    fn subscriptions_use_mappings_and_btc_default() {
        let data = portfolio(r#"{"BTC": {}, "ETH": {}, "ADA": {}, "USD": {}}"#);
        let pairs = ticker_subscriptions([&data], &CoinMappings::for_fiat("USD"), "USD");
        let names: Vec<String> = pairs.iter().map(ToString::to_string).collect();

        assert_eq!(names, vec!["ADA-BTC", "BTC-USD", "ETH-BTC", "ETH-USD"]);
    }

    #[test]
    fn subscriptions_deduplicate_across_portfolios() {
        let a = portfolio(r#"{"ADA": {}}"#);
        let b = portfolio(r#"{"ADA": {}, "XMR": {}}"#);
        let mappings = CoinMappings::for_fiat("EUR").with("XMR", vec!["EUR".to_string()]);

        let pairs = ticker_subscriptions([&a, &b], &mappings, "EUR");
        let names: Vec<String> = pairs.iter().map(ToString::to_string).collect();

        assert_eq!(names, vec!["ADA-BTC", "BTC-EUR", "ETH-EUR", "XMR-EUR"]);
    }
}
