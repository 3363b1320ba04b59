//! Portfolio Valuation
//!
//! Converts holdings into fiat values using the price table, tolerating
//! missing and stale prices.
//!
//! # Price Resolution
//!
//! For each holding, in order:
//! 1. direct `<COIN>-<fiat>` ticker
//! 2. `<COIN>-BTC` ticker with a derived fiat price
//! 3. `<COIN>-ETH` ticker with a derived fiat price
//!
//! Coins without any of these are reported as missing and contribute
//! nothing to the total. Stale prices are flagged but still counted.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use crate::domain::portfolio::Holding;
use crate::domain::pricing::{BRIDGE_SYMBOLS, PriceTable};
use crate::domain::streaming::{PairKey, Ticker};

// =============================================================================
// Display Rounding
// =============================================================================

/// Display rounding tier selected by magnitude.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundingTier {
    /// Values above 100: nearest integer.
    Whole,
    /// Values in (1, 100]: two decimals.
    Hundredths,
    /// Values at or below 1: three decimals.
    Thousandths,
}

impl RoundingTier {
    /// Select the tier for a value.
    #[must_use]
    pub fn for_value(value: f64) -> Self {
        if value > 100.0 {
            Self::Whole
        } else if value > 1.0 {
            Self::Hundredths
        } else {
            Self::Thousandths
        }
    }

    /// Number of decimal places kept.
    #[must_use]
    pub const fn decimals(self) -> u32 {
        match self {
            Self::Whole => 0,
            Self::Hundredths => 2,
            Self::Thousandths => 3,
        }
    }

    /// Round a value to this tier.
    #[must_use]
    pub fn round(self, value: f64) -> f64 {
        let scale = f64::from(10_u32.pow(self.decimals()));
        (value * scale).round() / scale
    }
}

/// Round a value using the tier its magnitude selects.
#[must_use]
pub fn round_for_display(value: f64) -> f64 {
    RoundingTier::for_value(value).round(value)
}

// =============================================================================
// Valuation Result
// =============================================================================

/// How a coin's fiat price was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PriceSource {
    /// Direct fiat pair.
    Direct(PairKey),
    /// Pair quoted in a bridge symbol, converted with its derived fiat price.
    Bridged {
        /// The BTC/ETH-quoted pair.
        pair: PairKey,
        /// Bridge symbol.
        via: String,
    },
}

/// Valuation of a single coin.
#[derive(Debug, Clone, PartialEq)]
pub struct CoinValuation {
    /// Coin symbol.
    pub coin: String,
    /// Held quantity.
    pub quantity: f64,
    /// Resolved fiat price per unit.
    pub fiat_price: f64,
    /// `quantity * fiat_price`.
    pub fiat_value: f64,
    /// Resolved ticker is older than the maximum ticker age.
    pub outdated: bool,
    /// Where the price came from.
    pub source: PriceSource,
}

/// Snapshot valuation of a set of holdings.
#[derive(Debug, Clone, PartialEq)]
pub struct ValuationResult {
    /// Fiat currency of all values.
    pub currency: String,
    /// Resolved coins.
    pub per_coin: BTreeMap<String, CoinValuation>,
    /// Sum of resolved fiat values.
    pub total_fiat_value: f64,
    /// Coins with no resolvable price.
    pub missing_coins: BTreeSet<String>,
    /// Unix seconds the valuation was computed at.
    pub computed_at: i64,
}

impl ValuationResult {
    /// Coins ordered by descending fiat value, ties by symbol.
    #[must_use]
    pub fn ranked(&self) -> Vec<&CoinValuation> {
        let mut coins: Vec<_> = self.per_coin.values().collect();
        coins.sort_by(|a, b| {
            b.fiat_value
                .total_cmp(&a.fiat_value)
                .then_with(|| a.coin.cmp(&b.coin))
        });
        coins
    }

    /// Number of resolved coins flagged outdated.
    #[must_use]
    pub fn outdated_count(&self) -> usize {
        self.per_coin.values().filter(|c| c.outdated).count()
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Value `holdings` in `target_fiat` against the current price table.
///
/// `now` is unix seconds; a resolved ticker is outdated when
/// `now - ticker.timestamp > max_ticker_age`.
#[must_use]
pub fn compute_valuation(
    holdings: &[Holding],
    table: &PriceTable,
    target_fiat: &str,
    max_ticker_age: Duration,
    now: i64,
) -> ValuationResult {
    let mut per_coin = BTreeMap::new();
    let mut missing_coins = BTreeSet::new();

    for holding in holdings {
        let Some((ticker, fiat_price, source)) = resolve_price(table, &holding.coin, target_fiat)
        else {
            missing_coins.insert(holding.coin.clone());
            continue;
        };

        per_coin.insert(
            holding.coin.clone(),
            CoinValuation {
                coin: holding.coin.clone(),
                quantity: holding.quantity,
                fiat_price,
                fiat_value: holding.quantity * fiat_price,
                outdated: ticker.is_outdated(now, max_ticker_age),
                source,
            },
        );
    }

    if !missing_coins.is_empty() {
        let missing: Vec<&str> = missing_coins.iter().map(String::as_str).collect();
        tracing::debug!(missing = %missing.join(", "), "Missing tickers");
    }

    let mut values: Vec<f64> = per_coin.values().map(|c| c.fiat_value).collect();
    values.sort_by(|a, b| b.total_cmp(a));
    let total_fiat_value = values.iter().sum();

    ValuationResult {
        currency: target_fiat.to_string(),
        per_coin,
        total_fiat_value,
        missing_coins,
        computed_at: now,
    }
}

/// Find a usable fiat price for `coin`.
fn resolve_price<'a>(
    table: &'a PriceTable,
    coin: &str,
    fiat: &str,
) -> Option<(&'a Ticker, f64, PriceSource)> {
    if let Some(direct) = table.get_pair(coin, fiat) {
        let key = PairKey::new(coin, fiat).ok()?;
        return Some((direct, direct.price, PriceSource::Direct(key)));
    }

    BRIDGE_SYMBOLS.iter().find_map(|bridge| {
        let ticker = table.get_pair(coin, bridge)?;
        let price = ticker.derived_fiat_price?;
        let pair = PairKey::new(coin, *bridge).ok()?;
        Some((
            ticker,
            price,
            PriceSource::Bridged {
                pair,
                via: (*bridge).to_string(),
            },
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    const NOW: i64 = 1_700_000_000;
    const MAX_AGE: Duration = Duration::from_secs(3600);

    fn table(entries: &[(&str, &str, f64, i64)]) -> PriceTable {
        let mut table = PriceTable::new();
        for (from, to, price, ts) in entries {
            table
                .apply(Ticker::new(*from, *to, *price, *ts), "USD")
                .unwrap();
        }
        table
    }

    #[test_case(150.4, RoundingTier::Whole, 150.0 ; "above 100")]
    #[test_case(100.0, RoundingTier::Hundredths, 100.0 ; "exactly 100")]
    #[test_case(2.345_6, RoundingTier::Hundredths, 2.35 ; "between 1 and 100")]
    #[test_case(1.0, RoundingTier::Thousandths, 1.0 ; "exactly 1")]
    #[test_case(0.123_45, RoundingTier::Thousandths, 0.123 ; "below 1")]
    fn rounding_tiers(value: f64, tier: RoundingTier, rounded: f64) {
        assert_eq!(RoundingTier::for_value(value), tier);
        assert!((round_for_display(value) - rounded).abs() < 1e-9);
    }

    #[test]
    fn direct_fiat_valuation() {
        let table = table(&[("ETH", "USD", 3000.0, NOW)]);
        let result = compute_valuation(&[Holding::new("ETH", 10.0)], &table, "USD", MAX_AGE, NOW);

        let eth = &result.per_coin["ETH"];
        assert!((eth.fiat_value - 30_000.0).abs() < 1e-9);
        assert_eq!(RoundingTier::for_value(eth.fiat_value), RoundingTier::Whole);
        assert!((round_for_display(eth.fiat_value) - 30_000.0).abs() < f64::EPSILON);
        assert!(!eth.outdated);
        assert!((result.total_fiat_value - 30_000.0).abs() < 1e-9);
    }

    #[test]
    fn bridged_valuation_uses_derived_price() {
        let table = table(&[("BTC", "USD", 50_000.0, NOW), ("COIN", "BTC", 0.002, NOW)]);
        let result = compute_valuation(&[Holding::new("COIN", 3.0)], &table, "USD", MAX_AGE, NOW);

        let coin = &result.per_coin["COIN"];
        assert!((coin.fiat_price - 100.0).abs() < 1e-9);
        assert!((coin.fiat_value - 300.0).abs() < 1e-9);
        assert!(matches!(&coin.source, PriceSource::Bridged { via, .. } if via == "BTC"));
    }

    #[test]
    fn eth_bridge_used_when_btc_bridge_lacks_fiat_price() {
        // COIN-BTC exists but was stored before BTC-USD, so it has no derived price.
        let table = table(&[
            ("COIN", "BTC", 0.002, NOW),
            ("ETH", "USD", 3000.0, NOW),
            ("COIN", "ETH", 0.01, NOW),
        ]);
        let result = compute_valuation(&[Holding::new("COIN", 1.0)], &table, "USD", MAX_AGE, NOW);

        let coin = &result.per_coin["COIN"];
        assert!((coin.fiat_price - 30.0).abs() < 1e-9);
        assert!(matches!(&coin.source, PriceSource::Bridged { via, .. } if via == "ETH"));
    }

    #[test]
    fn missing_coin_excluded_from_total() {
        let table = table(&[("ETH", "USD", 3000.0, NOW), ("COIN", "BTC", 0.002, NOW)]);
        let holdings = [Holding::new("ETH", 1.0), Holding::new("COIN", 1000.0)];
        let result = compute_valuation(&holdings, &table, "USD", MAX_AGE, NOW);

        assert!(result.missing_coins.contains("COIN"));
        assert!(!result.per_coin.contains_key("COIN"));
        assert!((result.total_fiat_value - 3000.0).abs() < 1e-9);
    }

    #[test]
    fn stale_prices_are_flagged_but_counted() {
        let table = table(&[("BTC", "USD", 50_000.0, NOW - 7200), ("ETH", "USD", 3000.0, NOW - 100)]);
        let holdings = [Holding::new("BTC", 1.0), Holding::new("ETH", 1.0)];
        let result = compute_valuation(&holdings, &table, "USD", MAX_AGE, NOW);

        assert!(result.per_coin["BTC"].outdated);
        assert!(!result.per_coin["ETH"].outdated);
        assert_eq!(result.outdated_count(), 1);
        assert!((result.total_fiat_value - 53_000.0).abs() < 1e-9);
    }

    #[test]
    fn ranked_orders_by_descending_value() {
        let table = table(&[
            ("BTC", "USD", 50_000.0, NOW),
            ("ETH", "USD", 3000.0, NOW),
            ("ADA", "USD", 0.5, NOW),
        ]);
        let holdings = [
            Holding::new("ADA", 10.0),
            Holding::new("ETH", 2.0),
            Holding::new("BTC", 0.1),
        ];
        let result = compute_valuation(&holdings, &table, "USD", MAX_AGE, NOW);

        let order: Vec<&str> = result.ranked().iter().map(|c| c.coin.as_str()).collect();
        assert_eq!(order, vec!["ETH", "BTC", "ADA"]);
    }

    proptest! {
        #[test]
        fn rounding_stays_within_tier_precision(value in 0.0_f64..1_000_000.0) {
            let tier = RoundingTier::for_value(value);
            let half_step = 0.5 / f64::from(10_u32.pow(tier.decimals()));
            prop_assert!((tier.round(value) - value).abs() <= half_step + 1e-9);
        }
    }
}
