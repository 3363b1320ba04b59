//! Report Presentation
//!
//! Pure rendering of tickers and valuations into the shapes written to the
//! report files: templated ticker lines, summary rows and the aligned
//! summary table.

use std::time::Duration;

use serde::Serialize;

use crate::domain::pricing::PriceTable;
use crate::domain::streaming::Ticker;
use crate::domain::valuation::{ValuationResult, round_for_display};

/// Default ticker line template.
pub const DEFAULT_TICKER_FORMAT: &str = "{from}{to}{price}{outdated}";

/// Default marker appended to stale tickers.
pub const DEFAULT_OUTDATED_SYMBOL: &str = "!";

// =============================================================================
// Ticker Formatting
// =============================================================================

/// Options shared by every formatted ticker line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickerFormat {
    /// Template with `{from}`, `{to}`, `{price}` and `{outdated}` fields.
    pub template: String,
    /// Substituted for `{outdated}` when the ticker is stale.
    pub outdated_symbol: String,
    /// Age after which a ticker is stale.
    pub max_ticker_age: Duration,
}

impl Default for TickerFormat {
    fn default() -> Self {
        Self {
            template: DEFAULT_TICKER_FORMAT.to_string(),
            outdated_symbol: DEFAULT_OUTDATED_SYMBOL.to_string(),
            max_ticker_age: Duration::from_secs(3600),
        }
    }
}

/// Display label for a fiat currency: `$` for USD, otherwise the code.
#[must_use]
pub fn fiat_label(fiat: &str) -> &str {
    if fiat == "USD" { "$" } else { fiat }
}

/// Render one ticker through the template.
///
/// Tickers quoted in `fiat` are shown with its label. With `fiat_bridged`
/// the derived fiat price is shown instead of the raw quote. BTC-quoted
/// tickers are shown in µBTC. Unknown `{...}` fields are left untouched.
#[must_use]
pub fn format_ticker(
    format: &TickerFormat,
    ticker: &Ticker,
    fiat: &str,
    now: i64,
    fiat_bridged: bool,
) -> String {
    let (symbol, price) = if ticker.to == fiat {
        (fiat_label(fiat), ticker.price)
    } else if fiat_bridged {
        (fiat_label(fiat), ticker.derived_fiat_price.unwrap_or(ticker.price))
    } else if ticker.to == "BTC" {
        ("µBTC", ticker.price * 1e6)
    } else {
        (ticker.to.as_str(), ticker.price)
    };

    let outdated = if ticker.is_outdated(now, format.max_ticker_age) {
        format.outdated_symbol.as_str()
    } else {
        ""
    };

    format
        .template
        .replace("{from}", &ticker.from)
        .replace("{to}", symbol)
        .replace("{price}", &round_for_display(price).to_string())
        .replace("{outdated}", outdated)
}

/// Formatted lines for every ticker in key order.
///
/// Tickers with a derived fiat price get a second, fiat-bridged line.
#[must_use]
pub fn ticker_lines(format: &TickerFormat, table: &PriceTable, fiat: &str, now: i64) -> Vec<String> {
    let mut lines = Vec::with_capacity(table.len());
    for (_, ticker) in table.iter() {
        lines.push(format_ticker(format, ticker, fiat, now, false));
        if ticker.derived_fiat_price.is_some() {
            lines.push(format_ticker(format, ticker, fiat, now, true));
        }
    }
    lines
}

// =============================================================================
// Summary
// =============================================================================

/// One row of the portfolio summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRow {
    /// Coin symbol.
    pub coin: String,
    /// Held quantity, display-rounded.
    pub coin_balance: f64,
    /// Fiat currency.
    pub currency: String,
    /// Fiat price, display-rounded.
    pub price: f64,
    /// Fiat value, display-rounded.
    pub balance: f64,
}

/// Summary rows sorted by descending balance.
///
/// Zero-value coins are skipped, except BTC which is always listed.
#[must_use]
pub fn summary_rows(valuation: &ValuationResult) -> Vec<SummaryRow> {
    let mut rows: Vec<SummaryRow> = valuation
        .per_coin
        .values()
        .filter(|c| c.fiat_value != 0.0 || c.coin == "BTC")
        .map(|c| SummaryRow {
            coin: c.coin.clone(),
            coin_balance: round_for_display(c.quantity),
            currency: valuation.currency.clone(),
            price: round_for_display(c.fiat_price),
            balance: round_for_display(c.fiat_value),
        })
        .collect();

    rows.sort_by(|a, b| b.balance.total_cmp(&a.balance));
    rows
}

/// Render summary rows as an aligned table with an upper-case header.
///
/// Text columns are left-aligned; price and balance are right-aligned.
#[must_use]
pub fn render_summary_table(rows: &[SummaryRow]) -> String {
    const HEADERS: [&str; 5] = ["COIN", "COIN_BALANCE", "CURRENCY", "PRICE", "BALANCE"];
    const RIGHT_ALIGNED: [bool; 5] = [false, false, false, true, true];

    let cells: Vec<[String; 5]> = rows
        .iter()
        .map(|r| {
            [
                r.coin.clone(),
                r.coin_balance.to_string(),
                r.currency.clone(),
                r.price.to_string(),
                r.balance.to_string(),
            ]
        })
        .collect();

    let mut widths = HEADERS.map(str::len);
    for row in &cells {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let render_line = |line: [&str; 5]| {
        let mut out = String::new();
        for (i, cell) in line.iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            let pad = widths[i].saturating_sub(cell.chars().count());
            if RIGHT_ALIGNED[i] {
                out.push_str(&" ".repeat(pad));
                out.push_str(cell);
            } else {
                out.push_str(cell);
                out.push_str(&" ".repeat(pad));
            }
        }
        out.trim_end().to_string()
    };

    let mut lines = vec![render_line(HEADERS)];
    for row in &cells {
        lines.push(render_line([
            row[0].as_str(),
            row[1].as_str(),
            row[2].as_str(),
            row[3].as_str(),
            row[4].as_str(),
        ]));
    }
    lines.join("\n")
}

// =============================================================================
// Stats Document
// =============================================================================

/// Contents of the `<key>.stats.json` report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioStats {
    /// Fiat currency.
    pub currency: String,
    /// Unrounded total fiat value.
    pub balance: f64,
    /// Formatted ticker lines.
    pub tickers: Vec<String>,
    /// Summary rows.
    pub summary: Vec<SummaryRow>,
}

impl PortfolioStats {
    /// Assemble the stats document for one portfolio.
    #[must_use]
    pub fn build(valuation: &ValuationResult, table: &PriceTable, format: &TickerFormat) -> Self {
        Self {
            currency: valuation.currency.clone(),
            balance: valuation.total_fiat_value,
            tickers: ticker_lines(format, table, &valuation.currency, valuation.computed_at),
            summary: summary_rows(valuation),
        }
    }
}
