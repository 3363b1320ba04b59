//! CryptoCompare Streamer Message Types
//!
//! Wire format types for the CryptoCompare streamer v2 WebSocket API.
//!
//! # Message Types
//!
//! ## Outbound
//! - `SubscriptionRequest`: `SubAdd` / `SubRemove` with channel tokens
//!
//! ## Inbound (discriminated by `MESSAGE`, falling back to `TYPE`)
//! - `STREAMERWELCOME`: session ready, subscriptions may be sent
//! - `SUBSCRIBECOMPLETE` / `LOADCOMPLETE`: subscription acknowledgments
//! - `TYPE "5"`: aggregate index ticker update (`TickerFrame`)
//! - `ERROR`: provider-side error
//! - `HEARTBEAT`: provider keep-alive
//!
//! # Wire Format (JSON)
//! ```json
//! {"action": "SubAdd", "subs": ["5~CCCAGG~BTC~USD"]}
//! {"TYPE": "5", "FROMSYMBOL": "BTC", "TOSYMBOL": "USD", "PRICE": 50000, "LASTUPDATE": 1700000000}
//! ```

use serde::{Deserialize, Serialize};

use crate::domain::streaming::{PairKey, Ticker};
use crate::domain::subscription::channel_token;

/// Default streamer endpoint.
pub const STREAMER_URL: &str = "wss://streamer.cryptocompare.com/v2";

/// Discriminator of the session welcome frame.
pub const STREAMER_WELCOME: &str = "STREAMERWELCOME";
/// Discriminator of subscription acknowledgments.
pub const SUBSCRIBE_COMPLETE: &str = "SUBSCRIBECOMPLETE";
/// Discriminator of the end of the initial snapshot load.
pub const LOAD_COMPLETE: &str = "LOADCOMPLETE";
/// Discriminator of aggregate index ticker frames.
pub const TICKER_TYPE: &str = "5";
/// Discriminator of provider errors.
pub const ERROR: &str = "ERROR";
/// Discriminator of provider keep-alive frames.
pub const HEARTBEAT: &str = "HEARTBEAT";

/// Numeric `TYPE` codes the streamer uses for error frames whose `MESSAGE`
/// names the specific failure (e.g. `INVALID_SUB`).
pub const ERROR_TYPE_CODES: [&str; 3] = ["401", "429", "500"];

/// Build the authenticated connection URL for an endpoint.
#[must_use]
pub fn connection_url(endpoint: &str, api_key: &str) -> String {
    let separator = if endpoint.contains('?') { '&' } else { '?' };
    format!("{endpoint}{separator}api_key={api_key}")
}

// =============================================================================
// Outbound
// =============================================================================

/// Subscription command action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscriptionAction {
    /// Add channels.
    SubAdd,
    /// Remove channels.
    SubRemove,
}

/// Subscription command sent to the streamer.
///
/// # Wire Format (JSON)
/// ```json
/// {"action": "SubRemove", "subs": ["5~CCCAGG~ADA~BTC"]}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRequest {
    /// Add or remove.
    pub action: SubscriptionAction,
    /// Channel tokens.
    pub subs: Vec<String>,
}

impl SubscriptionRequest {
    /// Build a command for a set of pairs.
    #[must_use]
    pub fn new(action: SubscriptionAction, pairs: &[PairKey]) -> Self {
        Self {
            action,
            subs: pairs.iter().map(channel_token).collect(),
        }
    }

    /// Subscribe command.
    #[must_use]
    pub fn add(pairs: &[PairKey]) -> Self {
        Self::new(SubscriptionAction::SubAdd, pairs)
    }

    /// Unsubscribe command.
    #[must_use]
    pub fn remove(pairs: &[PairKey]) -> Self {
        Self::new(SubscriptionAction::SubRemove, pairs)
    }
}

// =============================================================================
// Inbound
// =============================================================================

/// Aggregate index ticker frame (`TYPE "5"`).
///
/// Every field may be absent: after the first full snapshot the streamer
/// only sends fields that changed.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TickerFrame {
    /// Price-direction flags.
    #[serde(rename = "FLAGS")]
    pub flags: Option<u64>,
    /// Base symbol.
    #[serde(rename = "FROMSYMBOL")]
    pub from_symbol: Option<String>,
    /// Quote symbol.
    #[serde(rename = "TOSYMBOL")]
    pub to_symbol: Option<String>,
    /// Last price.
    #[serde(rename = "PRICE")]
    pub price: Option<f64>,
    /// 24h volume in the base symbol.
    #[serde(rename = "VOLUME24HOUR")]
    pub volume_24h: Option<f64>,
    /// 24h volume in the quote symbol.
    #[serde(rename = "VOLUME24HOURTO")]
    pub volume_24h_to: Option<f64>,
    /// 24h top-tier volume in the base symbol.
    #[serde(rename = "TOPTIERVOLUME24HOUR")]
    pub top_tier_volume_24h: Option<f64>,
    /// 24h top-tier volume in the quote symbol.
    #[serde(rename = "TOPTIERVOLUME24HOURTO")]
    pub top_tier_volume_24h_to: Option<f64>,
    /// Last update, unix seconds.
    #[serde(rename = "LASTUPDATE")]
    pub last_update: Option<f64>,
    /// Exchange of the last trade.
    #[serde(rename = "MARKET")]
    pub market: Option<String>,
}

impl TickerFrame {
    /// Normalize into a domain ticker.
    ///
    /// Returns `None` unless both symbols are present and price and
    /// timestamp are present and non-zero.
    #[must_use]
    pub fn into_ticker(self) -> Option<Ticker> {
        let price = self.price.filter(|p| *p != 0.0)?;
        let timestamp = self.last_update.filter(|t| *t != 0.0)?;
        let from = self.from_symbol.filter(|s| !s.is_empty())?;
        let to = self.to_symbol.filter(|s| !s.is_empty())?;

        #[allow(clippy::cast_possible_truncation)]
        let mut ticker = Ticker::new(from, to, price, timestamp.trunc() as i64);
        ticker.volume_24h_from = self.volume_24h;
        ticker.volume_24h_to = self.volume_24h_to;
        ticker.top_tier_volume_24h_from = self.top_tier_volume_24h;
        ticker.top_tier_volume_24h_to = self.top_tier_volume_24h_to;
        ticker.last_market = self.market;
        ticker.flags = self.flags;
        Some(ticker)
    }
}

/// Provider error frame.
///
/// # Wire Format (JSON)
/// ```json
/// {"TYPE": "500", "MESSAGE": "INVALID_SUB", "PARAMETER": "5~CCCAGG~XXX~USD", "INFO": "..."}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ErrorFrame {
    /// Numeric type code.
    #[serde(rename = "TYPE", default, deserialize_with = "string_or_number")]
    pub type_code: Option<String>,
    /// Error name.
    #[serde(rename = "MESSAGE")]
    pub message: Option<String>,
    /// Offending parameter, e.g. a channel token.
    #[serde(rename = "PARAMETER")]
    pub parameter: Option<String>,
    /// Human-readable description.
    #[serde(rename = "INFO")]
    pub info: Option<String>,
}

/// Accept `"5"` and `5` alike.
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }))
}
