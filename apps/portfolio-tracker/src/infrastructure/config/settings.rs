//! Tracker Configuration Settings
//!
//! Configuration types for the portfolio tracker, loaded from environment
//! variables.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::domain::presentation::{DEFAULT_OUTDATED_SYMBOL, DEFAULT_TICKER_FORMAT, TickerFormat};
use crate::infrastructure::cryptocompare::messages::STREAMER_URL;

/// CryptoCompare API key.
#[derive(Clone)]
pub struct ApiKey(String);

impl ApiKey {
    /// Wrap a key.
    #[must_use]
    pub const fn new(key: String) -> Self {
        Self(key)
    }

    /// Get the key.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey([REDACTED])")
    }
}

/// Streamer connection settings.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Streamer endpoint, without the API key.
    pub url: String,
    /// API credential.
    pub api_key: ApiKey,
    /// Ping interval.
    pub heartbeat_interval: Duration,
    /// Pings without any pong before the session is reset.
    pub heartbeat_max_lost: u32,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Maximum consecutive reconnection attempts (0 = unlimited).
    pub max_reconnect_attempts: u32,
    /// Capacity of the ticker-update broadcast channel.
    pub ticker_channel_capacity: usize,
}

impl StreamSettings {
    /// Default settings for a key.
    #[must_use]
    pub fn new(api_key: ApiKey) -> Self {
        Self {
            url: STREAMER_URL.to_string(),
            api_key,
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_max_lost: 3,
            reconnect_delay_initial: Duration::from_millis(500),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_delay_multiplier: 2.0,
            max_reconnect_attempts: 0,
            ticker_channel_capacity: 1024,
        }
    }
}

/// Valuation settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValuationSettings {
    /// Fiat symbol portfolios are valued in.
    pub target_currency: String,
    /// Age after which a ticker is flagged outdated.
    pub max_ticker_age: Duration,
}

impl Default for ValuationSettings {
    fn default() -> Self {
        Self {
            target_currency: "USD".to_string(),
            max_ticker_age: Duration::from_secs(3600),
        }
    }
}

/// Report file written on every save tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SaveFormat {
    /// `<key>.stats.json`
    StatsJson,
    /// `<key>.balance.txt`
    BalanceTxt,
    /// `<key>.tickers.txt`
    TickersTxt,
    /// `<key>.summary.txt`
    SummaryTxt,
}

impl SaveFormat {
    /// Every format.
    pub const ALL: [Self; 4] = [
        Self::StatsJson,
        Self::BalanceTxt,
        Self::TickersTxt,
        Self::SummaryTxt,
    ];

    /// Configuration name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StatsJson => "statsjson",
            Self::BalanceTxt => "balancetxt",
            Self::TickersTxt => "tickerstxt",
            Self::SummaryTxt => "summarytxt",
        }
    }

    /// File name suffix after the portfolio key.
    #[must_use]
    pub const fn file_suffix(self) -> &'static str {
        match self {
            Self::StatsJson => "stats.json",
            Self::BalanceTxt => "balance.txt",
            Self::TickersTxt => "tickers.txt",
            Self::SummaryTxt => "summary.txt",
        }
    }
}

impl FromStr for SaveFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|f| f.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ConfigError::InvalidValue {
                key: "TRACKER_SAVE".to_string(),
                value: s.to_string(),
            })
    }
}

/// A portfolio file and the directory its reports go to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortfolioSource {
    /// Portfolio JSON file.
    pub path: PathBuf,
    /// Report directory.
    pub destination: PathBuf,
}

/// Report and persistence settings.
#[derive(Debug, Clone)]
pub struct ReportSettings {
    /// Tracked portfolios.
    pub portfolios: Vec<PortfolioSource>,
    /// Files written per portfolio.
    pub save_formats: BTreeSet<SaveFormat>,
    /// Ticker line template.
    pub ticker_format: String,
    /// Marker for stale tickers.
    pub outdated_symbol: String,
    /// Interval between report writes.
    pub save_interval: Duration,
    /// Interval between portfolio reloads.
    pub reload_interval: Duration,
    /// Price table cache file (disabled when `None`).
    pub cache_path: Option<PathBuf>,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            portfolios: Vec::new(),
            save_formats: BTreeSet::from([SaveFormat::StatsJson]),
            ticker_format: DEFAULT_TICKER_FORMAT.to_string(),
            outdated_symbol: DEFAULT_OUTDATED_SYMBOL.to_string(),
            save_interval: Duration::from_secs(1),
            reload_interval: Duration::from_secs(600),
            cache_path: None,
        }
    }
}

/// Complete tracker configuration.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Streamer connection settings.
    pub stream: StreamSettings,
    /// Valuation settings.
    pub valuation: ValuationSettings,
    /// Report settings.
    pub reports: ReportSettings,
    /// Prometheus exporter port (disabled when `None`).
    pub metrics_port: Option<u16>,
}

impl TrackerConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the API key is missing or a value is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if the API key is missing or a value is invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let api_key = env
            .get("CRYPTOCOMPARE_API_KEY")
            .ok_or_else(|| ConfigError::MissingEnvVar("CRYPTOCOMPARE_API_KEY".to_string()))?;
        if api_key.trim().is_empty() {
            return Err(ConfigError::EmptyValue("CRYPTOCOMPARE_API_KEY".to_string()));
        }

        let defaults = StreamSettings::new(ApiKey::new(String::new()));
        let stream = StreamSettings {
            url: env.get("TRACKER_STREAM_URL").unwrap_or(defaults.url),
            api_key: ApiKey::new(api_key),
            heartbeat_interval: env
                .duration_secs("TRACKER_HEARTBEAT_INTERVAL_SECS", defaults.heartbeat_interval)
                .max(Duration::from_secs(1)),
            heartbeat_max_lost: env
                .parse("TRACKER_HEARTBEAT_MAX_LOST", defaults.heartbeat_max_lost)
                .max(1),
            reconnect_delay_initial: env.duration_millis(
                "TRACKER_RECONNECT_DELAY_INITIAL_MS",
                defaults.reconnect_delay_initial,
            ),
            reconnect_delay_max: env
                .duration_secs("TRACKER_RECONNECT_DELAY_MAX_SECS", defaults.reconnect_delay_max),
            reconnect_delay_multiplier: env.parse(
                "TRACKER_RECONNECT_DELAY_MULTIPLIER",
                defaults.reconnect_delay_multiplier,
            ),
            max_reconnect_attempts: env
                .parse("TRACKER_MAX_RECONNECT_ATTEMPTS", defaults.max_reconnect_attempts),
            ticker_channel_capacity: env
                .parse("TRACKER_TICKER_CHANNEL_CAPACITY", defaults.ticker_channel_capacity)
                .max(1),
        };

        let valuation_defaults = ValuationSettings::default();
        let valuation = ValuationSettings {
            target_currency: env
                .get("TRACKER_TARGET_CURRENCY")
                .map(|s| s.trim().to_uppercase())
                .unwrap_or(valuation_defaults.target_currency),
            max_ticker_age: env
                .duration_secs("TRACKER_MAX_TICKER_AGE_SECS", valuation_defaults.max_ticker_age),
        };

        let report_defaults = ReportSettings::default();
        let save_formats = match env.get("TRACKER_SAVE") {
            Some(raw) => split_list(&raw)
                .map(|s| s.parse())
                .collect::<Result<BTreeSet<_>, _>>()?,
            None => report_defaults.save_formats,
        };
        let reports = ReportSettings {
            portfolios: portfolio_sources(
                env.get("TRACKER_PORTFOLIOS").as_deref(),
                env.get("TRACKER_DESTINATIONS").as_deref(),
            )?,
            save_formats,
            ticker_format: env
                .get("TRACKER_TICKER_FORMAT")
                .unwrap_or(report_defaults.ticker_format),
            outdated_symbol: env
                .get("TRACKER_OUTDATED_SYMBOL")
                .unwrap_or(report_defaults.outdated_symbol),
            save_interval: env
                .duration_millis("TRACKER_SAVE_INTERVAL_MS", report_defaults.save_interval),
            reload_interval: env
                .duration_secs("TRACKER_RELOAD_INTERVAL_SECS", report_defaults.reload_interval),
            cache_path: env.get("TRACKER_CACHE_PATH").map(PathBuf::from),
        };

        let metrics_port = Some(env.parse::<u16>("TRACKER_METRICS_PORT", 0)).filter(|p| *p != 0);

        Ok(Self {
            stream,
            valuation,
            reports,
            metrics_port,
        })
    }

    /// Ticker formatting options derived from the report and valuation settings.
    #[must_use]
    pub fn ticker_format(&self) -> TickerFormat {
        TickerFormat {
            template: self.reports.ticker_format.clone(),
            outdated_symbol: self.reports.outdated_symbol.clone(),
            max_ticker_age: self.valuation.max_ticker_age,
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable has an unusable value.
    #[error("invalid value {value:?} for {key}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
    },
}

/// Non-empty lookup with typed fallbacks.
struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.is_empty())
    }

    fn parse<T: FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn duration_secs(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn duration_millis(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty())
}

/// Pair portfolio paths with destinations; the last destination repeats.
fn portfolio_sources(
    portfolios: Option<&str>,
    destinations: Option<&str>,
) -> Result<Vec<PortfolioSource>, ConfigError> {
    let paths: Vec<&str> = portfolios.map(|p| split_list(p).collect()).unwrap_or_default();
    if paths.is_empty() {
        return Ok(Vec::new());
    }

    let destinations: Vec<&str> = destinations.map(|d| split_list(d).collect()).unwrap_or_default();
    let Some(last) = destinations.last() else {
        return Err(ConfigError::MissingEnvVar("TRACKER_DESTINATIONS".to_string()));
    };

    Ok(paths
        .iter()
        .enumerate()
        .map(|(i, path)| PortfolioSource {
            path: PathBuf::from(path),
            destination: PathBuf::from(destinations.get(i).unwrap_or(last)),
        })
        .collect())
}
