//! Portfolio Tracker Binary
//!
//! Streams tickers for every coin in the configured portfolios and writes
//! valuation reports on a fixed interval.
//!
//! # Usage
//!
//! ```bash
//! CRYPTOCOMPARE_API_KEY=... TRACKER_PORTFOLIOS=main.json TRACKER_DESTINATIONS=out \
//!     cargo run --bin portfolio-tracker
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `CRYPTOCOMPARE_API_KEY`: Streamer API key
//!
//! ## Optional
//! - `TRACKER_PORTFOLIOS` / `TRACKER_DESTINATIONS`: Portfolio files and report directories
//! - `TRACKER_TARGET_CURRENCY`: Fiat currency (default: USD)
//! - `TRACKER_SAVE`: Report formats (default: statsjson)
//! - `TRACKER_CACHE_PATH`: Price table cache file (default: disabled)
//! - `TRACKER_METRICS_PORT`: Prometheus port (default: disabled)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: false)
//! - `RUST_LOG`: Log level (default: info)
//!
//! Sending `SIGHUP` reloads the portfolio files.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use portfolio_tracker::application::ports::PriceNotifier;
use portfolio_tracker::infrastructure::broadcast::{BroadcastConfig, BroadcastHub};
use portfolio_tracker::infrastructure::cache::PriceCache;
use portfolio_tracker::infrastructure::config::{PortfolioSource, SaveFormat};
use portfolio_tracker::infrastructure::metrics::{self, PersistTarget};
use portfolio_tracker::infrastructure::portfolio;
use portfolio_tracker::infrastructure::report::ReportWriter;
use portfolio_tracker::infrastructure::scheduler::PeriodicTask;
use portfolio_tracker::infrastructure::telemetry;
use portfolio_tracker::{
    ConnectionManager, PairKey, PriceAggregator, PriceTable, SharedPriceTable, StreamerConfig,
    TrackerConfig, ValuationService, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| "failed to install rustls crypto provider")?;

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Portfolio Tracker");

    let config = TrackerConfig::from_env()?;
    log_config(&config);

    init_metrics(config.metrics_port)?;

    portfolio::verify_sources(&config.reports.portfolios)?;
    let portfolios = portfolio::load_all(&config.reports.portfolios).await?;

    let shutdown_token = CancellationToken::new();
    let fiat = config.valuation.target_currency.clone();

    // Price table, seeded from the cache when one is configured
    let cache = config.reports.cache_path.clone().map(PriceCache::new);
    let table: SharedPriceTable = Arc::new(RwLock::new(load_cache(cache.as_ref()).await));

    // Broadcast hub and price aggregator
    let hub = Arc::new(BroadcastHub::new(BroadcastConfig::with_capacity(
        config.stream.ticker_channel_capacity,
    )));
    let notifier: Arc<dyn PriceNotifier> = Arc::clone(&hub) as Arc<dyn PriceNotifier>;
    let aggregator = Arc::new(PriceAggregator::new(Arc::clone(&table), fiat.as_str(), notifier));
    tokio::spawn(Arc::clone(&aggregator).run(hub.ticker_updates_rx(), shutdown_token.clone()));
    let stats = hub.stats();
    tracing::debug!(
        ticker_receivers = stats.ticker_updates_receivers,
        price_receivers = stats.price_updates_receivers,
        "Broadcast hub ready"
    );

    // Valuation service writing report files
    let writer = Arc::new(ReportWriter::new(config.reports.save_formats.clone()));
    let valuation = Arc::new(ValuationService::new(
        Arc::clone(&table),
        fiat.as_str(),
        config.ticker_format(),
        writer,
    ));
    let pairs = valuation.replace_portfolios(portfolios);

    // Streamer connection
    let manager = Arc::new(ConnectionManager::new(
        StreamerConfig::from_settings(&config.stream),
        Arc::clone(&hub),
    ));
    manager.subscribe(&pairs);

    let connector = Arc::clone(&manager);
    tokio::spawn(async move {
        match connector.connect().await {
            Ok(()) => tracing::info!("Streamer connected"),
            Err(e) => tracing::error!(error = %e, "Streamer connection failed"),
        }
    });

    // Periodic save
    let save_task = {
        let valuation = Arc::clone(&valuation);
        let table = Arc::clone(&table);
        PeriodicTask::spawn(
            "save",
            config.reports.save_interval,
            &shutdown_token,
            move || {
                let valuation = Arc::clone(&valuation);
                let table = Arc::clone(&table);
                let cache = cache.clone();
                async move {
                    valuation.publish_all(chrono::Utc::now().timestamp()).await;
                    if let Some(cache) = cache {
                        store_cache(&cache, &table).await;
                    }
                }
            },
        )
    };

    // Periodic reload
    let sources = Arc::new(config.reports.portfolios.clone());
    let reload_task = {
        let sources = Arc::clone(&sources);
        let valuation = Arc::clone(&valuation);
        let manager = Arc::clone(&manager);
        PeriodicTask::spawn(
            "reload",
            config.reports.reload_interval,
            &shutdown_token,
            move || {
                let sources = Arc::clone(&sources);
                let valuation = Arc::clone(&valuation);
                let manager = Arc::clone(&manager);
                async move { reload_portfolios(&sources, &valuation, &manager).await }
            },
        )
    };

    spawn_hangup_reload(sources, Arc::clone(&valuation), Arc::clone(&manager), shutdown_token.clone());

    tracing::info!("Portfolio tracker ready");

    await_shutdown(shutdown_token).await;

    save_task.shutdown().await;
    reload_task.shutdown().await;
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, manager.disconnect())
        .await
        .is_err()
    {
        tracing::warn!("Streamer did not close within the shutdown timeout");
    }

    tracing::info!("Portfolio tracker stopped");
    Ok(())
}

/// Reload every portfolio and resync the stream subscriptions.
///
/// On failure the previous portfolios stay in place.
async fn reload_portfolios(
    sources: &[PortfolioSource],
    valuation: &ValuationService,
    manager: &ConnectionManager,
) {
    tracing::debug!("Reloading portfolios");
    match portfolio::load_all(sources).await {
        Ok(portfolios) => {
            let wanted: BTreeSet<PairKey> = valuation.replace_portfolios(portfolios).into_iter().collect();
            let current: BTreeSet<PairKey> = manager.subscriptions().into_iter().collect();

            let stale: Vec<PairKey> = current.difference(&wanted).cloned().collect();
            let added: Vec<PairKey> = wanted.difference(&current).cloned().collect();
            manager.unsubscribe(&stale);
            manager.subscribe(&added);
        }
        Err(e) => {
            tracing::warn!(error = %e, "Portfolio reload failed, keeping previous portfolios");
            metrics::record_persistence_error(PersistTarget::Portfolio);
        }
    }
}

/// Reload portfolios on `SIGHUP`.
#[cfg(unix)]
fn spawn_hangup_reload(
    sources: Arc<Vec<PortfolioSource>>,
    valuation: Arc<ValuationService>,
    manager: Arc<ConnectionManager>,
    shutdown: CancellationToken,
) {
    let mut hangup = match signal::unix::signal(signal::unix::SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(e) => {
            tracing::warn!(error = %e, "SIGHUP handler unavailable");
            return;
        }
    };

    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                received = hangup.recv() => {
                    if received.is_none() {
                        break;
                    }
                    tracing::info!("Received SIGHUP, reloading portfolios");
                    reload_portfolios(&sources, &valuation, &manager).await;
                }
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_hangup_reload(
    _sources: Arc<Vec<PortfolioSource>>,
    _valuation: Arc<ValuationService>,
    _manager: Arc<ConnectionManager>,
    _shutdown: CancellationToken,
) {
}

/// Load the cached price table, or an empty one.
async fn load_cache(cache: Option<&PriceCache>) -> PriceTable {
    let Some(cache) = cache else {
        return PriceTable::new();
    };
    match cache.load().await {
        Ok(table) => {
            tracing::info!(path = %cache.path().display(), tickers = table.len(), "Price cache loaded");
            table
        }
        Err(e) => {
            tracing::debug!(error = %e, "Cannot use price cache, skipping");
            PriceTable::new()
        }
    }
}

/// Write the price table to the cache, logging failures.
async fn store_cache(cache: &PriceCache, table: &SharedPriceTable) {
    let snapshot = table.read().clone();
    if let Err(e) = cache.store(&snapshot).await {
        tracing::debug!(error = %e, "Price cache not written");
        metrics::record_persistence_error(PersistTarget::Cache);
    }
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &TrackerConfig) {
    let formats: Vec<&str> = config
        .reports
        .save_formats
        .iter()
        .copied()
        .map(SaveFormat::as_str)
        .collect();
    tracing::info!(
        currency = %config.valuation.target_currency,
        portfolios = config.reports.portfolios.len(),
        save = %formats.join(","),
        metrics_port = ?config.metrics_port,
        "Configuration loaded"
    );
    tracing::debug!(
        endpoint = %config.stream.url,
        heartbeat_secs = config.stream.heartbeat_interval.as_secs(),
        max_ticker_age_secs = config.valuation.max_ticker_age.as_secs(),
        cache = ?config.reports.cache_path,
        "Stream settings"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
