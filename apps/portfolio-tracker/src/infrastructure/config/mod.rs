//! Configuration Module
//!
//! Configuration loading for the tracker binary and its components.

mod settings;

pub use settings::{
    ApiKey, ConfigError, PortfolioSource, ReportSettings, SaveFormat, StreamSettings,
    TrackerConfig, ValuationSettings,
};
