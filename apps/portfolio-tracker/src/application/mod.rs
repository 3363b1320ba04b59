//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Port interfaces for report output and price notifications.
pub mod ports;

/// Application services for price aggregation and portfolio valuation.
pub mod services;
