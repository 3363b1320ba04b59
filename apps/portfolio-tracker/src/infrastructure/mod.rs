//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// CryptoCompare streamer WebSocket adapter.
pub mod cryptocompare;

/// Broadcast channel adapters for ticker and price fan-out.
pub mod broadcast;

/// Best-effort price table cache.
pub mod cache;

/// Environment configuration.
pub mod config;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Portfolio file loading.
pub mod portfolio;

/// Report file writer.
pub mod report;

/// Cancellable periodic tasks.
pub mod scheduler;

/// Logging and OpenTelemetry tracing integration.
pub mod telemetry;
