//! CryptoCompare Streamer Adapter
//!
//! WebSocket client for the CryptoCompare streamer v2 aggregate ticker feed:
//!
//! - **client**: Connection lifecycle, subscription replay
//! - **dispatcher**: Frame classification into feed events
//! - **heartbeat**: Ping/pong accounting
//! - **messages**: Wire types for commands and inbound frames
//! - **reconnect**: Exponential backoff with jitter

pub mod client;
pub mod dispatcher;
pub mod heartbeat;
pub mod messages;
pub mod reconnect;

pub use client::{ConnectionManager, ConnectionState, StreamError, StreamerConfig};
pub use dispatcher::{FeedEvent, MessageDispatcher, ProtocolError, classify};
pub use heartbeat::{
    HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState, HeartbeatVerdict,
};
pub use messages::{ErrorFrame, SubscriptionAction, SubscriptionRequest, TickerFrame};
pub use reconnect::{ReconnectConfig, ReconnectError, ReconnectPolicy};
