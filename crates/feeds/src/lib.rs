//! Realtime price subscriptions over a single WebSocket connection.
//!
//! This crate streams price ticks for a set of symbols in one currency
//! context and keeps the latest value per symbol.
//!
//! ## Architecture
//!
//! - `websocket` - Connection manager; decodes frames and emits `FeedMessage`
//! - `subscription` - Desired vs. active symbols, minimal control-frame diffs
//! - `cache` - Latest price per symbol, copy-on-write snapshots
//! - `hub` - Consumer surface tying the above together on one task
//! - `supervisor` - Reconnect backoff driven by the published view

pub mod cache;
pub mod codec;
pub mod error;
pub mod hub;
pub mod manager;
pub mod message;
pub mod subscription;
pub mod supervisor;
pub mod websocket;

#[cfg(test)]
mod test_support;

pub use cache::*;
pub use codec::{decode_frame, ControlAction, ControlFrame};
pub use error::*;
pub use hub::{PriceWatch, RealtimeHandle, RealtimeView};
pub use manager::*;
pub use message::{ConnectionEvent, ConnectionId, FeedMessage};
pub use subscription::{validate_symbols, SubscriptionPlan, SubscriptionTracker};
pub use supervisor::{ReconnectPolicy, ReconnectSupervisor, SupervisorExit};
pub use websocket::{parse_endpoint, ConnectionManager};
