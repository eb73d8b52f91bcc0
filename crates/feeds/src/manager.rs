//! Connection state and configuration for the price feed.

use std::time::Duration;

/// Connection state for the price feed.
///
/// A manager starts in `Connecting` and ends in `Closed`; a closed
/// connection never reopens. Reconnecting means a fresh manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Connecting,
    Open,
    Closed,
}

impl ConnectionState {
    /// Transition to open state. A closed connection stays closed.
    pub fn opened(self) -> Self {
        match self {
            ConnectionState::Closed => ConnectionState::Closed,
            _ => ConnectionState::Open,
        }
    }

    /// Transition to closed state.
    pub fn closed(self) -> Self {
        ConnectionState::Closed
    }

    /// Check if open.
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }

    /// Check if closed.
    pub fn is_closed(&self) -> bool {
        matches!(self, ConnectionState::Closed)
    }
}

/// Configuration for a feed connection.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// WebSocket URL
    pub ws_url: String,
    /// Ping interval to keep connection alive (ms)
    pub ping_interval_ms: u64,
    /// Close the connection if no PONG arrives this long after a PING (ms)
    pub ping_timeout_ms: u64,
    /// Close the connection if no frame at all arrives for this long (ms)
    pub stale_timeout_ms: u64,
    /// Connection timeout (ms)
    pub connect_timeout_ms: u64,
    /// Buffer size of the inbound message channel
    pub channel_capacity: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            ws_url: String::new(),
            ping_interval_ms: 20_000,
            ping_timeout_ms: 30_000,
            stale_timeout_ms: 120_000,
            connect_timeout_ms: 10_000,
            channel_capacity: 1000,
        }
    }
}

impl FeedConfig {
    /// Create config for an endpoint with default timings.
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            ..Default::default()
        }
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    pub fn stale_timeout(&self) -> Duration {
        Duration::from_millis(self.stale_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_transitions() {
        let mut state = ConnectionState::default();
        assert_eq!(state, ConnectionState::Connecting);

        state = state.opened();
        assert!(state.is_open());

        state = state.closed();
        assert!(state.is_closed());
    }

    #[test]
    fn test_closed_is_terminal() {
        let state = ConnectionState::Connecting.closed();
        assert_eq!(state.opened(), ConnectionState::Closed);
    }

    #[test]
    fn test_feed_config_default() {
        let config = FeedConfig::default();
        assert!(config.ping_interval_ms > 0);
        assert!(config.ping_timeout_ms > 0);
        assert!(config.stale_timeout_ms > config.ping_interval_ms);
        assert!(config.channel_capacity > 0);
    }

    #[test]
    fn test_feed_config_new() {
        let config = FeedConfig::new("wss://feed.example.com/prices");
        assert_eq!(config.ws_url, "wss://feed.example.com/prices");
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
    }
}
