//! Feed message types for communication between the connection task and the hub.
//!
//! The connection task publishes `FeedMessage`s; it never touches the price
//! cache or subscription state directly.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use ticker_core::PriceRecord;

/// Identifies one connection manager instance.
///
/// Messages from a torn-down connection can still be queued when a fresh
/// connection opens; the tag lets consumers drop them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    /// Allocate a process-unique id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ConnectionId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Message sent from the connection task downstream.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    /// Records decoded from one inbound frame, in frame order
    Records {
        connection: ConnectionId,
        records: Vec<PriceRecord>,
    },
    /// Connection lifecycle event
    Event(ConnectionEvent),
}

/// WebSocket connection lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Transport established (`Connecting -> Open`)
    Connected(ConnectionId),
    /// Transport gone; terminal for this connection
    Closed(ConnectionId),
}

impl ConnectionEvent {
    /// Get the connection this event is about.
    pub fn connection(&self) -> ConnectionId {
        match self {
            ConnectionEvent::Connected(id) | ConnectionEvent::Closed(id) => *id,
        }
    }
}

impl FeedMessage {
    /// Get the connection this message came from.
    pub fn connection(&self) -> ConnectionId {
        match self {
            FeedMessage::Records { connection, .. } => *connection,
            FeedMessage::Event(event) => event.connection(),
        }
    }
}

impl From<ConnectionEvent> for FeedMessage {
    fn from(event: ConnectionEvent) -> Self {
        FeedMessage::Event(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ticker_core::Currency;

    #[test]
    fn test_connection_ids_are_unique() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn test_feed_message_connection() {
        let id = ConnectionId(7);
        let msg: FeedMessage = ConnectionEvent::Closed(id).into();
        assert!(matches!(msg, FeedMessage::Event(ConnectionEvent::Closed(_))));
        assert_eq!(msg.connection(), id);

        let usd = Currency::new("USD").unwrap();
        let msg = FeedMessage::Records {
            connection: id,
            records: vec![PriceRecord::new("AAPL-USD", usd)],
        };
        assert_eq!(msg.connection(), id);
    }
}
