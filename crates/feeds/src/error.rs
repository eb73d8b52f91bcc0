//! Error types for feed operations.

use thiserror::Error;
use ticker_core::CoreError;

/// Errors that can occur during feed operations.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Invalid feed endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("WebSocket connection failed: {0}")]
    ConnectionFailed(String),

    #[error("WebSocket disconnected: {0}")]
    Disconnected(String),

    #[error("Failed to parse message: {0}")]
    ParseError(String),

    #[error("Failed to encode control frame: {0}")]
    Encode(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Channel closed")]
    ChannelClosed,
}

impl From<tokio_tungstenite::tungstenite::Error> for FeedError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        FeedError::ConnectionFailed(err.to_string())
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(err: serde_json::Error) -> Self {
        FeedError::ParseError(err.to_string())
    }
}

impl From<url::ParseError> for FeedError {
    fn from(err: url::ParseError) -> Self {
        FeedError::InvalidEndpoint(err.to_string())
    }
}

impl FeedError {
    /// Returns true if a fresh connection could plausibly succeed.
    /// Supervisors use this to decide whether to reconnect or give up.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FeedError::ConnectionFailed(_) | FeedError::Disconnected(_) | FeedError::Timeout(_)
        )
    }
}

/// Errors raised at the subscription call boundary.
///
/// These are programmer errors: operational conditions (disconnects,
/// malformed ticks, stale currencies) never surface here.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubscriptionError {
    #[error("Invalid symbol: {0:?}")]
    InvalidSymbol(String),

    #[error(transparent)]
    InvalidCurrency(#[from] CoreError),

    #[error("Realtime hub has shut down")]
    HubClosed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(FeedError::Disconnected("stream ended".into()).is_transient());
        assert!(FeedError::Timeout("connect".into()).is_transient());
        assert!(!FeedError::InvalidEndpoint("nope".into()).is_transient());
        assert!(!FeedError::ParseError("bad".into()).is_transient());
    }

    #[test]
    fn test_url_error_maps_to_invalid_endpoint() {
        let err: FeedError = url::Url::parse("not a url").unwrap_err().into();
        assert!(matches!(err, FeedError::InvalidEndpoint(_)));
    }
}
