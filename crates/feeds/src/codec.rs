//! Wire format for the realtime price feed.
//!
//! Inbound frames carry one tick object or an array of them; outbound
//! control frames ask the server to start or stop streaming symbols.

use crate::FeedError;
use serde::{Deserialize, Serialize};
use ticker_core::{Currency, PriceRecord};

#[derive(Debug, Deserialize)]
struct WireTick {
    symbol: String,
    #[serde(rename = "p")]
    price: Option<f64>,
    #[serde(rename = "d1")]
    daily: Option<f64>,
    #[serde(rename = "m1")]
    monthly: Option<f64>,
    #[serde(rename = "y1")]
    yearly: Option<f64>,
    ytd: Option<f64>,
    #[serde(rename = "ts")]
    timestamp_secs: Option<f64>,
    currency: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireFrame {
    Batch(Vec<WireTick>),
    Single(WireTick),
}

impl TryFrom<WireTick> for PriceRecord {
    type Error = FeedError;

    fn try_from(tick: WireTick) -> Result<Self, Self::Error> {
        let currency =
            Currency::new(&tick.currency).map_err(|e| FeedError::ParseError(e.to_string()))?;
        Ok(PriceRecord {
            symbol: tick.symbol,
            price: tick.price,
            daily_change_percent: tick.daily,
            monthly_change_percent: tick.monthly,
            yearly_change_percent: tick.yearly,
            ytd_change_percent: tick.ytd,
            timestamp_secs: tick.timestamp_secs,
            currency,
        })
    }
}

/// Decode one inbound frame into records, preserving frame order.
///
/// A frame with any malformed element is rejected as a whole.
pub fn decode_frame(text: &str) -> Result<Vec<PriceRecord>, FeedError> {
    let ticks = match serde_json::from_str::<WireFrame>(text)? {
        WireFrame::Batch(ticks) => ticks,
        WireFrame::Single(tick) => vec![tick],
    };
    ticks.into_iter().map(PriceRecord::try_from).collect()
}

/// Control frame action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlAction {
    Subscribe,
    Unsubscribe,
}

/// Outbound subscribe/unsubscribe instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlFrame {
    pub action: ControlAction,
    pub symbols: Vec<String>,
    pub currency: Currency,
}

impl ControlFrame {
    pub fn subscribe(symbols: Vec<String>, currency: Currency) -> Self {
        Self {
            action: ControlAction::Subscribe,
            symbols,
            currency,
        }
    }

    pub fn unsubscribe(symbols: Vec<String>, currency: Currency) -> Self {
        Self {
            action: ControlAction::Unsubscribe,
            symbols,
            currency,
        }
    }

    pub fn is_subscribe(&self) -> bool {
        self.action == ControlAction::Subscribe
    }

    /// Encode as the JSON text sent over the socket.
    pub fn to_json(&self) -> Result<String, FeedError> {
        serde_json::to_string(self).map_err(|e| FeedError::Encode(e.to_string()))
    }
}
