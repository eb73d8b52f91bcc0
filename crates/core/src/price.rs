//! Price data structures for realtime market data.

use crate::Currency;
use serde::{Deserialize, Serialize};

/// One decoded inbound tick for a single symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    /// Listing identifier (e.g. "AAPL-USD")
    pub symbol: String,
    /// Last traded price
    pub price: Option<f64>,
    /// Daily change in percent
    pub daily_change_percent: Option<f64>,
    /// One-month change in percent
    pub monthly_change_percent: Option<f64>,
    /// One-year change in percent
    pub yearly_change_percent: Option<f64>,
    /// Year-to-date change in percent
    pub ytd_change_percent: Option<f64>,
    /// Tick time in unix seconds
    pub timestamp_secs: Option<f64>,
    /// Currency the tick is denominated in
    pub currency: Currency,
}

impl PriceRecord {
    /// Create a record with no values set.
    pub fn new(symbol: impl Into<String>, currency: Currency) -> Self {
        Self {
            symbol: symbol.into(),
            price: None,
            daily_change_percent: None,
            monthly_change_percent: None,
            yearly_change_percent: None,
            ytd_change_percent: None,
            timestamp_secs: None,
            currency,
        }
    }

    pub fn with_price(mut self, price: f64) -> Self {
        self.price = Some(price);
        self
    }

    pub fn with_daily_change(mut self, percent: f64) -> Self {
        self.daily_change_percent = Some(percent);
        self
    }

    pub fn with_timestamp_secs(mut self, secs: f64) -> Self {
        self.timestamp_secs = Some(secs);
        self
    }

    /// Project this tick into the cached representation.
    pub fn to_update(&self) -> PriceUpdate {
        PriceUpdate {
            price: self.price,
            daily_change_percent: self.daily_change_percent,
            last_update_timestamp_ms: self.timestamp_secs.map(secs_to_millis),
        }
    }
}

/// Latest realtime values for a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PriceUpdate {
    pub price: Option<f64>,
    pub daily_change_percent: Option<f64>,
    /// Wall-clock time of the applied tick in milliseconds
    pub last_update_timestamp_ms: Option<u64>,
}

/// Direction of a price transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PriceDirection {
    Up,
    Down,
    Unchanged,
}

impl PriceDirection {
    /// Compare two observed prices.
    pub fn between(previous: f64, current: f64) -> Self {
        if current > previous {
            PriceDirection::Up
        } else if current < previous {
            PriceDirection::Down
        } else {
            PriceDirection::Unchanged
        }
    }

    /// Arrow glyph for terminal output.
    pub fn arrow(self) -> &'static str {
        match self {
            PriceDirection::Up => "▲",
            PriceDirection::Down => "▼",
            PriceDirection::Unchanged => "=",
        }
    }
}

/// Negative or non-finite timestamps clamp to zero.
fn secs_to_millis(secs: f64) -> u64 {
    let millis = (secs * 1000.0).round();
    if millis.is_finite() && millis > 0.0 {
        millis as u64
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn usd() -> Currency {
        Currency::new("USD").unwrap()
    }

    #[test]
    fn test_record_to_update() {
        let record = PriceRecord::new("AAPL-USD", usd())
            .with_price(189.5)
            .with_daily_change(1.2)
            .with_timestamp_secs(1_700_000_000.0);

        assert_eq!(
            record.to_update(),
            PriceUpdate {
                price: Some(189.5),
                daily_change_percent: Some(1.2),
                last_update_timestamp_ms: Some(1_700_000_000_000),
            }
        );
    }

    #[test]
    fn test_record_without_values_projects_to_empty_update() {
        let record = PriceRecord::new("BTC-USD", usd());
        assert_eq!(record.to_update(), PriceUpdate::default());
    }

    #[test]
    fn test_fractional_timestamp_rounds() {
        let record = PriceRecord::new("X", usd()).with_timestamp_secs(1.2345);
        assert_eq!(record.to_update().last_update_timestamp_ms, Some(1235));

        let negative = PriceRecord::new("X", usd()).with_timestamp_secs(-5.0);
        assert_eq!(negative.to_update().last_update_timestamp_ms, Some(0));
    }

    #[test]
    fn test_direction_between() {
        assert_eq!(PriceDirection::between(1.0, 2.0), PriceDirection::Up);
        assert_eq!(PriceDirection::between(2.0, 1.0), PriceDirection::Down);
        assert_eq!(PriceDirection::between(2.0, 2.0), PriceDirection::Unchanged);
    }
}
