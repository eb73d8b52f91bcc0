//! Subscription tracking for the realtime price feed.
//!
//! [`SubscriptionTracker`] turns "what the consumers want" into the minimal
//! set of subscribe/unsubscribe control frames. It is pure state: callers
//! send the returned frames and clear the cache when the plan says so.
//!
//! ```rust
//! use ticker_core::Currency;
//! use ticker_feeds::SubscriptionTracker;
//!
//! let usd = Currency::new("USD").unwrap();
//! let mut tracker = SubscriptionTracker::new();
//!
//! // Not connected yet: desired state is buffered.
//! let plan = tracker.set_desired(["AAPL-USD", "MSFT-USD"], usd.clone()).unwrap();
//! assert!(plan.frames.is_empty());
//!
//! // Connection opens: one subscribe frame for everything desired.
//! let frames = tracker.on_open();
//! assert_eq!(frames.len(), 1);
//! assert!(frames[0].is_subscribe());
//! ```

use crate::{ControlFrame, SubscriptionError};
use std::collections::BTreeSet;
use ticker_core::Currency;
use tracing::debug;

/// What to do after the desired state changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionPlan {
    /// Frames to send, in order (unsubscribe before subscribe)
    pub frames: Vec<ControlFrame>,
    /// The currency context changed; the price cache must be cleared now
    pub clear_cache: bool,
}

/// Validate and deduplicate caller-supplied symbols.
pub fn validate_symbols<I, S>(symbols: I) -> Result<BTreeSet<String>, SubscriptionError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    symbols
        .into_iter()
        .map(|symbol| {
            let symbol = symbol.into();
            if symbol.is_empty() || symbol.chars().any(char::is_whitespace) {
                Err(SubscriptionError::InvalidSymbol(symbol))
            } else {
                Ok(symbol)
            }
        })
        .collect()
}

/// Desired vs. last-sent subscription state for one connection.
#[derive(Debug, Default)]
pub struct SubscriptionTracker {
    desired: BTreeSet<String>,
    currency: Option<Currency>,
    /// Symbols the server is streaming for us on the current connection
    active: BTreeSet<String>,
    active_currency: Option<Currency>,
    open: bool,
}

impl SubscriptionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the desired symbol set and currency context.
    ///
    /// While open, the returned plan carries the diff against what is active.
    /// While not open, nothing is sent and the state is buffered for
    /// [`on_open`](Self::on_open).
    pub fn set_desired<I, S>(
        &mut self,
        symbols: I,
        currency: Currency,
    ) -> Result<SubscriptionPlan, SubscriptionError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let desired = validate_symbols(symbols)?;
        let clear_cache = self.currency.as_ref() != Some(&currency);
        if clear_cache {
            debug!(
                from = ?self.currency.as_ref().map(Currency::as_str),
                to = %currency,
                "Currency context changed"
            );
        }

        self.desired = desired;
        self.currency = Some(currency);

        let frames = if self.open { self.sync() } else { Vec::new() };
        Ok(SubscriptionPlan {
            frames,
            clear_cache,
        })
    }

    /// The connection reached `Open`: subscribe to everything desired.
    ///
    /// Nothing is active on a fresh connection, so no unsubscribe is produced.
    pub fn on_open(&mut self) -> Vec<ControlFrame> {
        self.open = true;
        self.active.clear();
        self.active_currency = None;
        self.sync()
    }

    /// The connection closed: nothing is active anymore. Desired state is kept.
    pub fn on_closed(&mut self) {
        self.open = false;
        self.active.clear();
        self.active_currency = None;
    }

    /// Stop wanting anything. Returns the unsubscribe to send if still open.
    pub fn teardown(&mut self) -> Vec<ControlFrame> {
        self.desired.clear();
        let frames = match (&self.active_currency, self.open) {
            (Some(currency), true) if !self.active.is_empty() => {
                let symbols = std::mem::take(&mut self.active).into_iter().collect();
                vec![ControlFrame::unsubscribe(symbols, currency.clone())]
            }
            _ => Vec::new(),
        };
        self.active.clear();
        frames
    }

    pub fn desired(&self) -> &BTreeSet<String> {
        &self.desired
    }

    pub fn currency(&self) -> Option<&Currency> {
        self.currency.as_ref()
    }

    pub fn active(&self) -> &BTreeSet<String> {
        &self.active
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Bring `active` in line with `desired`, returning the frames needed.
    fn sync(&mut self) -> Vec<ControlFrame> {
        let Some(currency) = self.currency.clone() else {
            return Vec::new();
        };

        let (to_unsubscribe, to_subscribe): (Vec<String>, Vec<String>) =
            if self.active_currency.as_ref() == Some(&currency) {
                (
                    self.active.difference(&self.desired).cloned().collect(),
                    self.desired.difference(&self.active).cloned().collect(),
                )
            } else {
                (
                    self.active.iter().cloned().collect(),
                    self.desired.iter().cloned().collect(),
                )
            };

        let mut frames = Vec::with_capacity(2);
        if !to_unsubscribe.is_empty() {
            // Unsubscribe goes out under whatever currency it was subscribed with.
            let previous = self.active_currency.clone().unwrap_or_else(|| currency.clone());
            frames.push(ControlFrame::unsubscribe(to_unsubscribe, previous));
        }
        if !to_subscribe.is_empty() {
            frames.push(ControlFrame::subscribe(to_subscribe, currency.clone()));
        }

        self.active = self.desired.clone();
        self.active_currency = Some(currency);
        frames
    }
}
