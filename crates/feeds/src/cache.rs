//! Latest realtime price per symbol, scoped to one currency context.
//!
//! Entries live behind an `Arc` and are copied on write: a batch is applied
//! to a private copy whenever a snapshot is outstanding, so readers holding
//! a [`PriceSnapshot`] never observe a partially applied frame.

use std::collections::HashMap;
use std::sync::Arc;
use ticker_core::{Currency, PriceDirection, PriceRecord, PriceUpdate};
use tracing::trace;

/// Cached state for one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PriceEntry {
    /// Values from the most recent matching tick
    pub update: PriceUpdate,
    /// Price before the last price move; unchanged by repeated identical ticks.
    /// While the latest tick carries no price, this is the last known price.
    pub previous_price: Option<f64>,
}

impl PriceEntry {
    pub fn price(&self) -> Option<f64> {
        self.update.price
    }

    /// Direction of the last price move, if there has been one.
    pub fn direction(&self) -> Option<PriceDirection> {
        Some(PriceDirection::between(self.previous_price?, self.update.price?))
    }
}

/// A symbol's price moved.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceChange {
    pub symbol: String,
    pub previous: f64,
    pub current: f64,
    pub direction: PriceDirection,
}

/// Result of applying one batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyOutcome {
    /// Records written to the cache
    pub applied: usize,
    /// Records dropped for carrying another currency
    pub discarded: usize,
    /// Price moves caused by this batch, in record order
    pub changes: Vec<PriceChange>,
}

/// Where a displayed value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceSource {
    Live,
    Fallback,
}

/// A value ready for display, realtime when available.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayPrice {
    pub value: f64,
    pub source: PriceSource,
    /// Set only for live values that have moved
    pub direction: Option<PriceDirection>,
}

/// Immutable view of the cache at the moment it was taken.
#[derive(Debug, Clone, Default)]
pub struct PriceSnapshot {
    entries: Arc<HashMap<String, PriceEntry>>,
}

impl PriceSnapshot {
    /// Live entry for a symbol. `None` means "no realtime data yet".
    pub fn get(&self, symbol: &str) -> Option<&PriceEntry> {
        self.entries.get(symbol)
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.entries.contains_key(symbol)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PriceEntry)> {
        self.entries.iter().map(|(symbol, entry)| (symbol.as_str(), entry))
    }

    /// Prefer the live price, otherwise fall back to a non-realtime value
    /// (e.g. the last REST snapshot). Never invents a value.
    pub fn resolve(&self, symbol: &str, fallback: Option<f64>) -> Option<DisplayPrice> {
        if let Some(entry) = self.get(symbol) {
            if let Some(value) = entry.price() {
                return Some(DisplayPrice {
                    value,
                    source: PriceSource::Live,
                    direction: entry.direction(),
                });
            }
        }
        fallback.map(|value| DisplayPrice {
            value,
            source: PriceSource::Fallback,
            direction: None,
        })
    }
}

impl PartialEq for PriceSnapshot {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.entries, &other.entries) || self.entries == other.entries
    }
}

/// Single-writer price cache.
#[derive(Debug, Default)]
pub struct PriceCache {
    entries: Arc<HashMap<String, PriceEntry>>,
}

impl PriceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one frame's records.
    ///
    /// Records whose currency differs from `current` are discarded; the
    /// rest replace the symbol's entry wholesale (last write wins).
    pub fn apply_records(&mut self, records: &[PriceRecord], current: &Currency) -> ApplyOutcome {
        let mut outcome = ApplyOutcome::default();
        if records.is_empty() {
            return outcome;
        }

        // Outstanding snapshots would force a full copy for nothing.
        if !records.iter().any(|record| record.currency == *current) {
            outcome.discarded = records.len();
            trace!(
                discarded = outcome.discarded,
                currency = %current,
                "Dropped ticks for inactive currency"
            );
            return outcome;
        }

        let entries = Arc::make_mut(&mut self.entries);
        for record in records {
            if record.currency != *current {
                outcome.discarded += 1;
                continue;
            }

            let update = record.to_update();
            let existing = entries.get(&record.symbol).copied();
            let last_known = existing.and_then(|e| e.update.price.or(e.previous_price));

            let previous_price = match (last_known, update.price) {
                (Some(before), Some(after)) if before != after => {
                    outcome.changes.push(PriceChange {
                        symbol: record.symbol.clone(),
                        previous: before,
                        current: after,
                        direction: PriceDirection::between(before, after),
                    });
                    Some(before)
                }
                // Identical tick: keep the last move.
                (_, Some(_)) => existing
                    .filter(|e| e.update.price.is_some())
                    .and_then(|e| e.previous_price),
                (_, None) => last_known,
            };

            entries.insert(
                record.symbol.clone(),
                PriceEntry {
                    update,
                    previous_price,
                },
            );
            outcome.applied += 1;
        }

        if outcome.discarded > 0 {
            trace!(
                discarded = outcome.discarded,
                currency = %current,
                "Dropped ticks for inactive currency"
            );
        }
        outcome
    }

    /// Drop every entry. Outstanding snapshots keep their contents.
    pub fn clear(&mut self) {
        self.entries = Arc::new(HashMap::new());
    }

    pub fn snapshot(&self) -> PriceSnapshot {
        PriceSnapshot {
            entries: Arc::clone(&self.entries),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
