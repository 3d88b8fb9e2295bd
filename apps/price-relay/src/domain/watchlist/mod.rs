//! Watch-list and Symbol Cache
//!
//! Tracks the configured instruments and the last observed state of each.
//! The cache has a single writer (the ingestor's event path); it is a plain
//! data structure and performs no synchronization of its own.
//!
//! Order of the watch-list is not significant: removal swaps the last entry
//! into the vacated slot.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// Instruments tracked when no watch-list is configured.
pub const DEFAULT_WATCHLIST: [&str; 6] = [
    "BTCUSDT", "ETHUSDT", "BNBUSDT", "SOLUSDT", "ADAUSDT", "XRPUSDT",
];

/// Last known state of one instrument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolState {
    /// Instrument name, unique within the cache.
    pub name: String,
    /// Last observed price (`None` until the first event).
    pub last_price: Option<Decimal>,
    /// Last observed absolute change.
    pub last_change: Decimal,
    /// Last observed percent change.
    pub last_change_percent: Decimal,
    /// Last observed base volume.
    pub last_volume: Decimal,
    /// Time of the last event for this instrument.
    pub last_update_at: Option<DateTime<Utc>>,
}

impl SymbolState {
    /// Create an entry that has not yet received any data.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            last_price: None,
            last_change: Decimal::ZERO,
            last_change_percent: Decimal::ZERO,
            last_volume: Decimal::ZERO,
            last_update_at: None,
        }
    }
}

/// Observed values applied to a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    /// Last price.
    pub price: Decimal,
    /// Absolute change.
    pub change: Decimal,
    /// Percent change.
    pub change_percent: Decimal,
    /// Base volume.
    pub volume: Decimal,
    /// Time the observation was applied.
    pub at: DateTime<Utc>,
}

/// Result of a price lookup against the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceLookup {
    /// The symbol has a cached price.
    Price(Decimal),
    /// The symbol is watched but has not received an event yet.
    NoDataYet,
    /// The symbol is not on the watch-list.
    NotFound,
}

/// Per-instrument cache keyed by name.
#[derive(Debug, Clone, Default)]
pub struct SymbolCache {
    entries: Vec<SymbolState>,
}

impl SymbolCache {
    /// Build a cache from a watch-list, skipping duplicate names.
    #[must_use]
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut cache = Self::default();
        for name in names {
            cache.add(name);
        }
        cache
    }

    /// Build a cache over [`DEFAULT_WATCHLIST`].
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_WATCHLIST)
    }

    /// Add a symbol. Returns `false` if it was already present.
    pub fn add(&mut self, name: impl Into<String>) -> bool {
        let name = name.into();
        if self.contains(&name) {
            return false;
        }
        self.entries.push(SymbolState::new(name));
        true
    }

    /// Remove a symbol. Returns `false` if it was not present.
    pub fn remove(&mut self, name: &str) -> bool {
        match self.position(name) {
            Some(idx) => {
                self.entries.swap_remove(idx);
                true
            }
            None => false,
        }
    }

    /// Check whether a symbol is on the watch-list.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Apply an observation to a watched symbol.
    ///
    /// Returns `false` (and changes nothing) if the symbol is not watched.
    pub fn observe(&mut self, name: &str, observation: Observation) -> bool {
        let Some(entry) = self.entries.iter_mut().find(|e| e.name == name) else {
            return false;
        };

        entry.last_price = Some(observation.price);
        entry.last_change = observation.change;
        entry.last_change_percent = observation.change_percent;
        entry.last_volume = observation.volume;
        entry.last_update_at = Some(observation.at);
        true
    }

    /// Look up the last cached price of a symbol.
    #[must_use]
    pub fn price(&self, name: &str) -> PriceLookup {
        match self.get(name) {
            Some(SymbolState {
                last_price: Some(price),
                ..
            }) => PriceLookup::Price(*price),
            Some(_) => PriceLookup::NoDataYet,
            None => PriceLookup::NotFound,
        }
    }

    /// Get the cached state of a symbol.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&SymbolState> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Names of all watched symbols.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name.clone()).collect()
    }

    /// Number of watched symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether the watch-list is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.name == name)
    }
}
