//! Price Snapshots and Coalesced Batches
//!
//! A [`PriceUpdate`] is produced once per upstream ticker event. Updates are
//! coalesced into a [`Batch`] that holds at most one entry per symbol
//! (last writer wins) while preserving first-insertion order, then
//! serialized into the `multi_update` wire message.
//!
//! # Wire Format (JSON)
//!
//! ```json
//! {"type":"multi_update","data":[
//!   {"symbol":"BTCUSDT","price":94250.5,"change":125.3,"changePercent":0.13,
//!    "volume":15234567890,"timestamp":"14:23:45.123"}
//! ]}
//! ```

use std::sync::Arc;

use chrono::{DateTime, TimeZone};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Serialize, Serializer};

/// Message type tag carried by every batch.
pub const MULTI_UPDATE_TYPE: &str = "multi_update";

/// Wall-clock format used for the `timestamp` field (`HH:MM:SS.mmm`).
pub const TIMESTAMP_FORMAT: &str = "%H:%M:%S%.3f";

/// Serialized outbound message shared by every sink it is delivered to.
pub type Payload = Arc<str>;

// =============================================================================
// Price Update
// =============================================================================

/// Immutable price snapshot for one instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceUpdate {
    /// Instrument name (e.g. `BTCUSDT`).
    pub symbol: String,
    /// Last traded price.
    #[serde(serialize_with = "serialize_decimal_number")]
    pub price: Decimal,
    /// Absolute price change.
    #[serde(serialize_with = "serialize_decimal_number")]
    pub change: Decimal,
    /// Percent price change.
    #[serde(serialize_with = "serialize_decimal_number")]
    pub change_percent: Decimal,
    /// Base volume truncated to an integer.
    pub volume: i64,
    /// Conversion wall-clock time, formatted `HH:MM:SS.mmm`.
    pub timestamp: String,
}

impl PriceUpdate {
    /// Build an update from already-parsed values, stamping it with `at`.
    ///
    /// The volume is truncated toward zero; values outside the `i64` range
    /// collapse to zero.
    #[must_use]
    pub fn new<Tz>(
        symbol: impl Into<String>,
        price: Decimal,
        change: Decimal,
        change_percent: Decimal,
        volume: Decimal,
        at: &DateTime<Tz>,
    ) -> Self
    where
        Tz: TimeZone,
        Tz::Offset: std::fmt::Display,
    {
        Self {
            symbol: symbol.into(),
            price,
            change,
            change_percent,
            volume: volume.trunc().to_i64().unwrap_or(0),
            timestamp: format_timestamp(at),
        }
    }
}

/// Format a wall-clock instant as `HH:MM:SS.mmm`.
#[must_use]
pub fn format_timestamp<Tz>(at: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a string-encoded decimal, defaulting to zero on any failure.
#[must_use]
pub fn parse_decimal_or_zero(raw: &str) -> Decimal {
    raw.trim().parse::<Decimal>().unwrap_or_default()
}

/// Emit a decimal as a plain JSON number in its shortest form.
///
/// Integral values are written without a fractional part (`101`, not
/// `101.0`) and trailing zeros are dropped (`94250.5`).
///
/// # Errors
///
/// Propagates the serializer's error.
pub fn serialize_decimal_number<S>(value: &Decimal, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let normalized = value.normalize();
    if normalized.scale() == 0
        && let Some(integral) = normalized.to_i64()
    {
        return serializer.serialize_i64(integral);
    }
    serializer.serialize_f64(normalized.to_f64().unwrap_or(0.0))
}

// =============================================================================
// Batch
// =============================================================================

/// Pending collection of updates, unique by symbol.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    updates: Vec<PriceUpdate>,
}

/// Borrowed wire view of a batch.
#[derive(Serialize)]
struct MultiUpdate<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    data: &'a [PriceUpdate],
}

impl Batch {
    /// Create an empty batch.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            updates: Vec::new(),
        }
    }

    /// Insert an update, replacing any existing entry for the same symbol
    /// in place; otherwise append it.
    pub fn upsert(&mut self, update: PriceUpdate) {
        match self
            .updates
            .iter_mut()
            .find(|existing| existing.symbol == update.symbol)
        {
            Some(existing) => *existing = update,
            None => self.updates.push(update),
        }
    }

    /// Number of distinct symbols in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.updates.len()
    }

    /// Check whether the batch holds no updates.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    /// Updates in insertion order.
    #[must_use]
    pub fn updates(&self) -> &[PriceUpdate] {
        &self.updates
    }

    /// Serialize into the `multi_update` JSON message.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&MultiUpdate {
            kind: MULTI_UPDATE_TYPE,
            data: &self.updates,
        })
    }

    /// Serialize into a shareable payload.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn to_payload(&self) -> Result<Payload, serde_json::Error> {
        self.to_json().map(Payload::from)
    }
}

impl FromIterator<PriceUpdate> for Batch {
    fn from_iter<I: IntoIterator<Item = PriceUpdate>>(iter: I) -> Self {
        let mut batch = Self::new();
        for update in iter {
            batch.upsert(update);
        }
        batch
    }
}

// =============================================================================
// Tests
// =============================================================================
