//! Core data types for the tickalign system.

use chrono::NaiveDate;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

/// Timestamp in microseconds since Unix epoch (UTC).
pub type TimestampUs = i64;

/// Price type with total ordering, usable as a map key.
pub type Price = OrderedFloat<f64>;

/// Source sequence number, strictly increasing per symbol per source file.
pub type Sequence = u64;

/// Convert a timestamp to its UTC calendar date.
#[inline]
pub fn ts_to_date(ts_us: TimestampUs) -> NaiveDate {
    chrono::DateTime::from_timestamp_micros(ts_us)
        .map(|dt| dt.date_naive())
        .unwrap_or(NaiveDate::MIN)
}

/// Order book side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i8)]
pub enum BookSide {
    Bid = 1,
    Ask = -1,
}

impl BookSide {
    /// Get the sign as i8 (1 = bid, -1 = ask).
    #[inline]
    pub fn sign(self) -> i8 {
        self as i8
    }
}

/// Aggressor side of a trade, inferred from the source record's
/// bid/ask volume attribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i8)]
pub enum Aggressor {
    /// Buyer-initiated (trade lifted the ask).
    Buy = 1,
    /// Seller-initiated (trade hit the bid).
    Sell = -1,
    /// Attribution missing in the source record.
    Unknown = 0,
}

impl Aggressor {
    #[inline]
    pub fn sign(self) -> i8 {
        self as i8
    }
}

/// Kind of depth update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeltaKind {
    /// New price level.
    Insert,
    /// Size change at an existing level.
    Update,
    /// Level removed.
    Delete,
    /// Full-book snapshot boundary: both sides reset.
    Clear,
}

/// A single trade execution. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeEvent {
    /// Contract symbol (e.g. "ESU25").
    pub symbol: String,
    /// Exchange timestamp in microseconds.
    pub ts_us: TimestampUs,
    /// Trade price.
    pub price: f64,
    /// Trade size.
    pub size: u32,
    /// Aggressor side.
    pub aggressor: Aggressor,
    /// Source sequence number.
    pub sequence: Sequence,
    /// Set when the source clock jumped backwards (session rollover).
    /// Passed through, never corrected.
    pub rollover: bool,
}

/// An incremental order book update. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthDelta {
    /// Contract symbol.
    pub symbol: String,
    /// Exchange timestamp in microseconds.
    pub ts_us: TimestampUs,
    /// Book side the update applies to. Meaningless for `Clear`.
    pub side: BookSide,
    /// Price level.
    pub price: f64,
    /// New size at the level (0 = remove).
    pub size: u32,
    /// Update kind.
    pub kind: DeltaKind,
    /// Source sequence number.
    pub sequence: Sequence,
    /// Session rollover flag from the source record.
    pub rollover: bool,
}

/// Typed event produced by format readers and the streaming adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MarketEvent {
    Trade(TradeEvent),
    Depth(DepthDelta),
}

impl MarketEvent {
    /// Symbol the event belongs to.
    pub fn symbol(&self) -> &str {
        match self {
            MarketEvent::Trade(t) => &t.symbol,
            MarketEvent::Depth(d) => &d.symbol,
        }
    }

    /// Event timestamp.
    pub fn ts_us(&self) -> TimestampUs {
        match self {
            MarketEvent::Trade(t) => t.ts_us,
            MarketEvent::Depth(d) => d.ts_us,
        }
    }

    /// Source sequence number.
    pub fn sequence(&self) -> Sequence {
        match self {
            MarketEvent::Trade(t) => t.sequence,
            MarketEvent::Depth(d) => d.sequence,
        }
    }
}

/// Uniform forward-only event contract shared by file readers and the
/// streaming adapter. Per-record failures are yielded inline; the stream
/// continues past them.
pub trait EventSource {
    /// Produce the next event, `None` at end of stream.
    fn next_event(&mut self) -> Option<crate::Result<MarketEvent>>;
}

/// Book synchronization status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStatus {
    /// Every sequence number applied in order since the last full snapshot.
    Synced,
    /// A gap or reconciliation occurred; book contents are best-effort.
    Unsynced,
}

/// One price level of a materialized snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: f64,
    pub size: u32,
}

/// Immutable top-N materialization of a book at a requested instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookSnapshot {
    /// The instant the snapshot was requested for. Never later than the
    /// timestamp of the trade it is attached to.
    pub as_of_us: TimestampUs,
    /// Timestamp of the most recently applied delta.
    pub last_delta_ts_us: TimestampUs,
    /// Sequence of the most recently applied delta.
    pub last_sequence: Sequence,
    /// Sync status at materialization time.
    pub status: SyncStatus,
    /// Bids, best (highest) first.
    pub bids: Vec<BookLevel>,
    /// Asks, best (lowest) first.
    pub asks: Vec<BookLevel>,
}

impl BookSnapshot {
    /// Best bid, if any.
    pub fn best_bid(&self) -> Option<BookLevel> {
        self.bids.first().copied()
    }

    /// Best ask, if any.
    pub fn best_ask(&self) -> Option<BookLevel> {
        self.asks.first().copied()
    }

    /// Mid price, when both sides are present.
    pub fn mid(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some(b), Some(a)) => Some((b.price + a.price) / 2.0),
            _ => None,
        }
    }
}

/// Qualitative reliability marker on an aligned record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Confidence {
    /// Book synced and clocks consistent within tolerance.
    Full,
    /// Book unsynced at alignment time, or clock disagreement beyond
    /// tolerance. The record is still valid, just less trustworthy.
    Reduced,
}

/// Alignment metadata attached to every aligned record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlignmentMeta {
    pub confidence: Confidence,
    /// Signed estimate of trade-clock minus depth-clock disagreement:
    /// trade ts minus the last applied delta ts, in microseconds.
    pub skew_us: i64,
    /// Whether the book was synced when the snapshot was taken.
    pub book_synced: bool,
}

/// A trade paired with the book state effective at its timestamp.
/// Created exactly once per input trade, immutable thereafter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignedRecord {
    pub trade: TradeEvent,
    pub book: BookSnapshot,
    pub meta: AlignmentMeta,
}

/// Partition key for canonical output: (UTC date, symbol).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionKey {
    pub date: NaiveDate,
    pub symbol: String,
}

impl PartitionKey {
    pub fn new(date: NaiveDate, symbol: impl Into<String>) -> Self {
        Self { date, symbol: symbol.into() }
    }

    /// Key for the partition an event falls into.
    pub fn for_event(event: &MarketEvent) -> Self {
        Self::new(ts_to_date(event.ts_us()), event.symbol())
    }
}

impl std::fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.date, self.symbol)
    }
}
