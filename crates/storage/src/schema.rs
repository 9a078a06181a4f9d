//! Canonical output schema.
//!
//! The schema is versioned and strictly additive: new columns append with
//! the version they arrived in, existing columns never change meaning or
//! type. A reader built against an older version reads newer data by
//! ignoring trailing columns.

use serde::{Deserialize, Serialize};
use tickalign_core::{
    ts_to_date, Aggressor, AlignedRecord, Confidence, DepthDelta, SyncStatus, TradeEvent,
};

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 2;

/// Column data types, as written by the serializer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Date,
    Utf8,
    Int64,
    Float64,
    UInt32,
    Int8,
    Bool,
    Float64List,
    UInt32List,
}

/// One column of the canonical schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub name: &'static str,
    pub dtype: ColumnType,
    /// Schema version that introduced the column.
    pub added_in: u32,
}

const fn col(name: &'static str, dtype: ColumnType, added_in: u32) -> Column {
    Column { name, dtype, added_in }
}

/// Columns of the aligned-record table, in canonical order.
pub fn aligned_columns() -> Vec<Column> {
    use ColumnType::*;
    vec![
        col("date", Date, 1),
        col("symbol", Utf8, 1),
        col("ts_us", Int64, 1),
        col("price", Float64, 1),
        col("size", UInt32, 1),
        col("aggressor", Int8, 1),
        col("sequence", Int64, 1),
        col("rollover", Bool, 1),
        col("bid_prices", Float64List, 1),
        col("bid_sizes", UInt32List, 1),
        col("ask_prices", Float64List, 1),
        col("ask_sizes", UInt32List, 1),
        col("book_ts_us", Int64, 1),
        col("book_sequence", Int64, 1),
        col("reduced_confidence", Bool, 1),
        // version 2 additions
        col("book_synced", Bool, 2),
        col("skew_us", Int64, 2),
    ]
}

/// Columns visible to a reader that only understands `version`.
pub fn columns_for_version(version: u32) -> Vec<Column> {
    aligned_columns()
        .into_iter()
        .filter(|c| c.added_in <= version)
        .collect()
}

/// One row of the aligned-record table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignedRow {
    pub date: chrono::NaiveDate,
    pub symbol: String,
    pub ts_us: i64,
    pub price: f64,
    pub size: u32,
    pub aggressor: i8,
    pub sequence: u64,
    pub rollover: bool,
    pub bid_prices: Vec<f64>,
    pub bid_sizes: Vec<u32>,
    pub ask_prices: Vec<f64>,
    pub ask_sizes: Vec<u32>,
    pub book_ts_us: i64,
    pub book_sequence: u64,
    pub reduced_confidence: bool,
    pub book_synced: bool,
    pub skew_us: i64,
}

impl AlignedRow {
    pub fn from_record(record: &AlignedRecord) -> Self {
        let trade = &record.trade;
        let book = &record.book;
        Self {
            date: ts_to_date(trade.ts_us),
            symbol: trade.symbol.clone(),
            ts_us: trade.ts_us,
            price: trade.price,
            size: trade.size,
            aggressor: trade.aggressor.sign(),
            sequence: trade.sequence,
            rollover: trade.rollover,
            bid_prices: book.bids.iter().map(|l| l.price).collect(),
            bid_sizes: book.bids.iter().map(|l| l.size).collect(),
            ask_prices: book.asks.iter().map(|l| l.price).collect(),
            ask_sizes: book.asks.iter().map(|l| l.size).collect(),
            book_ts_us: book.last_delta_ts_us,
            book_sequence: book.last_sequence,
            reduced_confidence: record.meta.confidence == Confidence::Reduced,
            book_synced: record.meta.book_synced,
            skew_us: record.meta.skew_us,
        }
    }
}

/// One row of the raw-trade table, for pipelines that persist inputs
/// alongside aligned output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRow {
    pub date: chrono::NaiveDate,
    pub symbol: String,
    pub ts_us: i64,
    pub price: f64,
    pub size: u32,
    pub aggressor: i8,
    pub sequence: u64,
    pub rollover: bool,
}

impl TradeRow {
    pub fn from_event(trade: &TradeEvent) -> Self {
        Self {
            date: ts_to_date(trade.ts_us),
            symbol: trade.symbol.clone(),
            ts_us: trade.ts_us,
            price: trade.price,
            size: trade.size,
            aggressor: trade.aggressor.sign(),
            sequence: trade.sequence,
            rollover: trade.rollover,
        }
    }
}

/// One row of the raw-depth table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthRow {
    pub date: chrono::NaiveDate,
    pub symbol: String,
    pub ts_us: i64,
    pub side: i8,
    pub price: f64,
    pub size: u32,
    pub kind: String,
    pub sequence: u64,
    pub rollover: bool,
}

impl DepthRow {
    pub fn from_event(delta: &DepthDelta) -> Self {
        Self {
            date: ts_to_date(delta.ts_us),
            symbol: delta.symbol.clone(),
            ts_us: delta.ts_us,
            side: delta.side.sign(),
            price: delta.price,
            size: delta.size,
            kind: format!("{:?}", delta.kind).to_lowercase(),
            sequence: delta.sequence,
            rollover: delta.rollover,
        }
    }
}

/// Maps the aggressor sign back for readers of raw rows.
pub fn aggressor_from_sign(sign: i8) -> Aggressor {
    match sign {
        1 => Aggressor::Buy,
        -1 => Aggressor::Sell,
        _ => Aggressor::Unknown,
    }
}

/// Sync status encoded as the `book_synced` column.
pub fn sync_from_flag(synced: bool) -> SyncStatus {
    if synced {
        SyncStatus::Synced
    } else {
        SyncStatus::Unsynced
    }
}
