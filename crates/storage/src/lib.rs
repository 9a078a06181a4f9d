//! Canonical storage layer for the tickalign system.
//!
//! This crate provides:
//! - The versioned, strictly additive output schema
//! - Per-partition batch staging with row-count and interval flushing
//! - NDJSON part-file output partitioned by (date, symbol)
//! - A bounded-retry writer wrapper with partition-scoped failure

pub mod batch;
pub mod schema;
pub mod writer;

pub use batch::{BatchBuilder, MemoryWriter, PartitionWriter, RecordBatch, WriteStats};
pub use schema::{AlignedRow, DepthRow, TradeRow, SCHEMA_VERSION};
pub use writer::{JsonLinesWriter, RetryingWriter};
