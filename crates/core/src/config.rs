//! Configuration structures for the tickalign system.

use serde::{Deserialize, Serialize};

/// Main configuration for the alignment pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Format reader configuration.
    pub reader: ReaderConfig,
    /// Alignment engine configuration.
    pub alignment: AlignmentConfig,
    /// Columnar batch builder configuration.
    pub storage: StorageConfig,
    /// Streaming adapter configuration.
    pub stream: StreamConfig,
    /// Multi-partition session configuration.
    pub session: SessionConfig,
}

/// Policy for a repeated sequence number within one symbol's stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DuplicatePolicy {
    /// Attach a `DuplicateSequence` error to the record; the stream
    /// continues past it.
    Reject,
    /// Pass the record through; its effect overwrites the earlier one.
    LastWins,
}

/// Policy for records that fail to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MalformedPolicy {
    /// Yield the error for the record, keep reading.
    SkipAndLog,
    /// Stop the stream at the first malformed record.
    Abort,
}

/// Format reader configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaderConfig {
    /// Duplicate sequence handling (per record, per symbol).
    pub duplicate_policy: DuplicatePolicy,
    /// Malformed record handling.
    pub malformed_policy: MalformedPolicy,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            duplicate_policy: DuplicatePolicy::Reject,
            malformed_policy: MalformedPolicy::SkipAndLog,
        }
    }
}

/// Ordering convention when a trade and a depth delta share a timestamp
/// (exactly, or within the skew tolerance window).
///
/// The source platform's documentation does not pin this down, so it is an
/// explicit, tested policy rather than a hard-coded assumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TieBreak {
    /// Same-timestamp depth precedes the trade (default causal convention).
    DepthFirst,
    /// The trade snapshots the book before same-timestamp depth applies.
    TradeFirst,
}

/// Alignment engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlignmentConfig {
    /// Window within which trade and depth timestamps are treated as
    /// simultaneous despite clock disagreement (µs).
    pub skew_tolerance_us: i64,
    /// Book staleness beyond which a record's confidence is reduced (µs).
    pub max_staleness_us: i64,
    /// Tie-break convention for shared timestamps.
    pub tie_break: TieBreak,
    /// Levels per side attached to each aligned record.
    pub depth_levels: usize,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            skew_tolerance_us: 500,
            max_staleness_us: 250_000,
            tie_break: TieBreak::DepthFirst,
            depth_levels: 10,
        }
    }
}

/// Columnar batch builder configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Flush a partition's batch at this many rows.
    pub flush_rows: usize,
    /// Flush a partition's batch after this many milliseconds regardless
    /// of size.
    pub flush_interval_ms: u64,
    /// Bounded retries for the external writer.
    pub max_retries: u32,
    /// Base backoff delay between retries (doubles per attempt).
    pub retry_backoff_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            flush_rows: 500_000,
            flush_interval_ms: 5_000,
            max_retries: 3,
            retry_backoff_ms: 100,
        }
    }
}

/// Behaviour when the streaming intake queue is full. Must be explicit and
/// observable, never silent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackpressurePolicy {
    /// Block the producer until the consumer frees space.
    Block,
    /// Evict the oldest queued event and count the loss.
    DropOldest,
}

/// Streaming adapter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Bounded queue capacity between ingestion and alignment.
    pub queue_capacity: usize,
    /// Saturation policy.
    pub backpressure: BackpressurePolicy,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 65_536,
            backpressure: BackpressurePolicy::Block,
        }
    }
}

/// Multi-partition session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Number of parallel partition workers (0 = available parallelism).
    pub workers: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { workers: 0 }
    }
}
