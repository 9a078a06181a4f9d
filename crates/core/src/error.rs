//! Error types for the tickalign system.
//!
//! Per-record failures (`MalformedRecord`, `DuplicateSequence`) attach to
//! the record that caused them; the surrounding stream keeps going. Gaps
//! and reconciliations are recoverable state transitions reported through
//! partition status, not through these errors. Failures never propagate
//! past their (date, symbol) partition.

use crate::types::{Sequence, TimestampUs};
use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the tickalign system.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Bad magic, header, or record size. Fatal for that file.
    #[error("format error in {source_name}: {reason}")]
    Format { source_name: String, reason: String },

    /// A single record could not be decoded. Skip-and-log or abort per
    /// policy; carries the byte offset for resumption.
    #[error("malformed record at offset {offset}: {reason}")]
    MalformedRecord { offset: u64, reason: String },

    /// A sequence number repeated within one symbol's stream.
    #[error("duplicate sequence {sequence} for {symbol}")]
    DuplicateSequence { symbol: String, sequence: Sequence },

    /// Missing sequence numbers in a depth stream. Reported for status;
    /// the book transitions to unsynced and processing continues.
    #[error("sequence gap for {symbol}: expected {expected}, got {got}")]
    SequenceGap {
        symbol: String,
        expected: Sequence,
        got: Sequence,
    },

    /// A delta contradicted book state (delete of a missing level). The
    /// book resets at the next full snapshot; the affected span is marked.
    #[error("book reconciliation for {symbol} at {ts_us}: {reason}")]
    BookReconciliation {
        symbol: String,
        ts_us: TimestampUs,
        reason: String,
    },

    /// Snapshot requested earlier than already-applied state. Usage error,
    /// fatal to the call.
    #[error("non-monotonic query: asked for {asked_us}, book already at {applied_us}")]
    NonMonotonicQuery {
        asked_us: TimestampUs,
        applied_us: TimestampUs,
    },

    /// Storage writer failed after bounded retries. Fatal for that
    /// partition only.
    #[error("storage write failed for {partition} after {attempts} attempts: {reason}")]
    StorageWrite {
        partition: String,
        attempts: u32,
        reason: String,
    },

    /// Trade stream violated its (timestamp, sequence) ordering contract.
    #[error("non-monotonic trade input for {symbol} at sequence {sequence}")]
    UnorderedInput { symbol: String, sequence: Sequence },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(String),
}

impl Error {
    /// Create a format error for a named source.
    pub fn format(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Format {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }

    /// Create a malformed-record error at a byte offset.
    pub fn malformed(offset: u64, reason: impl Into<String>) -> Self {
        Error::MalformedRecord {
            offset,
            reason: reason.into(),
        }
    }

    /// Create a duplicate-sequence error.
    pub fn duplicate(symbol: impl Into<String>, sequence: Sequence) -> Self {
        Error::DuplicateSequence {
            symbol: symbol.into(),
            sequence,
        }
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// True when the error is scoped to a single record rather than the
    /// whole stream.
    pub fn is_record_scoped(&self) -> bool {
        matches!(
            self,
            Error::MalformedRecord { .. } | Error::DuplicateSequence { .. }
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e.to_string())
    }
}
