//! Trade/book alignment for the tickalign system.
//!
//! This crate provides:
//! - An ordered-merge alignment engine pairing each trade with the book
//!   state effective at its timestamp
//! - Configurable tie-break and skew-tolerance handling for clock
//!   disagreement between the two feeds
//! - A session runner that fans independent (date, symbol) partitions
//!   out to worker threads with per-partition failure isolation

pub mod engine;
pub mod session;

pub use engine::{AlignStats, AlignmentEngine};
pub use session::{PartitionInput, PartitionStatus, SessionReport, SessionRunner};
