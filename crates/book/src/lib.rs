//! Order book reconstruction for the tickalign system.
//!
//! This crate provides:
//! - Per-symbol, single-writer book state driven by depth deltas
//! - Sequence-gap tracking as explicit sync-status transitions
//! - Reconciliation resets at full-snapshot boundaries
//! - Monotonic top-N snapshot materialization

pub mod reconstructor;

pub use reconstructor::{ApplyOutcome, BookStats, Reconstructor};
