//! Streaming intake for the tickalign system.
//!
//! This crate provides:
//! - A bounded MPMC intake queue between live ingestion and alignment
//! - Explicit saturation policies: block the producer, or evict the
//!   oldest event with a visible loss counter
//! - An `EventSource` view so the alignment side consumes live and
//!   historical streams through the same trait

pub mod adapter;

pub use adapter::{bounded, IntakeHandle, StreamSource};
