//! Core types and configuration for the tickalign system.
//!
//! This crate provides shared types used across all other crates:
//! - Market data types (trade events, depth deltas, book snapshots,
//!   aligned records)
//! - Configuration structures
//! - Common error types

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use types::*;
