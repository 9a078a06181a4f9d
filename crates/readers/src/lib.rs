//! Binary format readers for the tickalign system.
//!
//! This crate handles:
//! - Trade tick files (fixed-size records, one contract per file)
//! - Depth delta day files (variable-length multi-symbol records),
//!   including per-symbol demultiplexing
//! - Source-platform epoch conversion
//! - Contract filename parsing and depth day discovery
//!
//! Both readers implement the shared [`tickalign_core::EventSource`]
//! contract, so the downstream pipeline is agnostic to whether events come
//! from files or from the streaming adapter.

pub mod contract;
pub mod depth;
pub mod time;
pub mod trade;

pub use contract::{choose_latest, discover_depth_days, ContractId};
pub use depth::{DepthDemux, DepthReader};
pub use trade::TradeReader;
