//! Streaming: the coordinator that pages chunks between a live engine and a
//! durable store.
//!
//! # Invariants
//! - A chunk is dropped only after this cycle's save of it was either
//!   unnecessary or durably written.
//! - Every write of a cycle resolves before any drop of that cycle is issued.
//! - Store failures stay per key; no failure stops the loop.
//! - Cycles never overlap: the next one starts a fixed delay after the last.

mod config;
mod coordinator;
mod error;
mod stats;

#[cfg(test)]
mod fakes;

pub use config::{ReadFailurePolicy, StreamConfig};
pub use coordinator::{Coordinator, CoordinatorHandle};
pub use error::StreamError;
pub use stats::{CycleReport, CycleTimer, StreamTotals};

pub fn crate_info() -> &'static str {
    "chunkstream-stream v0.1.0"
}
