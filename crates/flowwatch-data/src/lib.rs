//! Flow aggregation layer for flowwatch.
//!
//! Merges pushed flow events and polled history snapshots into one bounded,
//! filterable view with running counters, and derives the attack breakdown
//! shown next to it.

pub mod aggregator;
pub mod analysis;
pub mod filter;

pub use flowwatch_core as core;
