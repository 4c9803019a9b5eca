//! Live session runtime for flowwatch.
//!
//! Talks to the classification service: a push channel for live flow
//! events, an HTTP API for control and history, and the orchestration that
//! keeps the local view and the capture state in step with the service.

pub mod api;
pub mod channel;
pub mod control;
pub mod history;
pub mod orchestrator;
pub mod transport;

#[cfg(test)]
mod testutil;

pub use flowwatch_core as core;
pub use flowwatch_data as data;
