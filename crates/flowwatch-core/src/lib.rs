//! Shared domain layer for flowwatch.
//!
//! Flow and monitoring models, the wire contract of the classification
//! service, record normalization, the error type, CLI settings and small
//! formatting helpers.

pub mod data_processors;
pub mod error;
pub mod formatting;
pub mod models;
pub mod protocol;
pub mod settings;

pub use error::{FlowwatchError, Result};
