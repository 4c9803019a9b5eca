use thiserror::Error;

/// All errors produced by the flowwatch session layer.
#[derive(Error, Debug)]
pub enum FlowwatchError {
    /// The push channel could not be opened, or failed while receiving.
    #[error("Transport error: {0}")]
    Transport(String),

    /// An HTTP request to the classification service could not be completed.
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// The classification service answered with a non-success status.
    ///
    /// `message` is the service's own `detail` text, passed through verbatim.
    #[error("{message}")]
    Rejected { status: u16, message: String },

    /// A control action failed, or its outcome could not be confirmed by a
    /// follow-up status poll.
    #[error("{0}")]
    ControlAction(String),

    /// Another start / stop / interface change is already in flight.
    #[error("Another control operation is already in progress")]
    Busy,

    /// A subscriber callback failed while handling a pushed event.
    #[error("Subscriber failed: {0}")]
    Handler(String),

    /// A JSON document could not be parsed.
    #[error("Failed to parse JSON: {0}")]
    Decode(#[from] serde_json::Error),

    /// A configuration value is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Pass-through for any raw I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Catch-all for errors from third-party crates via `anyhow`.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FlowwatchError {
    /// `true` for failures worth retrying (network level, not a rejection).
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Transport(_))
    }
}

/// Convenience alias used throughout the flowwatch crates.
pub type Result<T> = std::result::Result<T, FlowwatchError>;
