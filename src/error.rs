//! Error types for mediamesh

use thiserror::Error;

use crate::nodes::NodeRole;

/// Result type alias for mediamesh operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in mediamesh
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// No online node of the role can take the task (empty pool, or every
    /// candidate was excluded after transport failures)
    #[error("no {0} nodes available")]
    NodeUnavailable(NodeRole),

    /// A reached, healthy worker rejected the task with a non-2xx status.
    /// Never retried against another node.
    #[error("node rejected task with status {status}: {message}")]
    TaskRejected { status: u16, message: String },

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error means the node pool was exhausted, as opposed to
    /// the task itself failing
    #[must_use]
    pub const fn is_unavailable(&self) -> bool {
        matches!(self, Self::NodeUnavailable(_))
    }
}
