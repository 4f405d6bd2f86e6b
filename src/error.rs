//! Error types for row-pipeline
//!
//! Two layers of errors live here:
//! - [`Error`] for the public API (configuration, catalog loading, tracker lifecycle)
//! - [`StageError`] for a single fetch/transform attempt; the stage runner folds
//!   these into an [`Outcome`](crate::types::Outcome) so they never cross the
//!   stage queue boundary

use crate::types::RowId;
use thiserror::Error;

/// Result type alias for row-pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for row-pipeline
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "fetch_concurrency")
        key: Option<String>,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The row catalog could not be parsed at all
    #[error("catalog parse error: {0}")]
    CatalogParse(String),

    /// Row id outside the record store
    #[error("row not found: {0}")]
    RowNotFound(RowId),

    /// The tracker has shut down and no longer accepts commands
    #[error("shutdown in progress: tracker is no longer accepting commands")]
    ShuttingDown,
}

impl Error {
    /// Shorthand for a configuration error tied to a specific key
    pub(crate) fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }
}

/// Failure of a single pipeline stage attempt
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageError {
    /// The fetch transport failed (connection, status code, body read)
    #[error("transport failure: {0}")]
    Transport(String),

    /// The fetch succeeded but returned no bytes
    #[error("transport failure: empty payload")]
    EmptyPayload,

    /// The post-process step could not produce an image
    #[error("transform failure: {0}")]
    Transform(String),
}

impl From<reqwest::Error> for StageError {
    fn from(e: reqwest::Error) -> Self {
        StageError::Transport(e.to_string())
    }
}

impl From<image::ImageError> for StageError {
    fn from(e: image::ImageError) -> Self {
        StageError::Transform(e.to_string())
    }
}
