//! Error types for unlabel-core

use thiserror::Error;

use crate::types::{FailureKind, ResultShape};

/// Main error type for the unlabel-core library
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Network failure, connection drop, or non-success status
    #[error("transport error: {0}")]
    Transport(String),

    /// Response belongs to the other result family entirely
    #[error("expected a {expected} result but received {found}")]
    ShapeMismatch {
        expected: ResultShape,
        found: String,
    },

    /// Explicit error reported by the analysis service
    #[error("{0}")]
    ServerReported(String),

    /// A single streamed frame could not be parsed
    #[error("malformed stream event: {0}")]
    MalformedEvent(String),
}

impl Error {
    /// Classify this error for the transcript.
    ///
    /// Anything that is neither a shape violation nor a server report is
    /// surfaced as a transport failure.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Error::ShapeMismatch { .. } => FailureKind::ShapeMismatch,
            Error::ServerReported(_) => FailureKind::ServerReported,
            _ => FailureKind::Transport,
        }
    }
}

/// Result type alias for unlabel-core
pub type Result<T> = std::result::Result<T, Error>;
