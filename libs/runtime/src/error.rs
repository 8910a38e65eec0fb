//! Container runtime errors.

use thiserror::Error;

/// Errors from the container runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The runtime answered with a non-2xx status.
    #[error("runtime API error {status}: {message}")]
    Api { status: u16, message: String },

    /// A pull or build stream reported an error line.
    #[error("{operation} failed: {message}")]
    Stream {
        operation: &'static str,
        message: String,
    },

    /// The runtime endpoint could not be understood.
    #[error("invalid runtime endpoint: {0}")]
    Endpoint(String),

    #[error("container not found: {0}")]
    NotFound(String),
}

impl RuntimeError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<hyper::http::Error> for RuntimeError {
    fn from(err: hyper::http::Error) -> Self {
        RuntimeError::Endpoint(err.to_string())
    }
}
