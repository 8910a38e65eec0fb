//! CDN client errors.

use thiserror::Error;

/// Errors from the CDN configuration API.
#[derive(Debug, Error)]
pub enum CdnError {
    /// The request never produced a response.
    #[error("CDN transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The API answered with a non-2xx status.
    #[error("CDN API error {status}: {body}")]
    Api { status: u16, body: String },

    /// The response body did not have the expected shape.
    #[error("CDN response could not be decoded: {0}")]
    Decode(String),

    /// The service has no configuration versions at all.
    #[error("CDN service has no configuration versions")]
    NoVersions,

    /// Client construction failed (bad key, bad base URL).
    #[error("CDN client configuration error: {0}")]
    Config(String),
}

impl CdnError {
    /// HTTP status for API errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
