//! Compute provider errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("compute transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("compute API error {status}: {body}")]
    Api { status: u16, body: String },

    /// Authentication succeeded but the catalog has no usable endpoint,
    /// or authentication was rejected.
    #[error("compute authentication failed: {0}")]
    Auth(String),

    #[error("compute client configuration error: {0}")]
    Config(String),

    /// No image matched the requested name fragments.
    #[error("no image matches {0:?}")]
    NoMatchingImage(Vec<String>),
}
