//! HTTP client error types

use thiserror::Error;

/// Errors surfaced by [`RateLimitedClient`](super::RateLimitedClient)
#[derive(Debug, Error)]
pub enum HttpError {
    /// Error from the underlying transport, passed through untouched
    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    #[error("Invalid user agent: {0}")]
    InvalidUserAgent(#[from] reqwest::header::InvalidHeaderValue),

    #[error("JSON decode error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HttpError {
    /// Check if retrying the same request could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            HttpError::Transport(e) => e.is_timeout() || e.is_connect(),
            HttpError::InvalidUserAgent(_) => false,
            HttpError::Json(_) => false,
        }
    }
}
