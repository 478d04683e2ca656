//! Error types for crawl-events.

use thiserror::Error;

/// Result type alias for crawl-events operations.
pub type Result<T> = std::result::Result<T, StreamError>;

/// Error type for crawl-events operations.
#[derive(Debug, Error)]
pub enum StreamError {
    /// HTTP transport error.
    #[cfg(feature = "http")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// URL parsing or resolution error.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A required credential was not available at subscribe time.
    #[error("Missing credential: {0}")]
    MissingCredential(&'static str),

    /// The stream endpoint answered with a non-success status.
    #[error("Unexpected status {status}: {body}")]
    UnexpectedStatus {
        /// HTTP status code.
        status: u16,
        /// Response body (possibly empty).
        body: String,
    },

    /// The byte stream failed after it was opened, or the event handler panicked.
    #[error("Transport error: {0}")]
    Transport(String),

    /// `subscribe` was called outside of a tokio runtime.
    #[error("No tokio runtime available to drive the subscription")]
    NoRuntime,
}

impl StreamError {
    /// Returns the HTTP status code if this error carries one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::UnexpectedStatus { status, .. } => Some(*status),
            #[cfg(feature = "http")]
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Returns true if the failure happened before the body was opened.
    pub fn is_connect_error(&self) -> bool {
        match self {
            Self::UnexpectedStatus { .. } => true,
            #[cfg(feature = "http")]
            Self::Http(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            _ => false,
        }
    }
}
