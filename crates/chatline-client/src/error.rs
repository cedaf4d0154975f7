//! Error types for chatline-client

use thiserror::Error;

/// Result type alias using chatline-client Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when talking to the chat backend
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Local file could not be read
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Backend returned a non-success status
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Conversation or resource does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// The request was cancelled before the backend answered
    #[error("Request cancelled")]
    Cancelled,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Create an API error from a status code and message
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Check if this error is worth retrying.
    ///
    /// Nothing in this crate retries on its own; callers that layer a retry
    /// policy on top of a send use this to decide.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(e) => e.is_timeout() || e.is_connect(),
            Error::Api { status, .. } => *status == 429 || (500..600).contains(status),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_server_errors() {
        assert!(Error::api(500, "internal").is_retryable());
        assert!(Error::api(503, "unavailable").is_retryable());
        assert!(Error::api(429, "slow down").is_retryable());
    }

    #[test]
    fn test_cancelled_not_retryable() {
        assert!(!Error::Cancelled.is_retryable());
    }

    #[test]
    fn test_not_retryable_client_errors() {
        assert!(!Error::api(400, "Missing conversation ID").is_retryable());
        assert!(!Error::api(403, "Access denied").is_retryable());
        assert!(!Error::NotFound("conversation abc".into()).is_retryable());
        assert!(!Error::InvalidConfig("bad url".into()).is_retryable());
    }

    #[test]
    fn test_api_error_display() {
        let e = Error::api(404, "Conversation not found");
        assert_eq!(e.to_string(), "API error (404): Conversation not found");
    }
}
