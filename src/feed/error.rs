//! Remote feed error types

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while talking to the remote database
#[derive(Error, Debug)]
pub enum FeedError {
    /// HTTP transport failed
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a non-success status
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    /// Initial snapshots did not arrive in time
    #[error("Connection timed out after {0:?}")]
    Timeout(Duration),

    /// An open stream went silent, not even keep-alives arrived
    #[error("No data from stream for {0:?}")]
    Idle(Duration),

    /// Operation needs an established connection
    #[error("Not connected")]
    NotConnected,

    /// No remote backend exists in this context
    #[error("Remote feed unavailable")]
    Unavailable,

    /// Event stream ended or was cancelled by the server
    #[error("Stream closed: {0}")]
    StreamClosed(String),

    /// Event payload could not be decoded
    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<serde_json::Error> for FeedError {
    fn from(err: serde_json::Error) -> Self {
        FeedError::Parse(err.to_string())
    }
}

/// Result type alias for feed operations
pub type FeedResult<T> = Result<T, FeedError>;
