//! Error types for the reauth crates.
//!
//! The taxonomy mirrors how the refresh coordinator decides between
//! retrying and giving up: inactive sessions and plain HTTP errors are
//! terminal, transport-level offline/timeout failures get a dedicated
//! retry budget, and rate limiting is retried on the server's schedule.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// The unified error type for reauth operations.
#[derive(Debug, Error)]
pub enum Error {
    /// No auth descriptor is available. The session is gone and callers
    /// should treat this as a sign-out signal.
    #[error("inactive session")]
    InactiveSession,

    /// Network transport errors (connection, DNS, timeout).
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// HTTP 429 from the API, with the server-advertised backoff if the
    /// response carried one.
    #[error("rate limited by the server")]
    RateLimited { retry_after: Option<Duration> },

    /// Any other HTTP error response (including 401/403 from the refresh
    /// endpoint itself, which mean the session is truly dead).
    #[error("http error: {0}")]
    Http(#[from] HttpError),

    /// Invalid session UID format.
    #[error("invalid session uid: {reason}")]
    InvalidUid { reason: String },

    /// The auth store failed to persist refreshed credentials.
    #[error("auth store error: {message}")]
    Store { message: String },
}

/// Transport-level errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The network is unreachable (connection or DNS failure).
    #[error("network offline: {message}")]
    Offline { message: String },

    /// The request timed out.
    #[error("request timed out")]
    Timeout,

    /// Any other transport failure (TLS, malformed response body).
    #[error("transport failure: {message}")]
    Other { message: String },
}

/// An HTTP error response from the session API.
#[derive(Debug)]
pub struct HttpError {
    /// HTTP status code.
    pub status: u16,
    /// API error code from the response body, if present.
    pub code: Option<i64>,
    /// Error message from the response body, if present.
    pub message: Option<String>,
}

impl HttpError {
    /// Create a new HTTP error.
    pub fn new(status: u16, code: Option<i64>, message: Option<String>) -> Self {
        Self {
            status,
            code,
            message,
        }
    }

    /// Check whether this response signals an expired access credential.
    pub fn is_auth_failure(&self) -> bool {
        self.status == 401
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HTTP {}", self.status)?;
        if let Some(code) = self.code {
            write!(f, " [{}]", code)?;
        }
        if let Some(ref message) = self.message {
            write!(f, ": {}", message)?;
        }
        Ok(())
    }
}

impl std::error::Error for HttpError {}
