//! Error types for aeo-tasks
//!
//! This module provides the error taxonomy for the library:
//! - Caller-side errors (validation, authentication, invalid coordinator state)
//! - Transport-level errors (network failures, rate limiting, unexpected statuses)
//! - Task-level errors (the remote job itself failed, possibly partially)
//! - Session-level errors (timeouts, cancellation, malformed payloads)

use thiserror::Error;

/// Result type alias for aeo-tasks operations
pub type Result<T> = std::result::Result<T, Error>;

/// Which timeout ceiling aborted a poll session
///
/// The two ceilings are independent: the attempt ceiling counts only genuine
/// status-check rounds, while the wall-clock ceiling guards against a backend
/// that responds quickly but never reaches a terminal state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeoutKind {
    /// The configured maximum number of status-check attempts was reached
    Attempts,
    /// The absolute wall-clock ceiling elapsed, regardless of attempt count
    WallClock,
}

impl std::fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeoutKind::Attempts => write!(f, "attempt ceiling"),
            TimeoutKind::WallClock => write!(f, "wall-clock ceiling"),
        }
    }
}

/// A structured sub-error attached to a partially failed task
///
/// Citation analysis can fail for a subset of its sub-queries while the rest
/// complete; each failed sub-query is reported as one of these.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SubError {
    /// The sub-unit that failed (e.g. the query text)
    pub query: String,
    /// Human-readable failure detail for that sub-unit
    pub message: String,
}

impl std::fmt::Display for SubError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.query, self.message)
    }
}

/// Main error type for aeo-tasks
///
/// Each variant corresponds to one branch of the error taxonomy. All variants
/// propagate to the lifecycle coordinator's caller as a discriminated failure;
/// only rate-limit retries are intentionally suppressed inside a poll session.
#[derive(Debug, Error)]
pub enum Error {
    /// Caller-supplied parameters rejected before or during submission (HTTP 422)
    #[error("validation error: {message}")]
    Validation {
        /// Field-level guidance from the service
        message: String,
    },

    /// Expired or missing credential (HTTP 401); caller should re-authenticate
    #[error("authentication required: {message}")]
    Auth {
        /// Human-readable detail from the service
        message: String,
    },

    /// The service is rate limiting us (HTTP 429); retried with backoff inside a poll
    #[error("rate limited: {message}")]
    RateLimited {
        /// Human-readable detail from the service
        message: String,
    },

    /// Connection-level failure; surfaced immediately, no automatic retry within a poll
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Task id unknown to the server; terminal for a poll session, never retried
    #[error("not found: {0}")]
    NotFound(String),

    /// Any other 4xx/5xx response from the service
    #[error("service error ({status}): {message}")]
    Api {
        /// HTTP or envelope status code
        status: u16,
        /// Message from the response envelope
        message: String,
    },

    /// The remote job itself reported failure
    #[error("task failed: {message}")]
    TaskFailed {
        /// The job's own error detail
        message: String,
        /// Per-sub-unit failures when the failure is partial (may be empty)
        sub_errors: Vec<SubError>,
    },

    /// A poll session exceeded one of its two ceilings; the job may still be
    /// running server-side, which is why this is distinct from [`Error::TaskFailed`]
    #[error("task polling timed out ({0})")]
    Timeout(TimeoutKind),

    /// A completed payload matched none of the known result shapes
    #[error("unrecognized response shape: {context}")]
    MalformedResponse {
        /// What was being normalized and what was missing
        context: String,
    },

    /// Coordinator operation invalid in the current lifecycle phase
    #[error("cannot {operation} while {current}")]
    InvalidState {
        /// The operation that was attempted (e.g. "start", "retry")
        operation: String,
        /// The phase that prevents it (e.g. "polling", "idle")
        current: String,
    },

    /// The session was cancelled cooperatively by the caller
    #[error("task cancelled")]
    Cancelled,

    /// Operation not supported by this feature (e.g. retry outside citation analysis)
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Client configuration error
    #[error("configuration error: {message}")]
    Config {
        /// What is wrong with the configuration
        message: String,
    },
}

impl Error {
    /// Map an HTTP (or envelope) status code plus message to a typed error
    ///
    /// Used by the transport for both the HTTP status line and the numeric
    /// `status` field of the response envelope: 401 means re-authenticate,
    /// 404 means the resource is gone for good, 422 is a validation message,
    /// 429 means back off, and everything else is a generic service failure.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 => Error::Auth { message },
            404 => Error::NotFound(message),
            422 => Error::Validation { message },
            429 => Error::RateLimited { message },
            _ => Error::Api { status, message },
        }
    }

    /// True when this error came from an HTTP 429 response
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Error::RateLimited { .. })
    }
}
