//! Error types for worker invocations.

use provisioner_core::TaskErrorKind;
use thiserror::Error;

/// Errors that can occur while invoking a worker.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The request never got a response (connect, DNS, TLS...).
    #[error("transport error: {0}")]
    Transport(String),

    /// No response within the attempt's time limit.
    #[error("timed out: {0}")]
    Timeout(String),

    /// The remote side answered with a non-success status.
    #[error("remote returned status {status}: {body}")]
    RemoteStatus { status: u16, body: String },

    /// The remote side answered, but reported the work as failed.
    #[error("remote reported failure: {0}")]
    Remote(String),

    /// The response could not be decoded.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// The invocation was rejected before being sent.
    #[error("invalid invocation: {0}")]
    InvalidInvocation(String),
}

impl WorkerError {
    /// Whether retrying the same invocation could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout(_) => true,
            Self::RemoteStatus { status, .. } => *status == 429 || *status >= 500,
            Self::Remote(_) | Self::Malformed(_) | Self::InvalidInvocation(_) => false,
        }
    }

    /// Task-level error kind this maps to.
    pub fn kind(&self) -> TaskErrorKind {
        match self {
            Self::RemoteStatus { .. } => TaskErrorKind::RemoteStatus,
            Self::Timeout(_) => TaskErrorKind::Timeout,
            _ => TaskErrorKind::Invocation,
        }
    }
}

impl From<reqwest::Error> for WorkerError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Malformed(e.to_string())
        } else if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

impl From<serde_json::Error> for WorkerError {
    fn from(e: serde_json::Error) -> Self {
        Self::Malformed(e.to_string())
    }
}
