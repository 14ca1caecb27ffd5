//! Typed failures reported by an execution backend.

use thiserror::Error;

/// How a backend call failed, as observed by the backend itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The model provider answered with an error status.
    Http,
    /// The call did not finish within the backend's own time limit.
    Timeout,
    /// The response could not be parsed or did not match its schema.
    Protocol,
    /// The backend process could not be spawned or exited abnormally.
    Process,
}

/// Error returned by every fallible backend operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct BackendError {
    pub status: Option<u16>,
    pub kind: FailureKind,
    pub message: String,
}

impl BackendError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            status: None,
            kind,
            message: message.into(),
        }
    }

    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            kind: FailureKind::Http,
            message: message.into(),
        }
    }
}
