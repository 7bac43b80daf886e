//! # Errors
//!
//! Every failure a caller can observe is a [`BatchError`]. Failures that mean the
//! scheduler itself is broken are [`InvariantViolation`]s; those are never handed
//! to a caller, the scheduler aborts on them instead.

use std::any::Any;
use std::fmt;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use crate::communication::RequestId;

/// A failure reported by a compute backend.
///
/// One value may be cloned out to every request of a batch when the backend
/// call fails as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct BackendError {
    message: String,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Converts a caught panic payload into a backend error.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let detail = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Self::new(format!("backend panicked: {detail}"))
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for BackendError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for BackendError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Errors surfaced to the originator of a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError {
    /// The ingress queue is at capacity; the request never entered the system.
    #[error("scheduler overloaded: ingress queue is at capacity ({capacity})")]
    Overloaded { capacity: usize },

    /// The backend failed for this request.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// The originator stopped waiting before a result was produced.
    #[error("timed out after {waited:?} waiting for a result")]
    Timeout { waited: Duration },

    /// The id was never issued, or its result was already retrieved or reaped.
    #[error("unknown or expired request id {0}")]
    Unknown(RequestId),

    /// The scheduler is shutting down and will not process the request.
    #[error("scheduler is shutting down")]
    ShuttingDown,
}

/// Coarse classification of a [`BatchError`], stable across messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Overloaded,
    Backend,
    Timeout,
    Unknown,
    ShuttingDown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Overloaded => "overloaded",
            ErrorKind::Backend => "backend",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Unknown => "unknown",
            ErrorKind::ShuttingDown => "shutting_down",
        };
        f.write_str(name)
    }
}

/// Transport-neutral error shape, `{kind, message}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
}

impl BatchError {
    /// Message-independent classification, for matching and metrics.
    pub fn kind(&self) -> ErrorKind {
        match self {
            BatchError::Overloaded { .. } => ErrorKind::Overloaded,
            BatchError::Backend(_) => ErrorKind::Backend,
            BatchError::Timeout { .. } => ErrorKind::Timeout,
            BatchError::Unknown(_) => ErrorKind::Unknown,
            BatchError::ShuttingDown => ErrorKind::ShuttingDown,
        }
    }

    /// Serializable `{kind, message}` form of this error.
    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

impl From<&BatchError> for ErrorBody {
    fn from(err: &BatchError) -> Self {
        err.body()
    }
}

/// A broken core invariant. These are programming defects, not runtime conditions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("correlation id {0} issued twice")]
    DuplicateId(RequestId),

    #[error("result for {0} written twice")]
    DoubleComplete(RequestId),

    #[error("result written for unregistered id {0}")]
    CompleteUnregistered(RequestId),
}

/// Rejected configuration values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("`{field}` must be greater than zero")]
    Zero { field: &'static str },

    #[error("`{field}` must be at most {max}")]
    TooLarge { field: &'static str, max: usize },

    #[error("invalid configuration: {0}")]
    Parse(String),
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}
