use std::time::Duration;

use thiserror::Error;

/// Top-level error type for Bulwark setup and tooling.
#[derive(Error, Debug)]
pub enum BulwarkError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Logging error: {0}")]
    Logging(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    #[error("{0}")]
    Other(String),
}

/// Convenience type alias.
pub type Result<T> = std::result::Result<T, BulwarkError>;

/// Raised by a breaker that is currently rejecting calls.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Circuit breaker open for {dependency} (retry after {:.1}s)", .retry_after.as_secs_f64())]
pub struct CircuitOpenError {
    pub dependency: String,
    /// Time left until the breaker becomes eligible for a probe. Zero when eligible now.
    pub retry_after: Duration,
}

/// Failure of a protected call.
///
/// The operation's own error is carried unchanged in [`CallError::Operation`] so callers
/// can still match on it; [`CallError::CircuitOpen`] means the operation never ran.
#[derive(Error, Debug)]
pub enum CallError<E> {
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    #[error("{0}")]
    Operation(E),
}

impl<E> CallError<E> {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen(_))
    }

    /// Borrow the operation's error, if the operation ran.
    pub fn operation(&self) -> Option<&E> {
        match self {
            Self::Operation(e) => Some(e),
            Self::CircuitOpen(_) => None,
        }
    }

    pub fn into_operation(self) -> Option<E> {
        match self {
            Self::Operation(e) => Some(e),
            Self::CircuitOpen(_) => None,
        }
    }

    pub fn map_operation<F, E2>(self, f: F) -> CallError<E2>
    where
        F: FnOnce(E) -> E2,
    {
        match self {
            Self::Operation(e) => CallError::Operation(f(e)),
            Self::CircuitOpen(open) => CallError::CircuitOpen(open),
        }
    }
}

impl<E: std::fmt::Display> From<CallError<E>> for BulwarkError {
    fn from(err: CallError<E>) -> Self {
        match err {
            CallError::CircuitOpen(open) => Self::CircuitOpen(open),
            CallError::Operation(e) => Self::Other(e.to_string()),
        }
    }
}
