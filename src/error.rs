//! Error taxonomy shared by the arbitration layer and its collaborators.

use std::time::Duration;
use thiserror::Error;

/// Failures reported by the remote reasoning service behind a session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("network error: {0}")]
    Network(String),

    /// The remote context window is full. The only recovery is a fresh session.
    #[error("context capacity exceeded: {0}")]
    CapacityExceeded(String),

    #[error("reasoning service returned an empty response")]
    EmptyResponse,
}

impl SessionError {
    pub fn is_capacity_exceeded(&self) -> bool {
        matches!(self, SessionError::CapacityExceeded(_))
    }
}

/// Sensor-side failures. Always recovered locally by the annotator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("no display available for capture")]
    NoDisplay,

    #[error("screen capture failed: {0}")]
    Backend(String),

    #[error("frame encoding failed: {0}")]
    Encode(String),
}

/// Outcome of a guaranteed access that did not produce a value.
#[derive(Debug, Error)]
pub enum AccessError<E> {
    #[error("access timed out after {0:?}")]
    TimedOut(Duration),

    #[error("access failed: {0}")]
    Failed(#[source] E),
}

/// Outcome of a best-effort access that did not produce a value.
///
/// `Skipped` and `Busy` are contention outcomes, not failures.
#[derive(Debug, Error)]
pub enum TryAccessError<E> {
    #[error("skipped: a guaranteed access is pending")]
    Skipped,

    #[error("busy: the gate is held")]
    Busy,

    #[error("access timed out after {0:?}")]
    TimedOut(Duration),

    #[error("access failed: {0}")]
    Failed(#[source] E),
}

impl<E> TryAccessError<E> {
    /// True for the expected contention outcomes (`Skipped`, `Busy`).
    pub fn is_contention(&self) -> bool {
        matches!(self, TryAccessError::Skipped | TryAccessError::Busy)
    }
}

impl<E> From<AccessError<E>> for TryAccessError<E> {
    fn from(err: AccessError<E>) -> Self {
        match err {
            AccessError::TimedOut(deadline) => TryAccessError::TimedOut(deadline),
            AccessError::Failed(cause) => TryAccessError::Failed(cause),
        }
    }
}

/// User-facing failure of an interactive question.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("question is empty")]
    EmptyQuestion,

    #[error("query timed out after {0:?}")]
    TimedOut(Duration),

    /// `context_cleared` is set when the failure forced a session reset.
    #[error("query failed: {source}")]
    Session {
        #[source]
        source: SessionError,
        context_cleared: bool,
    },
}

impl QueryError {
    pub fn context_cleared(&self) -> bool {
        matches!(self, QueryError::Session { context_cleared: true, .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnnotatorError {
    #[error("annotation interval must be positive")]
    ZeroInterval,
}
