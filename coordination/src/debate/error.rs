//! Error taxonomy for the debate engine.
//!
//! | Kind                         | Surfaced to caller? | Recovery                         |
//! |------------------------------|---------------------|----------------------------------|
//! | Cancellation                 | no                  | partial content kept, Paused     |
//! | Per-turn generation failure  | no                  | fallback text, loop continues    |
//! | Malformed stream record      | no                  | record skipped                   |
//! | Decision synthesis failure   | no                  | static fallback decision         |
//! | Corrupted persisted session  | no                  | fields coerced on restore        |
//! | Invalid request / transition | yes                 | rejected before streaming begins |

use thiserror::Error;

use super::state::SessionStatus;

/// Result alias for scheduler operations.
pub type DebateResult<T> = Result<T, DebateError>;

/// Errors returned by scheduler operations.
///
/// Generation failures never appear here: they are recovered inside the
/// scheduling loop.
#[derive(Debug, Error)]
pub enum DebateError {
    /// The request is structurally invalid (bad cursor, empty prompt, ...).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A scheduling loop is already running for this session.
    #[error("debate already running")]
    AlreadyRunning,

    /// The requested status change is not allowed from the current status.
    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// A panel definition failed validation.
    #[error("invalid panel: {0}")]
    InvalidPanel(String),
}

/// Error for an illegal status transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition {from} → {to}: {reason}")]
pub struct TransitionError {
    pub from: SessionStatus,
    pub to: SessionStatus,
    pub reason: String,
}

/// Failure of a Generation Port request or of its chunk stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    /// The request could not be delivered (connect, DNS, TLS, ...).
    #[error("transport error: {0}")]
    Transport(String),

    /// The backend answered with a non-success status.
    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },

    /// Reading the chunk stream failed midway.
    #[error("stream error: {0}")]
    Stream(String),

    /// The turn did not finish within the configured timeout.
    #[error("timed out after {0} ms")]
    Timeout(u64),

    /// The request was aborted by `stop()` or `reset()`.
    #[error("cancelled")]
    Cancelled,
}

impl GenerationError {
    /// Whether this error is the expected result of a cancellation.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Errors from saving or loading a session envelope.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("serialize failed: {reason}")]
    SerializeFailed { reason: String },

    #[error("deserialize failed: {reason}")]
    DeserializeFailed { reason: String },

    #[error("version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("session {0} not found")]
    NotFound(String),

    #[error("storage error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_classification() {
        assert!(GenerationError::Cancelled.is_cancellation());
        assert!(!GenerationError::Timeout(10).is_cancellation());
        assert!(!GenerationError::Transport("refused".into()).is_cancellation());
    }

    #[test]
    fn test_error_display() {
        let err = GenerationError::Status {
            status: 503,
            body: "overloaded".to_string(),
        };
        assert_eq!(err.to_string(), "backend returned 503: overloaded");

        let err = DebateError::from(TransitionError {
            from: SessionStatus::Idle,
            to: SessionStatus::Paused,
            reason: "not running".to_string(),
        });
        assert!(err.to_string().contains("idle → paused"));

        let err = PersistenceError::VersionMismatch {
            expected: 1,
            found: 7,
        };
        assert!(err.to_string().contains("version mismatch"));
    }
}
