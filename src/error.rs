//! Error types for simsync.
//!
//! All errors are strongly typed using thiserror so callers can match on
//! the failure class: per-iteration execution failures, projection
//! failures scoped to a single attachment, and serialization errors.

use thiserror::Error;

/// Errors raised while driving sessions, workers and subscriptions.
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Session not found: {session_id}")]
    SessionNotFound {
        session_id: String,
    },

    #[error("Simulation handle not ready: {reason}")]
    HandleNotReady {
        reason: String,
    },

    #[error("Session factory failed for '{session_id}': {reason}")]
    SessionCreation {
        session_id: String,
        reason: String,
    },

    #[error("Operation timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },

    #[error("Channel disconnected: {path}")]
    Disconnected {
        path: String,
    },

    #[error("Failed to spawn worker '{name}': {reason}")]
    WorkerSpawn {
        name: String,
        reason: String,
    },

    #[error("Worker iteration panicked: {message}")]
    WorkerPanicked {
        message: String,
    },
}

/// Errors raised while projecting world logs.
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("Attachment {index} of log '{log_id}' could not be decoded: {reason}")]
    AttachmentDecode {
        log_id: String,
        index: usize,
        reason: String,
    },

    #[error("Attachment {index} of log '{log_id}' could not be written to {path}: {source}")]
    AttachmentWrite {
        log_id: String,
        index: usize,
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Top-level error type for simsync.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Session, worker or subscription failure.
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// Failure scoped to one projected attachment.
    #[error("Projection error: {0}")]
    Projection(#[from] ProjectionError),

    /// JSON encoding or decoding failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Broken invariant, such as a poisoned lock.
    #[error("Internal error: {message}")]
    Internal {
        /// What went wrong.
        message: String,
    },
}

impl SyncError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates a session-not-found error.
    #[must_use]
    pub fn session_not_found(session_id: impl Into<String>) -> Self {
        Self::Execution(ExecutionError::SessionNotFound {
            session_id: session_id.into(),
        })
    }

    /// Creates a handle-not-ready error.
    #[must_use]
    pub fn not_ready(reason: impl Into<String>) -> Self {
        Self::Execution(ExecutionError::HandleNotReady {
            reason: reason.into(),
        })
    }

    /// Returns true if this is an execution error.
    #[must_use]
    pub const fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    /// Returns true if this is a projection error.
    #[must_use]
    pub const fn is_projection(&self) -> bool {
        matches!(self, Self::Projection(_))
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    /// Returns true if retrying the same call may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Execution(e) => matches!(
                e,
                ExecutionError::HandleNotReady { .. } | ExecutionError::Timeout { .. }
            ),
            // Session-not-found means teardown raced the caller; retrying hides the bug.
            Self::Projection(_) | Self::Serialization(_) | Self::Internal { .. } => false,
        }
    }
}

/// Maps a poisoned lock to an internal error.
pub(crate) fn lock_err(context: &'static str) -> SyncError {
    SyncError::internal(format!("poisoned lock: {context}"))
}

/// Result type alias for simsync operations.
pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_not_found_message() {
        let err = SyncError::session_not_found("sess-1");
        let msg = format!("{err}");
        assert!(msg.contains("Session not found"));
        assert!(msg.contains("sess-1"));
        assert!(err.is_execution());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_handle_not_ready_is_retryable() {
        let err = SyncError::not_ready("engine still loading");
        assert!(err.is_retryable());
        assert!(format!("{err}").contains("engine still loading"));
    }

    #[test]
    fn test_timeout_message() {
        let err = ExecutionError::Timeout { duration_ms: 5000 };
        assert!(format!("{err}").contains("5000ms"));
        let err: SyncError = err.into();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_attachment_decode_is_projection() {
        let err: SyncError = ProjectionError::AttachmentDecode {
            log_id: "log-7".to_string(),
            index: 2,
            reason: "bad padding".to_string(),
        }
        .into();
        assert!(err.is_projection());
        assert!(!err.is_retryable());
        let msg = format!("{err}");
        assert!(msg.contains("log-7"));
        assert!(msg.contains("bad padding"));
    }

    #[test]
    fn test_serialization_from_serde() {
        let parse = serde_json::from_str::<serde_json::Value>("{not json");
        let err: SyncError = parse.unwrap_err().into();
        assert!(matches!(err, SyncError::Serialization(_)));
    }

    #[test]
    fn test_internal() {
        let err = lock_err("sessions");
        assert!(err.is_internal());
        assert!(format!("{err}").contains("poisoned lock: sessions"));
    }
}
