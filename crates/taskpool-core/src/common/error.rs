//! Error types for the task pool.
//!
//! This module defines the central `Error` enum, which captures every
//! reportable failure of a task or of the pool itself. Submission-time
//! variants are returned directly from `submit`; execution-time variants
//! travel through the same handle that carries successful results.
//!
//! ## Error Cases
//! - `Validation`: The payload does not match its kind's shape.
//! - `UnsupportedOperation`: A recognised kind asked for an unknown
//!   sub-operation (compression algorithm, comparator, ...).
//! - `ExecutionFault`: A computation unit faulted while running the task.
//! - `Cancelled`: The task was removed from the queue before dispatch.
//! - `ShutdownTimeout`: The pool shut down before the task could finish.
//! - `PoolClosed`: A task was submitted after shutdown started.
//! - `DuplicateTaskId`: A caller-assigned id is already outstanding.
//! - `InvalidConfig`: The pool cannot be built from the given settings.
//! - `ChannelError`: An internal channel closed unexpectedly.

use crate::common::types::{TaskId, TaskKind};

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the task pool.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// The payload failed its shape check and was rejected at submission.
    #[error("Validation error: {reason}")]
    Validation { reason: String },

    /// The kind is known but the requested sub-operation is not.
    #[error("Unsupported {kind} operation: {operation}")]
    UnsupportedOperation { kind: TaskKind, operation: String },

    /// The unit running the task faulted. The unit itself keeps serving.
    #[error("Execution fault: {message}")]
    ExecutionFault { message: String },

    /// The task was cancelled while still queued.
    #[error("Task cancelled before dispatch")]
    Cancelled,

    /// The pool's drain deadline elapsed while the task was outstanding.
    #[error("Pool shut down before the task completed")]
    ShutdownTimeout,

    /// The pool no longer accepts submissions.
    #[error("Pool is closed")]
    PoolClosed,

    /// Another outstanding task already uses this id.
    #[error("Task id {id} is already outstanding")]
    DuplicateTaskId { id: TaskId },

    /// The pool configuration is unusable.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// Internal channel send/receive failure.
    #[error("Channel error: {context}")]
    ChannelError { context: String },
}

impl Error {
    pub(crate) fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    pub(crate) fn unsupported(kind: TaskKind, operation: impl Into<String>) -> Self {
        Self::UnsupportedOperation {
            kind,
            operation: operation.into(),
        }
    }

    /// Stable machine-readable name of the error category.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "ValidationError",
            Self::UnsupportedOperation { .. } => "UnsupportedOperationError",
            Self::ExecutionFault { .. } => "ExecutionFault",
            Self::Cancelled => "Cancelled",
            Self::ShutdownTimeout => "ShutdownTimeout",
            Self::PoolClosed => "PoolClosed",
            Self::DuplicateTaskId { .. } => "DuplicateTaskId",
            Self::InvalidConfig { .. } => "InvalidConfig",
            Self::ChannelError { .. } => "ChannelError",
        }
    }

    /// Whether the error was raised at submission rather than delivered
    /// through a task handle.
    pub const fn is_submission_error(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. } | Self::PoolClosed | Self::DuplicateTaskId { .. }
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let err = Error::unsupported(TaskKind::Compress, "lz4");
        assert_eq!(err.to_string(), "Unsupported compress operation: lz4");

        let err = Error::DuplicateTaskId { id: TaskId::new(7) };
        assert_eq!(err.to_string(), "Task id 7 is already outstanding");
    }

    #[test]
    fn codes_follow_taxonomy() {
        assert_eq!(Error::validation("x").code(), "ValidationError");
        assert_eq!(Error::Cancelled.code(), "Cancelled");
        assert_eq!(Error::ShutdownTimeout.code(), "ShutdownTimeout");
        assert!(Error::PoolClosed.is_submission_error());
        assert!(!Error::Cancelled.is_submission_error());
    }

    #[test]
    fn json_errors_become_validation() {
        let err: Error = serde_json::from_str::<u32>("\"nope\"").unwrap_err().into();
        assert!(matches!(err, Error::Validation { .. }));
    }
}
