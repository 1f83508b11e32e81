//! Error type for worker-side execution: task-group dispatch, channel I/O,
//! and the worker's control-transport client (spec.md §7).

use std::fmt;
use vortex_core::{CommPattern, DataflowError};
use vortex_storage::StorageError;

#[derive(Debug, Clone, PartialEq)]
pub enum WorkerError {
    /// An I/O failure at a channel boundary (read or write side).
    Storage(StorageError),
    /// A partition the caller asked for is not currently servable.
    Dataflow(DataflowError),
    /// `TaskGroupExecutor::execute()` was called a second time on the same
    /// instance.
    AlreadyExecuted,
    /// A comm pattern the data channel factory does not know how to route.
    UnsupportedCommPattern { pattern: CommPattern },
    /// A control message arrived at a listener id that does not handle it.
    IllegalMessage { listener_id: String, kind: String },
    Transport { context: String, reason: String },
    UnknownFailure { context: String },
}

impl fmt::Display for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerError::Storage(e) => write!(f, "storage error: {e}"),
            WorkerError::Dataflow(e) => write!(f, "dataflow error: {e}"),
            WorkerError::AlreadyExecuted => write!(f, "task group executor already ran"),
            WorkerError::UnsupportedCommPattern { pattern } => {
                write!(f, "unsupported comm pattern: {pattern:?}")
            }
            WorkerError::IllegalMessage { listener_id, kind } => {
                write!(f, "listener '{listener_id}' cannot handle message kind '{kind}'")
            }
            WorkerError::Transport { context, reason } => {
                write!(f, "transport error in {context}: {reason}")
            }
            WorkerError::UnknownFailure { context } => write!(f, "unknown failure: {context}"),
        }
    }
}

impl std::error::Error for WorkerError {}

impl From<StorageError> for WorkerError {
    fn from(e: StorageError) -> Self {
        WorkerError::Storage(e)
    }
}

impl From<DataflowError> for WorkerError {
    fn from(e: DataflowError) -> Self {
        WorkerError::Dataflow(e)
    }
}

impl WorkerError {
    /// Per spec.md §7: recoverable I/O errors become task-state
    /// transitions; everything else is unrecoverable.
    pub fn is_recoverable(&self) -> bool {
        match self {
            WorkerError::Storage(e) => e.is_recoverable(),
            WorkerError::Dataflow(e) => e.is_recoverable(),
            _ => false,
        }
    }

    pub fn from_transport_error(e: impl fmt::Display, context: &str) -> Self {
        WorkerError::Transport {
            context: context.to_string(),
            reason: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_recoverability_is_forwarded() {
        let recoverable = WorkerError::Storage(StorageError::ReadFailed {
            context: "x".into(),
            source: Box::new(vortex_storage::StorageErrorSource::Custom("y".into())),
        });
        assert!(recoverable.is_recoverable());

        let fatal = WorkerError::UnsupportedCommPattern {
            pattern: CommPattern::Shuffle,
        };
        assert!(!fatal.is_recoverable());
    }

    #[test]
    fn dataflow_recoverability_is_forwarded() {
        let recoverable = WorkerError::Dataflow(DataflowError::BlockFetchFailure {
            context: "x".into(),
        });
        assert!(recoverable.is_recoverable());

        let not_yet_servable = WorkerError::Dataflow(DataflowError::AbsentPartition {
            state: vortex_core::PartitionState::Scheduled,
        });
        assert!(!not_yet_servable.is_recoverable());
    }

    #[test]
    fn displays_with_context() {
        let e = WorkerError::IllegalMessage {
            listener_id: "executor".into(),
            kind: "ReservePartitionResponse".into(),
        };
        assert!(e.to_string().contains("executor"));
    }
}
