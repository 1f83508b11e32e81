//! Shared error vocabulary (spec.md §7). Error *kinds*, not exception types:
//! every crate above this one layers its own error enum on top of these.

use crate::partition::PartitionState;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum DataflowError {
    /// A request for a partition that cannot currently be served; carries
    /// the state observed at request time so the caller can decide whether
    /// to retry after the scheduler rebuilds it.
    AbsentPartition { state: PartitionState },
    BlockFetchFailure { context: String },
    BlockWriteFailure { context: String },
    /// Programming error: an edge or task carries a communication pattern
    /// no data-channel implementation understands.
    UnsupportedCommPattern { pattern: String },
    /// A message arrived at a listener that does not handle it.
    IllegalMessage { listener_id: String, kind: String },
    UnknownFailure { context: String },
}

impl fmt::Display for DataflowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataflowError::AbsentPartition { state } => {
                write!(f, "partition not servable in state {state:?}")
            }
            DataflowError::BlockFetchFailure { context } => {
                write!(f, "block fetch failed: {context}")
            }
            DataflowError::BlockWriteFailure { context } => {
                write!(f, "block write failed: {context}")
            }
            DataflowError::UnsupportedCommPattern { pattern } => {
                write!(f, "unsupported communication pattern: {pattern}")
            }
            DataflowError::IllegalMessage { listener_id, kind } => {
                write!(f, "listener '{listener_id}' cannot handle message of kind '{kind}'")
            }
            DataflowError::UnknownFailure { context } => {
                write!(f, "unknown failure: {context}")
            }
        }
    }
}

impl std::error::Error for DataflowError {}

impl DataflowError {
    /// Recoverable at task-group granularity per spec.md §7 — I/O-level
    /// errors at a channel boundary are always recoverable; everything else
    /// terminates the task group.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DataflowError::BlockFetchFailure { .. } | DataflowError::BlockWriteFailure { .. }
        )
    }

    pub fn from_io_error(e: std::io::Error, context: &str) -> Self {
        DataflowError::UnknownFailure {
            context: format!("{context}: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_partition_display_carries_state() {
        let err = DataflowError::AbsentPartition {
            state: PartitionState::Ready,
        };
        assert!(err.to_string().contains("Ready"));
    }

    #[test]
    fn recoverability_classification() {
        assert!(DataflowError::BlockFetchFailure {
            context: "x".into()
        }
        .is_recoverable());
        assert!(DataflowError::BlockWriteFailure {
            context: "x".into()
        }
        .is_recoverable());
        assert!(!DataflowError::UnknownFailure {
            context: "x".into()
        }
        .is_recoverable());
        assert!(!DataflowError::UnsupportedCommPattern {
            pattern: "x".into()
        }
        .is_recoverable());
    }
}
