//! Error types for the master's partition manager and control transport.

use std::fmt;
use vortex_core::DataflowError;

#[derive(Debug, Clone, PartialEq)]
pub enum MasterError {
    /// A message referenced a partition the master never initialized.
    PartitionNotFound { partition_id: String },
    /// A message referenced a task group absent from the reverse index.
    TaskGroupNotFound { task_group_id: String },
    /// A partition-metadata state-machine violation (illegal transition,
    /// commit from a different location, commit without location). Per
    /// spec.md §7, these are logged and dropped, not fatal.
    StateMachine(DataflowError),
    Transport { context: String, reason: String },
}

impl fmt::Display for MasterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MasterError::PartitionNotFound { partition_id } => {
                write!(f, "partition '{partition_id}' not found")
            }
            MasterError::TaskGroupNotFound { task_group_id } => {
                write!(f, "task group '{task_group_id}' not found")
            }
            MasterError::StateMachine(e) => write!(f, "state machine violation: {e}"),
            MasterError::Transport { context, reason } => {
                write!(f, "transport error in {context}: {reason}")
            }
        }
    }
}

impl std::error::Error for MasterError {}

impl From<DataflowError> for MasterError {
    fn from(e: DataflowError) -> Self {
        MasterError::StateMachine(e)
    }
}

impl MasterError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            MasterError::PartitionNotFound { .. } | MasterError::TaskGroupNotFound { .. }
        )
    }

    pub fn from_transport_error(e: impl std::fmt::Display, context: &str) -> Self {
        MasterError::Transport {
            context: context.to_string(),
            reason: e.to_string(),
        }
    }
}
