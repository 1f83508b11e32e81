//! Shared types for the dataflow execution runtime: identifiers, the
//! partition and task-group state machines, and the static graph
//! descriptors every other crate in the workspace builds on.

pub mod error;
pub mod ids;
pub mod partition;
pub mod state;
pub mod task_group;

pub use error::DataflowError;
pub use ids::{
    EdgeId, ExecutorId, JobId, Location, PartitionId, PartitionIdParseError, StageId, TaskGroupId,
    TaskId, EXECUTOR_LISTENER, RUNTIME_MASTER_LISTENER,
};
pub use partition::{BlockMetadata, PartitionMetadata, PartitionState};
pub use state::{RecoverableCause, TaskGroupState, TaskState};
pub use task_group::{
    CommPattern, DataStoreKind, Edge, HashRange, TaskDescriptor, TaskGroupDescriptor,
    TaskGroupGraphError, TaskInput, TaskOutput, TaskVariant,
};
