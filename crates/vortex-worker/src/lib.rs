//! Worker runtime: the process that executes scheduled task groups.
//!
//! Hosts the Control Transport's `executor` listener (C1), the Task-Group
//! Executor (C5) it dispatches onto a bounded pool, the Data Channel Factory
//! (C4) and Partition Manager Worker (C8) that back a task's edges, and the
//! Block Transfer (C7) service peers pull partitions through.

pub mod channels;
pub mod client;
pub mod error;
pub mod executor;
pub mod partition_worker;
pub mod server;
pub mod state_manager;
pub mod transfer;
pub mod transform;

pub use channels::{
    broadcast_partitions, forward_partitions, local_queue, shuffle_partitions, InputReader,
    OutputWriter, ReadFuture, TaggedElements,
};
pub use client::MasterClient;
pub use error::WorkerError;
pub use executor::{ScheduledTaskGroup, TaskGroupExecutor};
pub use partition_worker::{LocalPartitionManagerWorker, PartitionManagerWorker};
pub use server::{ControlTransportServer, TaskGroupDispatcher, WorkerControlService};
pub use state_manager::TaskGroupStateManager;
pub use transfer::{DataTransferClient, DataTransferService};
pub use transform::{
    BoundedSource, Identity, NullTransformRegistry, OperatorContext, Transform, TransformRegistry,
    VecSource,
};
