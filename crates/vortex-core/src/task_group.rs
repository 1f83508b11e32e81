//! Task-group and edge descriptors: the static shape of a job's dataflow
//! graph, shared by the master's scheduler and the worker's executor
//! (spec.md §3/§4.4/§4.5).
//!
//! Two graphs nest here: the cluster-wide graph of `Edge`s between task
//! groups (what C3/C4 route across the wire), and, inside each task group,
//! a small DAG of `TaskDescriptor`s (what C5 walks in topological order
//! inside one scheduling unit).

use crate::ids::{EdgeId, StageId, TaskGroupId, TaskId};
use serde::{Deserialize, Serialize};

/// What kind of work a task group's tasks perform (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskVariant {
    /// Reads from an external, already-partitioned source; has no input
    /// edges.
    BoundedSource,
    /// Consumes one or more input edges and produces zero or more output
    /// edges.
    Operator,
    /// A synchronization point with no data output of its own; used to
    /// gate downstream scheduling on upstream completion metrics.
    MetricBarrier,
}

/// How a producer task group's output partitions map onto a consumer task
/// group's tasks (spec.md §3/§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommPattern {
    /// Each consumer task reads exactly one partition, chosen by matching
    /// task index to producer index.
    Forward,
    /// Every consumer task reads every partition produced on the edge.
    Broadcast,
    /// Each consumer task reads the subset of partitions whose hash range
    /// was assigned to it.
    Shuffle,
}

/// Where an edge's partitions are materialized while in flight (spec.md
/// §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataStoreKind {
    /// Held in the producing executor's process memory as live objects;
    /// lost if that executor dies.
    Memory,
    /// Held in the producing executor's process memory, but pre-serialized
    /// to bytes; same failure mode as `Memory`, cheaper to transfer to a
    /// remote reader.
    SerializedMemory,
    /// Spilled to the producing executor's local disk; still lost if that
    /// executor dies, but survives the producing task group restarting in
    /// place.
    LocalFile,
    /// Written to a remote, durable store; survives executor loss
    /// (`Location::Remote`).
    RemoteFile,
}

/// A sub-interval of a shuffle edge's key space `[0, modulus)`, assigned to
/// one destination task group (spec.md GLOSSARY "hash range").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashRange {
    pub start: u64,
    pub end: u64,
}

impl HashRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// The full key space `[0, modulus)` — used by broadcast and one-to-one
    /// reads, which are not restricted to a sub-range.
    pub fn full(modulus: u64) -> Self {
        Self {
            start: 0,
            end: modulus,
        }
    }

    pub fn contains(&self, key: u64) -> bool {
        key >= self.start && key < self.end
    }
}

/// One edge of the cluster-wide dataflow graph: a producer task group's
/// output, consumed by some number of downstream task groups under a fixed
/// communication pattern (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub producer: TaskGroupId,
    pub consumers: Vec<TaskGroupId>,
    pub pattern: CommPattern,
    pub store: DataStoreKind,
    pub side_input: bool,
    pub coder: String,
    /// Number of partitions this edge's producer emits; one per producer
    /// task index (`PartitionId::producer_index` ranges over
    /// `0..producer_parallelism`).
    pub producer_parallelism: u32,
    /// Key-space size `[0, modulus)` elements are hashed into before being
    /// written, for `Shuffle` edges (`None` otherwise). A compile-time
    /// property, fixed before any hash range is assigned to a consumer.
    pub shuffle_modulus: Option<u64>,
}

/// One of a task's inputs: either a sibling task's output within the same
/// task group (wired with an in-process queue), or a cross-stage edge
/// produced by a different task group (wired through C4/C7/C8). Shuffle
/// edges carry the hash range this task group was assigned; other patterns
/// leave it `None` (the reader is not restricted to a sub-range).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskInput {
    Local(TaskId),
    CrossStage {
        edge: EdgeId,
        hash_range: Option<HashRange>,
    },
}

/// One of a task's outputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskOutput {
    Local(TaskId),
    CrossStage(EdgeId),
}

/// One task inside a task group's micro-DAG (spec.md §3/§4.5).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub id: TaskId,
    pub variant: TaskVariant,
    pub inputs: Vec<TaskInput>,
    /// Broadcast-style inputs materialized before `on_data` is called for
    /// any element (spec.md §4.5's "side-input futures").
    pub side_inputs: Vec<TaskInput>,
    pub outputs: Vec<TaskOutput>,
}

impl TaskDescriptor {
    pub fn is_source(&self) -> bool {
        self.inputs.is_empty()
    }

    pub fn is_sink(&self) -> bool {
        self.outputs.is_empty()
    }

    /// The sibling tasks this task reads from over a local, in-process
    /// queue — used to compute the micro-DAG's topological order.
    fn local_predecessors(&self) -> impl Iterator<Item = &TaskId> {
        self.inputs.iter().filter_map(|input| match input {
            TaskInput::Local(id) => Some(id),
            TaskInput::CrossStage { .. } => None,
        })
    }
}

/// Error returned when a task group's micro-DAG cannot be ordered: it
/// references a task id that isn't in the group, or it contains a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskGroupGraphError {
    UnknownTask { id: TaskId },
    Cycle,
}

/// Static description of a task group: its micro-DAG of tasks and the
/// variant-specific wiring between them (spec.md §3/§4.4). Instantiated
/// once per job and shared, read-only, by master and worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskGroupDescriptor {
    pub id: TaskGroupId,
    pub stage: StageId,
    /// Number of parallel instances of this task group; also the number of
    /// partitions each of its outgoing edges carries.
    pub parallelism: u32,
    pub tasks: Vec<TaskDescriptor>,
}

impl TaskGroupDescriptor {
    pub fn task(&self, id: &TaskId) -> Option<&TaskDescriptor> {
        self.tasks.iter().find(|t| &t.id == id)
    }

    /// Kahn's algorithm over the micro-DAG's local (intra-group) edges.
    /// C5 walks tasks in the order returned here (spec.md §4.5).
    pub fn topological_order(&self) -> Result<Vec<&TaskDescriptor>, TaskGroupGraphError> {
        let known: std::collections::HashSet<&TaskId> = self.tasks.iter().map(|t| &t.id).collect();
        for task in &self.tasks {
            for pred in task.local_predecessors() {
                if !known.contains(pred) {
                    return Err(TaskGroupGraphError::UnknownTask { id: pred.clone() });
                }
            }
        }

        let mut remaining: std::collections::HashMap<&TaskId, usize> = self
            .tasks
            .iter()
            .map(|t| (&t.id, t.local_predecessors().count()))
            .collect();

        let mut ready: Vec<&TaskDescriptor> =
            self.tasks.iter().filter(|t| remaining[&t.id] == 0).collect();
        let mut order = Vec::with_capacity(self.tasks.len());

        while let Some(task) = ready.pop() {
            order.push(task);
            for other in &self.tasks {
                if other.local_predecessors().any(|p| p == &task.id) {
                    let entry = remaining.get_mut(&other.id).unwrap();
                    *entry -= 1;
                    if *entry == 0 {
                        ready.push(other);
                    }
                }
            }
        }

        if order.len() != self.tasks.len() {
            return Err(TaskGroupGraphError::Cycle);
        }
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, variant: TaskVariant, inputs: Vec<TaskInput>, outputs: Vec<TaskOutput>) -> TaskDescriptor {
        TaskDescriptor {
            id: TaskId::new(id),
            variant,
            inputs,
            side_inputs: vec![],
            outputs,
        }
    }

    #[test]
    fn single_source_is_its_own_topological_order() {
        let descriptor = TaskGroupDescriptor {
            id: TaskGroupId::new("tg-0"),
            stage: StageId::new("stage-0"),
            parallelism: 1,
            tasks: vec![task(
                "t0",
                TaskVariant::BoundedSource,
                vec![],
                vec![TaskOutput::CrossStage(EdgeId::new("e0"))],
            )],
        };
        let order = descriptor.topological_order().unwrap();
        assert_eq!(order.len(), 1);
        assert!(order[0].is_source());
    }

    #[test]
    fn chained_operators_are_ordered_by_local_edges() {
        let descriptor = TaskGroupDescriptor {
            id: TaskGroupId::new("tg-0"),
            stage: StageId::new("stage-0"),
            parallelism: 1,
            tasks: vec![
                task(
                    "map",
                    TaskVariant::Operator,
                    vec![TaskInput::CrossStage {
                        edge: EdgeId::new("e0"),
                        hash_range: None,
                    }],
                    vec![TaskOutput::Local(TaskId::new("filter"))],
                ),
                task(
                    "filter",
                    TaskVariant::Operator,
                    vec![TaskInput::Local(TaskId::new("map"))],
                    vec![TaskOutput::CrossStage(EdgeId::new("e1"))],
                ),
            ],
        };
        let order = descriptor.topological_order().unwrap();
        assert_eq!(order[0].id, TaskId::new("map"));
        assert_eq!(order[1].id, TaskId::new("filter"));
    }

    #[test]
    fn a_cycle_is_reported_not_panicked_on() {
        let descriptor = TaskGroupDescriptor {
            id: TaskGroupId::new("tg-0"),
            stage: StageId::new("stage-0"),
            parallelism: 1,
            tasks: vec![
                task(
                    "a",
                    TaskVariant::Operator,
                    vec![TaskInput::Local(TaskId::new("b"))],
                    vec![TaskOutput::Local(TaskId::new("b"))],
                ),
                task(
                    "b",
                    TaskVariant::Operator,
                    vec![TaskInput::Local(TaskId::new("a"))],
                    vec![TaskOutput::Local(TaskId::new("a"))],
                ),
            ],
        };
        assert_eq!(
            descriptor.topological_order(),
            Err(TaskGroupGraphError::Cycle)
        );
    }

    #[test]
    fn hash_range_containment() {
        let range = HashRange::new(1, 4);
        assert!(!range.contains(0));
        assert!(range.contains(1));
        assert!(range.contains(3));
        assert!(!range.contains(4));
        assert!(HashRange::full(8).contains(0));
        assert!(HashRange::full(8).contains(7));
    }
}
