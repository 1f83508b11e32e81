//! Partition Manager (C3): the master's cluster-wide registry of
//! partitions, producer reverse index, and worker-loss handling
//! (spec.md §4.3).

use crate::error::MasterError;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use vortex_core::{DataflowError, ExecutorId, Location, PartitionId, PartitionMetadata, PartitionState, TaskGroupId};

struct PartitionManagerState {
    partitions: HashMap<PartitionId, Arc<PartitionMetadata>>,
    reverse_index: HashMap<TaskGroupId, HashSet<PartitionId>>,
}

/// A process-wide read/write lock guards both maps (spec.md §5): readers
/// take it for single-partition operations (each partition serializes its
/// own transitions via its internal mutex), writers take it for anything
/// that touches the map structure itself.
pub struct InMemoryPartitionManager {
    state: RwLock<PartitionManagerState>,
}

impl Default for InMemoryPartitionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryPartitionManager {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(PartitionManagerState {
                partitions: HashMap::new(),
                reverse_index: HashMap::new(),
            }),
        }
    }

    /// Writer lock: creates metadata and adds it to the reverse index.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn initialize_state(
        &self,
        partition_id: PartitionId,
        producer_task_group: TaskGroupId,
    ) -> Arc<PartitionMetadata> {
        let mut state = self.state.write();
        let metadata = Arc::new(PartitionMetadata::new(producer_task_group.clone()));
        state
            .partitions
            .insert(partition_id.clone(), Arc::clone(&metadata));
        state
            .reverse_index
            .entry(producer_task_group)
            .or_default()
            .insert(partition_id);
        metadata
    }

    /// Writer lock: every partition produced by `tg` not already `SCHEDULED`
    /// transitions to `SCHEDULED` with no location yet.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn on_producer_task_group_scheduled(&self, task_group_id: &TaskGroupId) {
        let state = self.state.write();
        let Some(partition_ids) = state.reverse_index.get(task_group_id) else {
            return;
        };
        for partition_id in partition_ids {
            let Some(partition) = state.partitions.get(partition_id) else {
                continue;
            };
            if partition.state() != PartitionState::Scheduled {
                if let Err(e) = partition.on_state_changed(PartitionState::Scheduled, None) {
                    tracing::warn!(%partition_id, error = %e, "dropped illegal scheduling transition");
                }
            }
        }
    }

    /// Writer lock: `COMMITTED -> LOST` or `SCHEDULED -> LOST_BEFORE_COMMIT`
    /// for every partition produced by `tg`.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn on_producer_task_group_failed(&self, task_group_id: &TaskGroupId) {
        let state = self.state.write();
        let Some(partition_ids) = state.reverse_index.get(task_group_id) else {
            return;
        };
        for partition_id in partition_ids {
            let Some(partition) = state.partitions.get(partition_id) else {
                continue;
            };
            let next = match partition.state() {
                PartitionState::Committed => Some(PartitionState::Lost),
                PartitionState::Scheduled => Some(PartitionState::LostBeforeCommit),
                _ => None,
            };
            if let Some(next) = next {
                if let Err(e) = partition.on_state_changed(next, None) {
                    tracing::warn!(%partition_id, error = %e, "dropped illegal failure transition");
                }
            }
        }
    }

    /// Reader lock: delegates the transition itself to C2, since each
    /// partition serializes its own mutations.
    #[tracing::instrument(level = "debug", skip(self, location))]
    pub fn on_partition_state_changed(
        &self,
        partition_id: &PartitionId,
        new_state: PartitionState,
        location: Option<Location>,
    ) -> Result<(), MasterError> {
        let state = self.state.read();
        let partition = state
            .partitions
            .get(partition_id)
            .ok_or_else(|| MasterError::PartitionNotFound {
                partition_id: partition_id.to_string(),
            })?;
        partition
            .on_state_changed(new_state, location)
            .map_err(MasterError::from)
    }

    /// Reader lock to find the partition; the future itself resolves (or
    /// fails) outside any critical section, per spec.md §5.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn get_partition_location_future(
        &self,
        partition_id: &PartitionId,
    ) -> Result<Location, DataflowError> {
        let partition = {
            let state = self.state.read();
            let Some(partition) = state.partitions.get(partition_id) else {
                return Err(DataflowError::AbsentPartition {
                    state: PartitionState::Removed,
                });
            };
            match partition.state() {
                PartitionState::Scheduled | PartitionState::Committed => {
                    Arc::clone(partition)
                }
                other => return Err(DataflowError::AbsentPartition { state: other }),
            }
        };
        partition.location_future().await
    }

    /// Writer lock: every `COMMITTED` partition whose location is
    /// `executor_id` transitions to `LOST`; returns the producer task
    /// groups of those partitions as the recomputation request.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn remove_worker(&self, executor_id: &ExecutorId) -> HashSet<TaskGroupId> {
        let state = self.state.write();
        let mut affected = HashSet::new();
        let target = Location::Executor(executor_id.clone());
        for partition in state.partitions.values() {
            if partition.state() == PartitionState::Committed && partition.location() == Some(target.clone())
            {
                if let Err(e) = partition.on_state_changed(PartitionState::Lost, None) {
                    tracing::warn!(error = %e, "dropped illegal worker-loss transition");
                    continue;
                }
                affected.insert(partition.producer_task_group.clone());
            }
        }
        affected
    }

    /// The union of the reverse index's values; exposed for P4 (reverse
    /// index completeness) tests.
    pub fn all_partition_ids(&self) -> HashSet<PartitionId> {
        self.state.read().partitions.keys().cloned().collect()
    }

    pub fn reverse_index_union(&self) -> HashSet<PartitionId> {
        self.state
            .read()
            .reverse_index
            .values()
            .flat_map(|s| s.iter().cloned())
            .collect()
    }

    pub fn partition_state(&self, partition_id: &PartitionId) -> Option<PartitionState> {
        self.state
            .read()
            .partitions
            .get(partition_id)
            .map(|p| p.state())
    }
}
