//! Maps inbound control messages to `InMemoryPartitionManager` operations
//! (spec.md §4.3/§6). This is the master's only `MasterControlService`
//! implementation; everything else in this crate is transport plumbing
//! around it.

use crate::partition_manager::InMemoryPartitionManager;
use crate::server::MasterControlService;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use vortex_core::{DataflowError, ExecutorId, Location, PartitionId, PartitionState, TaskGroupId};
use vortex_proto::control_envelope::Payload;
use vortex_proto::{
    BlockLocationInfo, BlockState, BlockStateChanged, ContainerFailed, ControlEnvelope,
    DataSizeMetric, ExecutorFailed, RequestBlockLocation, ReservePartition,
    ReservePartitionResponse, TaskGroupState, TaskGroupStateChanged,
};

/// Master-side control listener (`runtime-master`). Wraps the partition
/// manager and a small per-block reservation counter for `ReservePartition`.
pub struct PartitionManagerService {
    manager: Arc<InMemoryPartitionManager>,
    reservations: Mutex<HashMap<String, u64>>,
}

impl PartitionManagerService {
    pub fn new(manager: Arc<InMemoryPartitionManager>) -> Self {
        Self {
            manager,
            reservations: Mutex::new(HashMap::new()),
        }
    }

    pub fn manager(&self) -> &Arc<InMemoryPartitionManager> {
        &self.manager
    }

    fn handle_task_group_state_changed(&self, msg: TaskGroupStateChanged) {
        let tg = TaskGroupId::new(msg.task_group_id);
        let state = TaskGroupState::try_from(msg.state).unwrap_or(TaskGroupState::Unspecified);
        if matches!(
            state,
            TaskGroupState::FailedRecoverable | TaskGroupState::FailedUnrecoverable
        ) {
            self.manager.on_producer_task_group_failed(&tg);
        }
    }

    fn handle_block_state_changed(&self, msg: BlockStateChanged) {
        let Ok(partition_id) = PartitionId::from_str(&msg.block_id) else {
            tracing::warn!(block_id = %msg.block_id, "dropped BlockStateChanged for malformed partition id");
            return;
        };
        let Some(new_state) = block_state_to_partition_state(msg.state()) else {
            tracing::warn!(state = msg.state, "dropped BlockStateChanged with an unmappable state");
            return;
        };
        let location = (!msg.location.is_empty()).then(|| {
            if msg.location == "remote" {
                Location::Remote
            } else {
                Location::Executor(ExecutorId::new(msg.location.clone()))
            }
        });
        if let Err(e) = self
            .manager
            .on_partition_state_changed(&partition_id, new_state, location)
        {
            tracing::warn!(%partition_id, error = %e, "dropped illegal BlockStateChanged");
        }
    }

    fn handle_executor_failed(&self, msg: ExecutorFailed) {
        tracing::error!(executor_id = %msg.executor_id, bytes = msg.exception_bytes.len(), "executor reported an unrecoverable failure");
    }

    fn handle_container_failed(&self, msg: ContainerFailed) {
        let executor = ExecutorId::new(msg.executor_id.clone());
        let affected = self.manager.remove_worker(&executor);
        tracing::warn!(executor_id = %msg.executor_id, affected = affected.len(), "container failed; producer task groups need recomputation");
    }

    fn handle_data_size_metric(&self, msg: DataSizeMetric) {
        tracing::debug!(block_id = %msg.block_id, src_vertex_id = %msg.src_vertex_id, sizes = ?msg.partition_sizes, "data size metric");
    }

    async fn handle_request_block_location(&self, msg: RequestBlockLocation) -> BlockLocationInfo {
        let Ok(partition_id) = PartitionId::from_str(&msg.block_id) else {
            return BlockLocationInfo {
                request_id: msg.block_id.clone(),
                block_id: msg.block_id,
                state: BlockState::Unspecified as i32,
                owner_executor_id: None,
            };
        };
        match self
            .manager
            .get_partition_location_future(&partition_id)
            .await
        {
            Ok(location) => BlockLocationInfo {
                request_id: msg.block_id.clone(),
                block_id: msg.block_id,
                state: BlockState::Committed as i32,
                owner_executor_id: Some(match location {
                    Location::Executor(id) => id.to_string(),
                    Location::Remote => "remote".to_string(),
                }),
            },
            Err(e) => BlockLocationInfo {
                request_id: msg.block_id.clone(),
                block_id: msg.block_id,
                state: dataflow_error_to_block_state(&e) as i32,
                owner_executor_id: None,
            },
        }
    }

    fn handle_reserve_partition(&self, msg: ReservePartition) -> ReservePartitionResponse {
        let mut reservations = self.reservations.lock();
        let position = reservations.entry(msg.block_id.clone()).or_insert(0);
        let assigned = *position;
        *position += 1;
        ReservePartitionResponse {
            request_id: msg.request_id,
            position_to_write: Some(assigned),
            partition_idx: Some(assigned as u32),
        }
    }
}

#[async_trait]
impl MasterControlService for PartitionManagerService {
    async fn on_message(&self, envelope: ControlEnvelope) {
        match envelope.payload {
            Some(Payload::TaskGroupStateChanged(msg)) => self.handle_task_group_state_changed(msg),
            Some(Payload::BlockStateChanged(msg)) => self.handle_block_state_changed(msg),
            Some(Payload::ExecutorFailed(msg)) => self.handle_executor_failed(msg),
            Some(Payload::ContainerFailed(msg)) => self.handle_container_failed(msg),
            Some(Payload::DataSizeMetric(msg)) => self.handle_data_size_metric(msg),
            other => {
                tracing::warn!(?other, "runtime-master listener cannot handle this message as send()");
            }
        }
    }

    async fn on_request(&self, envelope: ControlEnvelope) -> ControlEnvelope {
        let message_id = envelope.message_id.clone();
        let payload = match envelope.payload {
            Some(Payload::RequestBlockLocation(msg)) => Some(Payload::BlockLocationInfo(
                self.handle_request_block_location(msg).await,
            )),
            Some(Payload::ReservePartition(msg)) => Some(Payload::ReservePartitionResponse(
                self.handle_reserve_partition(msg),
            )),
            other => {
                tracing::warn!(?other, "runtime-master listener cannot handle this message as request()");
                None
            }
        };
        ControlEnvelope {
            message_id,
            listener_id: "runtime-master".into(),
            payload,
        }
    }
}

fn block_state_to_partition_state(state: BlockState) -> Option<PartitionState> {
    match state {
        BlockState::Ready => Some(PartitionState::Ready),
        BlockState::Scheduled => Some(PartitionState::Scheduled),
        BlockState::Committed => Some(PartitionState::Committed),
        BlockState::Lost => Some(PartitionState::Lost),
        BlockState::LostBeforeCommit => Some(PartitionState::LostBeforeCommit),
        BlockState::Removed => Some(PartitionState::Removed),
        BlockState::Unspecified => None,
    }
}

fn dataflow_error_to_block_state(e: &DataflowError) -> BlockState {
    match e {
        DataflowError::AbsentPartition { state } => match state {
            PartitionState::Ready => BlockState::Ready,
            PartitionState::Scheduled => BlockState::Scheduled,
            PartitionState::Committed => BlockState::Committed,
            PartitionState::Lost => BlockState::Lost,
            PartitionState::LostBeforeCommit => BlockState::LostBeforeCommit,
            PartitionState::Removed => BlockState::Removed,
        },
        _ => BlockState::Unspecified,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vortex_core::EdgeId;
    use vortex_proto::RecoverableCause;

    fn service() -> PartitionManagerService {
        PartitionManagerService::new(Arc::new(InMemoryPartitionManager::new()))
    }

    #[tokio::test]
    async fn task_group_failure_propagates_to_the_manager() {
        let service = service();
        let tg = TaskGroupId::new("tg-0");
        let p0 = PartitionId::new(EdgeId::new("e0"), 0);
        service.manager.initialize_state(p0.clone(), tg.clone());
        service.manager.on_producer_task_group_scheduled(&tg);

        service
            .on_message(ControlEnvelope {
                message_id: "1".into(),
                listener_id: "runtime-master".into(),
                payload: Some(Payload::TaskGroupStateChanged(TaskGroupStateChanged {
                    executor_id: "exec-1".into(),
                    task_group_id: tg.to_string(),
                    state: TaskGroupState::FailedUnrecoverable as i32,
                    tasks_on_hold: vec![],
                    cause: RecoverableCause::Unspecified as i32,
                    attempt_idx: 0,
                })),
            })
            .await;

        assert_eq!(
            service.manager.partition_state(&p0),
            Some(PartitionState::LostBeforeCommit)
        );
    }

    #[tokio::test]
    async fn block_state_changed_commits_a_partition() {
        let service = service();
        let tg = TaskGroupId::new("tg-0");
        let p0 = PartitionId::new(EdgeId::new("e0"), 0);
        service.manager.initialize_state(p0.clone(), tg);
        service
            .manager
            .on_partition_state_changed(&p0, PartitionState::Scheduled, None)
            .unwrap();

        service
            .on_message(ControlEnvelope {
                message_id: "2".into(),
                listener_id: "runtime-master".into(),
                payload: Some(Payload::BlockStateChanged(BlockStateChanged {
                    executor_id: "exec-1".into(),
                    block_id: p0.to_string(),
                    state: BlockState::Committed as i32,
                    location: "exec-1".into(),
                })),
            })
            .await;

        assert_eq!(
            service.manager.partition_state(&p0),
            Some(PartitionState::Committed)
        );
    }

    #[tokio::test]
    async fn request_block_location_returns_ready_for_unscheduled_partitions() {
        let service = service();
        let tg = TaskGroupId::new("tg-0");
        let p0 = PartitionId::new(EdgeId::new("e0"), 0);
        service.manager.initialize_state(p0.clone(), tg);

        let reply = service
            .on_request(ControlEnvelope {
                message_id: "3".into(),
                listener_id: "runtime-master".into(),
                payload: Some(Payload::RequestBlockLocation(RequestBlockLocation {
                    executor_id: "exec-1".into(),
                    block_id: p0.to_string(),
                })),
            })
            .await;

        match reply.payload {
            Some(Payload::BlockLocationInfo(info)) => {
                assert_eq!(info.state, BlockState::Ready as i32);
                assert!(info.owner_executor_id.is_none());
            }
            other => panic!("unexpected reply payload: {other:?}"),
        }
    }

    #[tokio::test]
    async fn container_failed_removes_the_worker_from_the_manager() {
        let service = service();
        let tg = TaskGroupId::new("tg-0");
        let p0 = PartitionId::new(EdgeId::new("e0"), 0);
        service.manager.initialize_state(p0.clone(), tg);
        service
            .manager
            .on_partition_state_changed(
                &p0,
                PartitionState::Committed,
                Some(Location::Executor(ExecutorId::new("exec-1"))),
            )
            .unwrap();

        service
            .on_message(ControlEnvelope {
                message_id: "4".into(),
                listener_id: "runtime-master".into(),
                payload: Some(Payload::ContainerFailed(ContainerFailed {
                    executor_id: "exec-1".into(),
                })),
            })
            .await;

        assert_eq!(
            service.manager.partition_state(&p0),
            Some(PartitionState::Lost)
        );
    }

    #[test]
    fn reserve_partition_assigns_increasing_positions() {
        let service = service();
        let first = service.handle_reserve_partition(ReservePartition {
            request_id: "r1".into(),
            block_id: "e0#0".into(),
        });
        let second = service.handle_reserve_partition(ReservePartition {
            request_id: "r2".into(),
            block_id: "e0#0".into(),
        });
        assert_eq!(first.position_to_write, Some(0));
        assert_eq!(second.position_to_write, Some(1));
    }
}
