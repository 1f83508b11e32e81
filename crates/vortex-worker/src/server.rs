//! Worker's half of the Control Transport (C1): hosts the reserved
//! `executor` listener the master schedules task groups through (spec.md
//! §4.1/§6). Mirrors `vortex_master::server`'s adapter-over-a-trait shape
//! exactly, addressed at the opposite listener id.
//!
//! `execute()` itself is spec.md §4.5's contract ("runs exactly once per
//! instance"); this module is the dispatch point that turns an inbound
//! `ScheduleTaskGroup` message into one `TaskGroupExecutor` instance and
//! runs it on the worker's bounded pool (spec.md §5's `executorCapacity`).

use crate::client::MasterClient;
use crate::executor::{ScheduledTaskGroup, TaskGroupExecutor};
use crate::partition_worker::PartitionManagerWorker;
use crate::transform::TransformRegistry;
use async_trait::async_trait;
use std::sync::Arc;
use tonic::{Request, Response, Status};
use vortex_core::ExecutorId;
use vortex_proto::control_envelope::Payload;
use vortex_proto::{ControlEnvelope, ControlTransport, Empty, ScheduleTaskGroup};

/// The worker process's single control listener (`executor`). Unlike the
/// master's `runtime-master` listener, the worker only ever receives
/// fire-and-forget dispatch; spec.md names no worker-served request/reply
/// message, so `on_request` answers `IllegalMessage` for anything it sees.
#[async_trait]
pub trait WorkerControlService: Send + Sync {
    async fn on_message(&self, envelope: ControlEnvelope);
    async fn on_request(&self, envelope: ControlEnvelope) -> ControlEnvelope;
}

/// Server adapter converting tonic requests into `WorkerControlService`
/// calls, symmetric with `vortex_master::ControlTransportServer`.
pub struct ControlTransportServer<T: WorkerControlService> {
    service: Arc<T>,
}

impl<T: WorkerControlService> ControlTransportServer<T> {
    pub fn new(service: Arc<T>) -> Self {
        Self { service }
    }
}

#[tonic::async_trait]
impl<T: WorkerControlService + 'static> ControlTransport for ControlTransportServer<T> {
    async fn send(&self, request: Request<ControlEnvelope>) -> Result<Response<Empty>, Status> {
        self.service.on_message(request.into_inner()).await;
        Ok(Response::new(Empty {}))
    }

    async fn request(
        &self,
        request: Request<ControlEnvelope>,
    ) -> Result<Response<ControlEnvelope>, Status> {
        let reply = self.service.on_request(request.into_inner()).await;
        Ok(Response::new(reply))
    }
}

/// Dispatches `ScheduleTaskGroup` onto the worker's bounded execution pool,
/// realized as a `tokio::sync::Semaphore` of `executor_capacity` permits
/// plus `tokio::spawn` per task group (spec.md §5).
pub struct TaskGroupDispatcher<S: vortex_storage::BlockStore + 'static> {
    executor_id: ExecutorId,
    store: Arc<S>,
    master: MasterClient,
    partition_worker: Arc<dyn PartitionManagerWorker>,
    registry: Arc<dyn TransformRegistry>,
    pool: Arc<tokio::sync::Semaphore>,
}

impl<S: vortex_storage::BlockStore + 'static> TaskGroupDispatcher<S> {
    pub fn new(
        executor_id: ExecutorId,
        store: Arc<S>,
        master: MasterClient,
        partition_worker: Arc<dyn PartitionManagerWorker>,
        registry: Arc<dyn TransformRegistry>,
        executor_capacity: usize,
    ) -> Self {
        Self {
            executor_id,
            store,
            master,
            partition_worker,
            registry,
            pool: Arc::new(tokio::sync::Semaphore::new(executor_capacity)),
        }
    }

    fn build_executor(&self, scheduled: ScheduledTaskGroup) -> TaskGroupExecutor {
        let mut sources = std::collections::HashMap::new();
        let mut transforms = std::collections::HashMap::new();
        for task in &scheduled.descriptor.tasks {
            if let Some(source) = self.registry.source_for(&task.id) {
                sources.insert(task.id.clone(), source);
            }
            if let Some(transform) = self.registry.transform_for(&task.id) {
                transforms.insert(task.id.clone(), transform);
            }
        }
        TaskGroupExecutor::new(
            scheduled,
            self.executor_id.clone(),
            Arc::clone(&self.partition_worker),
            self.master.clone(),
            sources,
            transforms,
        )
    }

    async fn handle_schedule_task_group(&self, msg: ScheduleTaskGroup) {
        let scheduled: ScheduledTaskGroup = match serde_json::from_slice(&msg.descriptor) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(
                    task_group_id = %msg.task_group_id,
                    error = %e,
                    "dropped ScheduleTaskGroup with an undeserializable descriptor"
                );
                return;
            }
        };
        let executor = self.build_executor(scheduled);
        let pool = Arc::clone(&self.pool);
        tokio::spawn(async move {
            let Ok(_permit) = pool.acquire_owned().await else {
                return;
            };
            if let Err(e) = executor.execute().await {
                tracing::error!(error = %e, "task group execution ended in error");
            }
        });
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }
}

#[async_trait]
impl<S: vortex_storage::BlockStore + 'static> WorkerControlService for TaskGroupDispatcher<S> {
    async fn on_message(&self, envelope: ControlEnvelope) {
        match envelope.payload {
            Some(Payload::ScheduleTaskGroup(msg)) => self.handle_schedule_task_group(msg).await,
            other => {
                tracing::warn!(?other, "'executor' listener cannot handle this message as send()");
            }
        }
    }

    async fn on_request(&self, envelope: ControlEnvelope) -> ControlEnvelope {
        tracing::warn!(
            listener_id = %envelope.listener_id,
            "'executor' listener serves no request/reply message"
        );
        envelope
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition_worker::LocalPartitionManagerWorker;
    use crate::transform::NullTransformRegistry;
    use std::collections::HashMap;
    use std::net::SocketAddr;
    use std::time::Duration;
    use vortex_core::{StageId, TaskDescriptor, TaskGroupDescriptor, TaskGroupId, TaskId, TaskVariant};
    use vortex_storage::BlockStoreBackend;

    /// A minimal in-process master, so the dispatcher's `MasterClient` has
    /// somewhere real to connect (mirrors
    /// `vortex-master/tests/control_transport.rs`'s `spawn_master`).
    async fn spawn_master() -> (SocketAddr, tokio::task::JoinHandle<()>) {
        let manager = Arc::new(vortex_master::InMemoryPartitionManager::new());
        let service = Arc::new(vortex_master::PartitionManagerService::new(manager));
        let adapter = vortex_master::ControlTransportServer::new(service);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let incoming = tokio_stream::wrappers::TcpListenerStream::new(listener);
        let handle = tokio::spawn(async move {
            tonic::transport::Server::builder()
                .add_service(vortex_proto::control_transport_server::ControlTransportServer::new(adapter))
                .serve_with_incoming(incoming)
                .await
                .unwrap();
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        (addr, handle)
    }

    async fn dispatcher() -> (TaskGroupDispatcher<BlockStoreBackend>, tokio::task::JoinHandle<()>) {
        let (addr, handle) = spawn_master().await;
        let store = Arc::new(BlockStoreBackend::new_memory());
        let master = MasterClient::connect(format!("http://{addr}")).await.unwrap();
        let partition_worker: Arc<dyn PartitionManagerWorker> = Arc::new(LocalPartitionManagerWorker::new(
            Arc::clone(&store),
            ExecutorId::new("exec-test"),
            master.clone(),
            Duration::from_secs(1),
        ));
        let dispatcher = TaskGroupDispatcher::new(
            ExecutorId::new("exec-test"),
            store,
            master,
            partition_worker,
            Arc::new(NullTransformRegistry),
            4,
        );
        (dispatcher, handle)
    }

    #[tokio::test]
    async fn malformed_descriptor_is_dropped_not_panicked_on() {
        let (dispatcher, handle) = dispatcher().await;
        dispatcher
            .handle_schedule_task_group(ScheduleTaskGroup {
                task_group_id: "tg-0".into(),
                descriptor: b"not json".to_vec(),
                attempt_idx: 0,
            })
            .await;
        handle.abort();
    }

    #[tokio::test]
    async fn build_executor_picks_up_registered_sources_and_transforms() {
        let (dispatcher, handle) = dispatcher().await;
        let scheduled = ScheduledTaskGroup {
            descriptor: TaskGroupDescriptor {
                id: TaskGroupId::new("tg-0"),
                stage: StageId::new("stage-0"),
                parallelism: 1,
                tasks: vec![TaskDescriptor {
                    id: TaskId::new("t0"),
                    variant: TaskVariant::MetricBarrier,
                    inputs: vec![],
                    side_inputs: vec![],
                    outputs: vec![],
                }],
            },
            edges: HashMap::new(),
            instance_index: 0,
            attempt_idx: 0,
        };
        let _executor = dispatcher.build_executor(scheduled);
        handle.abort();
    }
}
