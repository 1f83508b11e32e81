//! Exercises the master's control transport end to end: a real tonic
//! server backed by `PartitionManagerService`, driven through
//! `ControlTransportClient` over a local socket.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tonic::transport::Server;
use vortex_core::{EdgeId, ExecutorId, PartitionId, PartitionState, TaskGroupId};
use vortex_master::{ControlTransportClient, ControlTransportServer, InMemoryPartitionManager, PartitionManagerService};
use vortex_proto::control_envelope::Payload;
use vortex_proto::{
    BlockState, BlockStateChanged, ContainerFailed, RequestBlockLocation,
    ControlTransportServer as TonicControlTransportServer, TaskGroupState,
    TaskGroupStateChanged,
};

async fn spawn_master(manager: Arc<InMemoryPartitionManager>) -> (SocketAddr, tokio::task::JoinHandle<()>) {
    let service = Arc::new(PartitionManagerService::new(manager));
    let adapter = ControlTransportServer::new(service);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let incoming = tokio_stream::wrappers::TcpListenerStream::new(listener);
    let handle = tokio::spawn(async move {
        Server::builder()
            .add_service(TonicControlTransportServer::new(adapter))
            .serve_with_incoming(incoming)
            .await
            .unwrap();
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    (addr, handle)
}

#[tokio::test]
async fn worker_loss_marks_committed_partitions_lost_and_leaves_scheduled_alone() {
    let manager = Arc::new(InMemoryPartitionManager::new());
    let tg1 = TaskGroupId::new("producer-1");
    let tg2 = TaskGroupId::new("producer-2");
    let tg3 = TaskGroupId::new("producer-3");
    let p1 = PartitionId::new(EdgeId::new("e0"), 0);
    let p2 = PartitionId::new(EdgeId::new("e0"), 1);
    let p3 = PartitionId::new(EdgeId::new("e0"), 2);
    manager.initialize_state(p1.clone(), tg1.clone());
    manager.initialize_state(p2.clone(), tg2.clone());
    manager.initialize_state(p3.clone(), tg3.clone());

    let executor_x = ExecutorId::new("X");
    manager
        .on_partition_state_changed(
            &p1,
            PartitionState::Scheduled,
            None,
        )
        .unwrap();
    manager
        .on_partition_state_changed(
            &p1,
            PartitionState::Committed,
            Some(vortex_core::Location::Executor(executor_x.clone())),
        )
        .unwrap();
    manager
        .on_partition_state_changed(&p2, PartitionState::Scheduled, None)
        .unwrap();
    manager
        .on_partition_state_changed(
            &p2,
            PartitionState::Committed,
            Some(vortex_core::Location::Executor(executor_x.clone())),
        )
        .unwrap();
    manager
        .on_partition_state_changed(&p3, PartitionState::Scheduled, None)
        .unwrap();

    let (addr, handle) = spawn_master(Arc::clone(&manager)).await;
    let mut client = ControlTransportClient::connect(format!("http://{addr}"))
        .await
        .unwrap();

    client
        .send(Payload::ContainerFailed(ContainerFailed {
            executor_id: "X".into(),
        }))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(manager.partition_state(&p1), Some(PartitionState::Lost));
    assert_eq!(manager.partition_state(&p2), Some(PartitionState::Lost));
    assert_eq!(manager.partition_state(&p3), Some(PartitionState::Scheduled));

    client
        .send(Payload::TaskGroupStateChanged(TaskGroupStateChanged {
            executor_id: "X".into(),
            task_group_id: tg3.to_string(),
            state: TaskGroupState::FailedRecoverable as i32,
            tasks_on_hold: vec![],
            cause: vortex_proto::RecoverableCause::InputReadFailure as i32,
            attempt_idx: 0,
        }))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(
        manager.partition_state(&p3),
        Some(PartitionState::LostBeforeCommit)
    );

    handle.abort();
}

#[tokio::test]
async fn absent_partition_is_reported_for_a_ready_partition() {
    let manager = Arc::new(InMemoryPartitionManager::new());
    let tg = TaskGroupId::new("producer-0");
    let p0 = PartitionId::new(EdgeId::new("e0"), 0);
    manager.initialize_state(p0.clone(), tg);

    let (addr, handle) = spawn_master(Arc::clone(&manager)).await;
    let mut client = ControlTransportClient::connect(format!("http://{addr}"))
        .await
        .unwrap();

    let reply = client
        .request(
            Payload::RequestBlockLocation(RequestBlockLocation {
                executor_id: "exec-1".into(),
                block_id: p0.to_string(),
            }),
            Duration::from_secs(1),
        )
        .await
        .unwrap();

    match reply.payload {
        Some(Payload::BlockLocationInfo(info)) => {
            assert_eq!(info.state, BlockState::Ready as i32);
            assert!(info.owner_executor_id.is_none());
        }
        other => panic!("unexpected reply: {other:?}"),
    }

    handle.abort();
}

#[tokio::test]
async fn single_source_single_sink_one_to_one_runs_through_the_full_state_machine() {
    let manager = Arc::new(InMemoryPartitionManager::new());
    let producer = TaskGroupId::new("producer-0");
    let partition = PartitionId::new(EdgeId::new("e0"), 0);
    manager.initialize_state(partition.clone(), producer.clone());
    assert_eq!(manager.partition_state(&partition), Some(PartitionState::Ready));

    let (addr, handle) = spawn_master(Arc::clone(&manager)).await;
    let mut client = ControlTransportClient::connect(format!("http://{addr}"))
        .await
        .unwrap();

    manager.on_producer_task_group_scheduled(&producer);
    assert_eq!(manager.partition_state(&partition), Some(PartitionState::Scheduled));

    client
        .send(Payload::BlockStateChanged(BlockStateChanged {
            executor_id: "exec-1".into(),
            block_id: partition.to_string(),
            state: BlockState::Committed as i32,
            location: "exec-1".into(),
        }))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(
        manager.partition_state(&partition),
        Some(PartitionState::Committed)
    );

    handle.abort();
}
