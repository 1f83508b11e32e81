use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use vortex_core::ExecutorId;
use vortex_proto::control_transport_server::ControlTransportServer as TonicControlTransportServer;
use vortex_proto::BlockTransferServer as TonicBlockTransferServer;
use vortex_storage::{BlockStoreBackend, SyncMode};
use vortex_worker::{
    ControlTransportServer, DataTransferService, LocalPartitionManagerWorker, MasterClient,
    NullTransformRegistry, PartitionManagerWorker, TaskGroupDispatcher,
};

#[derive(Copy, Clone, Debug, ValueEnum)]
enum StorageKind {
    Memory,
    SerializedMemory,
    File,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum FileSyncMode {
    None,
    Immediate,
    Periodic,
}

impl From<FileSyncMode> for SyncMode {
    fn from(mode: FileSyncMode) -> Self {
        match mode {
            FileSyncMode::None => SyncMode::None,
            FileSyncMode::Immediate => SyncMode::Immediate,
            FileSyncMode::Periodic => SyncMode::Periodic,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "vortex-worker-server", version, author, about = "Vortex executor")]
struct Args {
    /// Bind address (IP or hostname), hosting the `executor` control
    /// listener and the `BlockTransfer` data service on the same port
    #[arg(long, default_value = "0.0.0.0")]
    addr: String,

    #[arg(long, default_value_t = 7100)]
    port: u16,

    /// Identifies this executor to the master and to peer executors'
    /// `RequestBlockLocation` replies
    #[arg(long)]
    executor_id: String,

    /// `runtime-master` listener address to report state to and request
    /// partition locations from
    #[arg(long)]
    master_addr: String,

    #[arg(long, value_enum, default_value_t = StorageKind::Memory)]
    storage: StorageKind,

    #[arg(long, default_value = "./data")]
    data_dir: PathBuf,

    #[arg(long, value_enum, default_value_t = FileSyncMode::Immediate)]
    sync: FileSyncMode,

    /// Concurrent task groups this executor will run at once (spec.md §5)
    #[arg(long, default_value_t = 4)]
    executor_capacity: usize,

    /// Deadline for `RequestBlockLocation`/`ReservePartition` round trips
    #[arg(long, default_value_t = 30)]
    master_request_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let addr: SocketAddr = format!("{}:{}", args.addr, args.port).parse()?;
    let executor_id = ExecutorId::new(args.executor_id);

    let store = Arc::new(match args.storage {
        StorageKind::Memory => BlockStoreBackend::new_memory(),
        StorageKind::SerializedMemory => BlockStoreBackend::new_serialized_memory(),
        StorageKind::File => BlockStoreBackend::new_local_file(args.sync.into(), &args.data_dir)?,
    });

    let master = MasterClient::connect(args.master_addr.clone()).await?;
    let partition_worker: Arc<dyn PartitionManagerWorker> = Arc::new(LocalPartitionManagerWorker::new(
        Arc::clone(&store),
        executor_id.clone(),
        master.clone(),
        Duration::from_secs(args.master_request_timeout_secs),
    ));

    let dispatcher = Arc::new(TaskGroupDispatcher::new(
        executor_id.clone(),
        Arc::clone(&store),
        master,
        partition_worker,
        Arc::new(NullTransformRegistry),
        args.executor_capacity,
    ));
    let control = ControlTransportServer::new(dispatcher);
    let transfer = DataTransferService::new(store);

    tracing::info!(%addr, %executor_id, "starting vortex executor");
    tonic::transport::Server::builder()
        .add_service(TonicControlTransportServer::new(control))
        .add_service(TonicBlockTransferServer::new(transfer))
        .serve(addr)
        .await?;
    Ok(())
}
