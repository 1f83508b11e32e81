use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tower_http::trace::TraceLayer;
use vortex_master::{ControlTransportServer, InMemoryPartitionManager, PartitionManagerService};
use vortex_proto::control_transport_server::ControlTransportServer as TonicControlTransportServer;

#[derive(Parser, Debug)]
#[command(name = "vortex-master-server", version, author, about = "Vortex runtime master")]
struct Args {
    /// Bind address (IP or hostname)
    #[arg(long, default_value = "0.0.0.0")]
    addr: String,

    /// Port to listen on, hosting the `runtime-master` control listener
    #[arg(long, default_value_t = 7000)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let addr: SocketAddr = format!("{}:{}", args.addr, args.port).parse()?;

    let manager = Arc::new(InMemoryPartitionManager::new());
    let service = Arc::new(PartitionManagerService::new(manager));
    let server = ControlTransportServer::new(service);

    tracing::info!(%addr, "starting vortex master control transport");
    tonic::transport::Server::builder()
        .layer(TraceLayer::new_for_http())
        .add_service(TonicControlTransportServer::new(server))
        .serve(addr)
        .await?;
    Ok(())
}
