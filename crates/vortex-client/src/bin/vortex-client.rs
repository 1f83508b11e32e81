use clap::{Parser, Subcommand};
use vortex_client::OperatorClient;
use vortex_proto::BlockState;

#[derive(Parser, Debug)]
#[command(name = "vortex-client", version, author, about = "Vortex operator CLI")]
struct Cli {
    /// Master address, e.g. http://127.0.0.1:7000
    #[arg(long, default_value = "http://127.0.0.1:7000")]
    master_addr: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check that the master's control listener is reachable
    Describe,
    /// Look up where a partition's blocks currently live
    Locate(LocateCmd),
    /// Force a worker-loss drill by reporting an executor's container as failed
    LoseWorker(LoseWorkerCmd),
}

#[derive(clap::Args, Debug)]
struct LocateCmd {
    /// Partition id, formatted as `<edgeId>#<producerIndex>`
    #[arg(long)]
    partition: String,
}

#[derive(clap::Args, Debug)]
struct LoseWorkerCmd {
    #[arg(long)]
    executor_id: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Describe => {
            let _client = OperatorClient::connect(cli.master_addr.clone()).await?;
            println!("master reachable at {}", cli.master_addr);
        }
        Commands::Locate(args) => {
            let mut client = OperatorClient::connect(cli.master_addr).await?;
            let info = client.request_block_location(&args.partition).await?;
            let state = BlockState::try_from(info.state).unwrap_or(BlockState::Unspecified);
            println!("partition: {}", info.block_id);
            println!("state: {state:?}");
            match info.owner_executor_id {
                Some(owner) => println!("owner: {owner}"),
                None => println!("owner: (none yet)"),
            }
        }
        Commands::LoseWorker(args) => {
            let mut client = OperatorClient::connect(cli.master_addr).await?;
            client.force_worker_loss(&args.executor_id).await?;
            println!("reported {} as a lost container", args.executor_id);
        }
    }
    Ok(())
}
