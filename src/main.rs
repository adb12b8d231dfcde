use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use shardlot::console::{self, ConsoleCommand};
use shardlot::{
    Coordinator, CoordinatorConfig, DEFAULT_PORT, NodeAddress, NodeConfig, NodeService, ShardSet,
    TcpDirectory,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "shardlot")]
#[command(about = "Self-forming node arrays: run a query service or a node")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the query service with an operator console on stdin
    Coordinator {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = DEFAULT_PORT)]
        port: u16,
        /// Required non-core roles, comma separated
        #[arg(long, value_delimiter = ',')]
        roles: Vec<String>,
        #[arg(long, default_value_t = 5000)]
        call_timeout_ms: u64,
    },
    /// Run a node that registers with a query service
    Node {
        /// Query service address, host:port
        #[arg(long)]
        coordinator: String,
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = DEFAULT_PORT)]
        port: u16,
        /// Roles this node has local behavior for, comma separated
        #[arg(long, value_delimiter = ',')]
        roles: Vec<String>,
        #[arg(long, default_value_t = 7000)]
        grace_ms: u64,
        #[arg(long, default_value_t = 4000)]
        interval_ms: u64,
        #[arg(long, default_value_t = 3000)]
        call_timeout_ms: u64,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let outcome = match cli.command {
        Command::Coordinator {
            host,
            port,
            roles,
            call_timeout_ms,
        } => {
            let config = CoordinatorConfig::new()
                .host(&host)
                .port(port)
                .call_timeout(Duration::from_millis(call_timeout_ms));
            run_coordinator(config, roles).await
        }
        Command::Node {
            coordinator,
            host,
            port,
            roles,
            grace_ms,
            interval_ms,
            call_timeout_ms,
        } => match coordinator.parse::<NodeAddress>() {
            Ok(coordinator) => {
                let config = NodeConfig::new(coordinator)
                    .host(&host)
                    .port(port)
                    .health_grace(Duration::from_millis(grace_ms))
                    .health_interval(Duration::from_millis(interval_ms))
                    .call_timeout(Duration::from_millis(call_timeout_ms));
                run_node(config, roles).await
            }
            Err(e) => Err(e).context("invalid --coordinator"),
        },
    };

    let code = match outcome {
        Ok(()) => 0,
        Err(e) => {
            error!("{:#}", e);
            1
        }
    };
    std::process::exit(code);
}

async fn run_coordinator(config: CoordinatorConfig, roles: Vec<String>) -> Result<()> {
    let shards = ShardSet::from_roles(roles).context("invalid --roles")?;
    let directory = Arc::new(TcpDirectory::with_call_timeout(config.call_timeout));
    let coordinator = Coordinator::start(config, directory, shards)
        .await
        .context("unable to start query service")?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = coordinator.stopped() => break,
            line = lines.next_line() => {
                let Some(line) = line.context("reading console")? else {
                    info!("Console closed; query service keeps running");
                    coordinator.stopped().await;
                    break;
                };
                match ConsoleCommand::parse(&line) {
                    Ok(Some(command)) => {
                        let stop = command.is_stop();
                        print!("{}", console::execute(&coordinator, command).await);
                        if stop {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => println!("{}", e),
                }
            }
        }
    }
    Ok(())
}

async fn run_node(config: NodeConfig, roles: Vec<String>) -> Result<()> {
    let shards = ShardSet::from_roles(roles).context("invalid --roles")?;
    let directory = Arc::new(TcpDirectory::with_call_timeout(config.call_timeout));
    let node = NodeService::launch(config, directory, shards)
        .await
        .context("node failed to start")?;

    tokio::select! {
        _ = node.terminated() => info!("Node exiting"),
        _ = tokio::signal::ctrl_c() => node.terminate("Interrupted").await,
    }
    Ok(())
}
