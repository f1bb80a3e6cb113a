use std::{path::PathBuf, process, sync::Arc};

use clap::{Parser, Subcommand};
use fleetbeat::{
    config::{dial_addr, ClientConfig, ServerConfig},
    connection::client::Client,
    registry::Registry,
    server::Server,
    telemetry::{SystemProbe, Telemetry},
    Result,
};
use tokio::{runtime, signal};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "fleetbeat", about = "Host heartbeat agent and collector")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Collect heartbeats from agents.
    Server {
        #[arg(long, default_value = "server.json")]
        config: PathBuf,
    },
    /// Push heartbeats to every configured router.
    Client {
        #[arg(long, default_value = "client.json")]
        config: PathBuf,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let rt = match runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(v) => v,
        Err(e) => {
            error!("[runtime] error: {}", e);
            process::exit(1);
        }
    };

    let result = rt.block_on(async {
        match args.command {
            Command::Server { config } => server(config).await,
            Command::Client { config } => client(config).await,
        }
    });

    if let Err(e) = result {
        error!("{}", e);
        process::exit(1);
    }
}

async fn server(path: PathBuf) -> Result<()> {
    let config = ServerConfig::load(&path)?;
    info!(
        http = %format!("{}:{}", config.http_host, config.http_port),
        "[server] config loaded from {}", path.display()
    );

    let registry = Arc::new(Registry::new());
    let running = Server::new(config, registry).bind().await?;

    signal::ctrl_c().await?;
    running.shutdown();
    Ok(())
}

async fn client(path: PathBuf) -> Result<()> {
    let config = ClientConfig::load(&path)?;
    info!("[client] routers {}", config.server_list());

    let telemetry: Arc<dyn Telemetry> = Arc::new(SystemProbe::new("client", &config.cluster, &config.domain));
    let mut clients: Vec<Client> = config.router_list
        .iter()
        .map(|addr| Client::new(dial_addr(addr), config.lifecycle, telemetry.clone()))
        .collect();
    for client in clients.iter_mut() {
        client.run();
    }

    signal::ctrl_c().await?;
    for client in clients.iter_mut() {
        client.disconnect().await;
        info!(sent = client.sent(), "[client] disconnected from {}", client.addr());
    }
    info!("[client] stopped");
    Ok(())
}
