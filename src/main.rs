use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use mediamesh::api::{self, ApiState};
use mediamesh::{ApiServerConfig, DispatchConfig, NodeRole, WorkerConfig, worker};

/// Mediamesh - worker dispatch coordinator for media conversion and streaming
#[derive(Parser)]
#[command(name = "mediamesh", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the coordinator: node registry, load balancer and dispatch API
    Serve {
        /// Port to listen on
        #[arg(long, env = "MEDIAMESH_PORT", default_value = "3000")]
        port: u16,
    },
    /// Run a worker process that fronts the Conversion Engine
    Worker {
        /// Role this worker serves
        #[arg(long, env = "MEDIAMESH_WORKER_ROLE", value_parser = parse_role, default_value = "conversion")]
        role: NodeRole,

        /// Port the task surface listens on
        #[arg(long, env = "MEDIAMESH_WORKER_PORT", default_value = "4001")]
        port: u16,

        /// Coordinator base URL
        #[arg(long, env = "MEDIAMESH_COORDINATOR_URL", default_value = "http://localhost:3000")]
        coordinator_url: String,

        /// URL this worker advertises for inbound task calls; defaults to
        /// http://localhost:{port}
        #[arg(long, env = "MEDIAMESH_ADVERTISE_URL")]
        advertise_url: Option<String>,

        /// Stable node id; generated when absent
        #[arg(long, env = "MEDIAMESH_NODE_ID")]
        node_id: Option<String>,

        /// Human-readable node name
        #[arg(long, env = "MEDIAMESH_NODE_NAME", default_value = "conversion-node")]
        node_name: String,

        /// Informational location label
        #[arg(long, env = "MEDIAMESH_NODE_LOCATION", default_value = "local")]
        location: String,

        /// Seconds between heartbeats
        #[arg(long, env = "MEDIAMESH_HEARTBEAT_SECS", default_value = "5")]
        heartbeat_secs: u64,

        /// Conversion Engine base URL
        #[arg(long, env = "MEDIAMESH_ENGINE_URL", default_value = "http://localhost:5000")]
        engine_url: String,
    },
}

fn parse_role(s: &str) -> Result<NodeRole, String> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .map_err(|_| format!("unknown role '{s}', expected coordinator, conversion or streaming"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("mediamesh={default_level}"))),
        )
        .init();

    match cli.command {
        Command::Serve { port } => {
            let config = DispatchConfig::from_env();
            let state = ApiState::new(&config);
            api::serve(state, &ApiServerConfig { port }).await?;
        }
        Command::Worker {
            role,
            port,
            coordinator_url,
            advertise_url,
            node_id,
            node_name,
            location,
            heartbeat_secs,
            engine_url,
        } => {
            let config = WorkerConfig {
                coordinator_url,
                advertise_url: advertise_url
                    .unwrap_or_else(|| format!("http://localhost:{port}")),
                node_id,
                node_name,
                role,
                location: Some(location),
                port,
                heartbeat_interval: Duration::from_secs(heartbeat_secs.max(1)),
                engine_url,
                shared_secret: std::env::var("MEDIAMESH_NODE_SECRET").ok(),
            };
            worker::run(config).await?;
        }
    }

    Ok(())
}
