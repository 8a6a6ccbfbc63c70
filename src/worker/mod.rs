//! Worker process: task surface plus coordinator registration/heartbeats

pub mod agent;
pub mod tasks;

use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use tokio::net::TcpListener;
use uuid::Uuid;

use crate::Result;
use crate::config::WorkerConfig;

pub use agent::WorkerAgent;
pub use tasks::TaskState;

/// Run a worker: register with the coordinator, heartbeat on the configured
/// interval and serve the task surface until the process exits
///
/// # Errors
///
/// Returns error if the task listener cannot bind or the server fails.
pub async fn run(config: WorkerConfig) -> Result<()> {
    let node_id = config
        .node_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let active_tasks = Arc::new(AtomicU64::new(0));

    let agent = WorkerAgent::new(config.clone(), node_id.clone(), active_tasks.clone());
    tokio::spawn(async move { agent.run().await });

    let state = TaskState::new(&config, node_id.clone(), active_tasks);
    let app = tasks::router(state);
    let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
    tracing::info!(
        node_id = %node_id,
        role = %config.role,
        port = config.port,
        "worker task surface listening"
    );
    axum::serve(listener, app).await?;
    Ok(())
}
