//! Coordinator HTTP API
//!
//! Consumed by worker processes (registration, heartbeats) and by internal
//! application code (media task dispatch); never by end users directly.

pub mod health;
pub mod media;
pub mod nodes;

use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::Result;
use crate::config::{ApiServerConfig, DispatchConfig};
use crate::nodes::{NodeBalancer, NodeClient, NodeRegistry, SharedNodeRegistry};

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub registry: SharedNodeRegistry,
    pub balancer: Arc<NodeBalancer>,
    pub client: NodeClient,
}

impl ApiState {
    /// Wire up registry, balancer and dispatch client from one config
    #[must_use]
    pub fn new(config: &DispatchConfig) -> Self {
        let registry = NodeRegistry::new(config.staleness_threshold).shared();
        let balancer = Arc::new(NodeBalancer::new(
            registry.clone(),
            config.max_tasks_per_node,
        ));
        let client = NodeClient::new(registry.clone(), balancer.clone(), config);
        Self {
            registry,
            balancer,
            client,
        }
    }
}

/// Build the coordinator router
pub fn router(state: ApiState) -> Router {
    Router::new()
        .merge(health::router())
        .nest("/nodes", nodes::router(state.clone()))
        .nest("/media", media::router(state))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

/// Serve the coordinator API until the process exits
///
/// # Errors
///
/// Returns error if the listener cannot bind or the server fails.
pub async fn serve(state: ApiState, config: &ApiServerConfig) -> Result<()> {
    let app = router(state);
    let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
    tracing::info!(port = config.port, "coordinator API listening");
    axum::serve(listener, app).await?;
    Ok(())
}
