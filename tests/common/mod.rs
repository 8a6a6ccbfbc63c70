//! Shared test utilities
#![allow(dead_code)]

use std::sync::Arc;

use mediamesh::{
    DispatchConfig, NodeBalancer, NodeClient, NodeRegistration, NodeRegistry, NodeRole,
    SharedNodeRegistry,
};

/// Registry, balancer and client wired together as the coordinator does
pub struct DispatchStack {
    pub registry: SharedNodeRegistry,
    pub balancer: Arc<NodeBalancer>,
    pub client: NodeClient,
}

#[must_use]
pub fn dispatch_stack(config: &DispatchConfig) -> DispatchStack {
    let registry = NodeRegistry::new(config.staleness_threshold).shared();
    let balancer = Arc::new(NodeBalancer::new(
        registry.clone(),
        config.max_tasks_per_node,
    ));
    let client = NodeClient::new(registry.clone(), balancer.clone(), config);
    DispatchStack {
        registry,
        balancer,
        client,
    }
}

/// Register a node with a fixed id
pub async fn register_node(
    registry: &SharedNodeRegistry,
    id: &str,
    role: NodeRole,
    base_url: &str,
) {
    registry.lock().await.register(NodeRegistration {
        id: Some(id.to_string()),
        name: id.to_string(),
        role,
        base_url: base_url.to_string(),
        location: None,
    });
}

/// Serve a router on an ephemeral loopback port, returning its base URL
pub async fn spawn_server(app: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind test listener");
    let addr = listener.local_addr().expect("listener has no local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("test server failed");
    });
    format!("http://{addr}")
}

/// A loopback URL with nothing listening on it; connections are refused
pub async fn dead_base_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind test listener");
    let addr = listener.local_addr().expect("listener has no local addr");
    drop(listener);
    format!("http://{addr}")
}
