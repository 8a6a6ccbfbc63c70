//! Node registry API endpoints
//!
//! Workers call `/register` at startup and `/heartbeat` on a fixed interval;
//! `/status` exposes the full node list after staleness evaluation.

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use super::ApiState;
use crate::nodes::{NodeMetrics, NodeRegistration, NodeRole, RegisteredNode};

/// Registration request; required fields are validated here so a miss is a
/// 400 with a message rather than a deserialization rejection
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterBody {
    pub id: Option<String>,
    pub name: Option<String>,
    pub role: Option<NodeRole>,
    pub base_url: Option<String>,
    pub location: Option<String>,
}

/// Heartbeat request
#[derive(Debug, Deserialize)]
pub struct HeartbeatBody {
    pub id: Option<String>,
    pub metrics: Option<NodeMetrics>,
}

/// Single-node response envelope
#[derive(Serialize)]
pub struct NodeResponse {
    pub node: RegisteredNode,
}

/// Node list response envelope
#[derive(Serialize)]
pub struct NodeListResponse {
    pub nodes: Vec<RegisteredNode>,
}

/// Error message envelope
#[derive(Serialize)]
pub struct MessageResponse {
    pub message: String,
}

fn err(status: StatusCode, message: &str) -> (StatusCode, Json<MessageResponse>) {
    (
        status,
        Json(MessageResponse {
            message: message.to_string(),
        }),
    )
}

/// Build node registry routes
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/register", post(register_node))
        .route("/heartbeat", post(heartbeat))
        .route("/status", get(node_status))
        .with_state(state)
}

/// Register a worker node, inserting or updating its record
async fn register_node(
    State(state): State<ApiState>,
    Json(body): Json<RegisterBody>,
) -> Result<(StatusCode, Json<NodeResponse>), (StatusCode, Json<MessageResponse>)> {
    let (Some(name), Some(role), Some(base_url)) = (body.name, body.role, body.base_url) else {
        return Err(err(
            StatusCode::BAD_REQUEST,
            "name, role and baseUrl are required",
        ));
    };

    let registration = NodeRegistration {
        id: body.id,
        name,
        role,
        base_url,
        location: body.location,
    };

    let node = state.registry.lock().await.register(registration);
    tracing::info!(node_id = %node.id, node_name = %node.name, role = %node.role, "node registered");
    Ok((StatusCode::CREATED, Json(NodeResponse { node })))
}

/// Record a worker heartbeat; unknown ids are a 404 with no side effect
async fn heartbeat(
    State(state): State<ApiState>,
    Json(body): Json<HeartbeatBody>,
) -> Result<Json<NodeResponse>, (StatusCode, Json<MessageResponse>)> {
    let Some(id) = body.id else {
        return Err(err(StatusCode::BAD_REQUEST, "id is required"));
    };

    let node = state.registry.lock().await.heartbeat(&id, body.metrics);
    node.map(|node| Json(NodeResponse { node }))
        .ok_or_else(|| err(StatusCode::NOT_FOUND, "Node not registered"))
}

/// Full node list after staleness evaluation
async fn node_status(State(state): State<ApiState>) -> Json<NodeListResponse> {
    let nodes = state.registry.lock().await.list_nodes();
    Json(NodeListResponse { nodes })
}
