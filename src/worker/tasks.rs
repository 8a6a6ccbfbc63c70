//! Worker task surface
//!
//! Task endpoints front the Conversion Engine, an external HTTP service that
//! does the actual transcoding. These routes are invoked exclusively through
//! the coordinator's dispatch client.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use axum::{
    Json, Router,
    body::Body,
    extract::{Path, Request, State},
    http::{HeaderMap, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;

use crate::config::WorkerConfig;
use crate::nodes::{NODE_SECRET_HEADER, NodeRole};

/// Shared state for the task surface
#[derive(Clone)]
pub struct TaskState {
    engine: reqwest::Client,
    engine_url: String,
    node_id: String,
    node_name: String,
    role: NodeRole,
    shared_secret: Option<String>,
    started: Instant,
    active_tasks: Arc<AtomicU64>,
}

impl TaskState {
    /// Build task state from worker config
    #[must_use]
    pub fn new(config: &WorkerConfig, node_id: String, active_tasks: Arc<AtomicU64>) -> Self {
        Self {
            engine: reqwest::Client::new(),
            engine_url: config.engine_url.trim_end_matches('/').to_string(),
            node_id,
            node_name: config.node_name.clone(),
            role: config.role,
            shared_secret: config.shared_secret.clone(),
            started: Instant::now(),
            active_tasks,
        }
    }
}

/// Error message envelope
#[derive(Serialize)]
struct MessageResponse {
    message: String,
}

fn err(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(MessageResponse {
            message: message.to_string(),
        }),
    )
        .into_response()
}

/// Decrements the in-flight gauge when a task finishes, however it finishes
struct TaskGauge(Arc<AtomicU64>);

impl TaskGauge {
    fn start(gauge: &Arc<AtomicU64>) -> Self {
        gauge.fetch_add(1, Ordering::Relaxed);
        Self(gauge.clone())
    }
}

impl Drop for TaskGauge {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Build the worker's task router
pub fn router(state: TaskState) -> Router {
    Router::new()
        .route("/tasks/convert/audio", post(convert_audio))
        .route("/tasks/convert/video", post(convert_video))
        .route("/tasks/stream/{file_id}", get(stream_file))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_secret,
        ))
        .route("/health", get(health))
        .with_state(state)
}

/// Reject task calls without the shared secret when one is configured;
/// `/health` stays open
async fn require_secret(
    State(state): State<TaskState>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(secret) = &state.shared_secret {
        let presented = request
            .headers()
            .get(NODE_SECRET_HEADER)
            .and_then(|v| v.to_str().ok());
        if presented != Some(secret.as_str()) {
            return err(StatusCode::UNAUTHORIZED, "Unauthorized node request");
        }
    }
    next.run(request).await
}

/// Node health payload, matching the coordinator's status records
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    node_id: String,
    name: String,
    role: NodeRole,
    status: &'static str,
    uptime_seconds: f64,
}

async fn health(State(state): State<TaskState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        node_id: state.node_id.clone(),
        name: state.node_name.clone(),
        role: state.role,
        status: "online",
        uptime_seconds: state.started.elapsed().as_secs_f64(),
    })
}

async fn convert_audio(
    State(state): State<TaskState>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    run_conversion(&state, "/convert/audio", body).await
}

async fn convert_video(
    State(state): State<TaskState>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    run_conversion(&state, "/convert/video", body).await
}

/// Validate the task payload, then forward it to the Conversion Engine and
/// pass its answer back unchanged
async fn run_conversion(state: &TaskState, engine_path: &str, body: serde_json::Value) -> Response {
    let file_id = body.get("fileId").and_then(|v| v.as_str());
    let target = body
        .get("options")
        .and_then(|o| o.get("targetFormat"))
        .and_then(|v| v.as_str());
    if file_id.is_none() || target.is_none() {
        return err(
            StatusCode::BAD_REQUEST,
            "fileId and targetFormat are required",
        );
    }

    let _gauge = TaskGauge::start(&state.active_tasks);
    let url = format!("{}{}", state.engine_url, engine_path);

    let response = match state.engine.post(url).json(&body).send().await {
        Ok(response) => response,
        Err(error) => {
            tracing::error!(node = %state.node_name, %error, "conversion engine unreachable");
            return err(StatusCode::BAD_GATEWAY, "Conversion engine unreachable");
        }
    };

    let status = response.status();
    match response.json::<serde_json::Value>().await {
        Ok(payload) => (status, Json(payload)).into_response(),
        Err(error) => {
            tracing::error!(node = %state.node_name, %error, "invalid engine response");
            err(StatusCode::BAD_GATEWAY, "Invalid conversion engine response")
        }
    }
}

/// Relay a file's byte stream from the engine's storage surface.
///
/// The in-flight gauge travels inside the relayed stream so the task counts
/// as active for the stream's full lifetime.
async fn stream_file(State(state): State<TaskState>, Path(file_id): Path<String>) -> Response {
    let gauge = TaskGauge::start(&state.active_tasks);
    let url = format!("{}/stream/{file_id}", state.engine_url);

    let response = match state.engine.get(url).send().await {
        Ok(response) => response,
        Err(error) => {
            tracing::error!(node = %state.node_name, %error, "conversion engine unreachable");
            return err(StatusCode::BAD_GATEWAY, "Conversion engine unreachable");
        }
    };

    let status = response.status();
    if !status.is_success() {
        return err(status, "File not available");
    }

    let mut headers = HeaderMap::new();
    if let Some(value) = response
        .headers()
        .get(header::CONTENT_TYPE)
        .cloned()
    {
        headers.insert(header::CONTENT_TYPE, value);
    }
    if let Some(length) = response.content_length() {
        headers.insert(header::CONTENT_LENGTH, header::HeaderValue::from(length));
    }

    let stream = futures::StreamExt::map(response.bytes_stream(), move |chunk| {
        let _ = &gauge;
        chunk
    });
    (headers, Body::from_stream(stream)).into_response()
}
