//! Media task dispatch endpoints
//!
//! Thin glue between the application surface and the worker pool: conversion
//! requests go to a conversion-role worker as buffered calls, playback goes
//! through a streaming-role worker as a relayed byte stream.

use axum::{
    Json, Router,
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;

use super::ApiState;
use crate::Error;
use crate::nodes::NodeRole;

/// Error message envelope
#[derive(Serialize)]
struct MessageResponse {
    message: String,
}

/// Build media dispatch routes
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/convert/audio", post(convert_audio))
        .route("/convert/video", post(convert_video))
        .route("/{file_id}/stream", get(stream_media))
        .with_state(state)
}

/// Map a dispatch error onto the caller-facing status.
///
/// Pool exhaustion is an infrastructure condition (503), distinct from the
/// task's own outcome, which passes through with the worker's status.
fn dispatch_error(err: &Error) -> Response {
    let (status, message) = match err {
        Error::NodeUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
        Error::TaskRejected { status, message } => (
            StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY),
            message.clone(),
        ),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    };
    (status, Json(MessageResponse { message })).into_response()
}

/// Dispatch an audio conversion task to a conversion worker
async fn convert_audio(
    State(state): State<ApiState>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    dispatch_conversion(&state, "/tasks/convert/audio", &body).await
}

/// Dispatch a video conversion task to a conversion worker
async fn convert_video(
    State(state): State<ApiState>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    dispatch_conversion(&state, "/tasks/convert/video", &body).await
}

async fn dispatch_conversion(
    state: &ApiState,
    task_path: &str,
    body: &serde_json::Value,
) -> Response {
    match state.client.call(NodeRole::Conversion, task_path, body).await {
        Ok(payload) => (StatusCode::CREATED, Json(payload)).into_response(),
        Err(err) => dispatch_error(&err),
    }
}

/// Relay a media file's byte stream from a streaming worker to the caller
async fn stream_media(State(state): State<ApiState>, Path(file_id): Path<String>) -> Response {
    let path = format!("/tasks/stream/{file_id}");
    match state
        .client
        .open_stream(NodeRole::Streaming, reqwest::Method::GET, &path, None)
        .await
    {
        Ok(stream) => {
            let mut headers = HeaderMap::new();
            if let Some(content_type) = stream.content_type()
                && let Ok(value) = header::HeaderValue::from_str(&content_type)
            {
                headers.insert(header::CONTENT_TYPE, value);
            }
            if let Some(length) = stream.content_length() {
                headers.insert(header::CONTENT_LENGTH, header::HeaderValue::from(length));
            }
            (headers, Body::from_stream(stream.into_byte_stream())).into_response()
        }
        Err(err) => dispatch_error(&err),
    }
}
