//! Dispatch client: executes one logical task against "a" worker of a role,
//! hiding the node pool and its faults from the caller.
//!
//! Transport-level failures (connection refused, reset, timeout) demote the
//! node and fail over to another; an explicit non-2xx from a reached worker
//! is surfaced verbatim and never retried elsewhere.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};

use super::balancer::NodeBalancer;
use super::registry::SharedNodeRegistry;
use super::types::{NodeRole, RegisteredNode};
use crate::config::DispatchConfig;
use crate::{Error, Result};

/// Header carrying the optional shared secret on node-to-node calls
pub const NODE_SECRET_HEADER: &str = "x-node-secret";

/// Longest rejection body preserved in error messages
const MAX_REJECTION_BODY: usize = 512;

/// Releases an acquired slot on every exit path, including panics.
/// `NodeBalancer::release` is synchronous, so the drop needs no runtime.
#[derive(Debug)]
struct SlotGuard {
    balancer: Arc<NodeBalancer>,
    role: NodeRole,
    node_id: String,
}

impl SlotGuard {
    fn new(balancer: Arc<NodeBalancer>, role: NodeRole, node_id: String) -> Self {
        Self {
            balancer,
            role,
            node_id,
        }
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.balancer.release(self.role, &self.node_id);
    }
}

/// Why one attempt against one node failed
enum AttemptError {
    /// The worker process itself is unreachable; demote and fail over
    Transport(reqwest::Error),
    /// The task failed on its own terms; surface as-is, no failover
    Fatal(Error),
}

/// A live streamed response from a worker.
///
/// The node's concurrency slot stays held for the stream's full lifetime and
/// is released when the byte stream completes, errors, or is dropped.
#[derive(Debug)]
pub struct NodeStream {
    response: reqwest::Response,
    node_id: String,
    guard: SlotGuard,
}

impl NodeStream {
    /// Id of the node serving this stream
    #[must_use]
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// HTTP status of the worker's response
    #[must_use]
    pub fn status(&self) -> u16 {
        self.response.status().as_u16()
    }

    /// Content type declared by the worker, if any
    #[must_use]
    pub fn content_type(&self) -> Option<String> {
        self.response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string)
    }

    /// Content length declared by the worker, if any
    #[must_use]
    pub fn content_length(&self) -> Option<u64> {
        self.response.content_length()
    }

    /// Consume into a byte stream suitable for relaying onward.
    ///
    /// The slot guard travels inside the stream and releases the node when
    /// the stream is dropped.
    pub fn into_byte_stream(
        self,
    ) -> impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static {
        let guard = self.guard;
        self.response.bytes_stream().map(move |chunk| {
            let _ = &guard;
            chunk
        })
    }
}

/// Client for dispatching tasks to registered workers with failover
#[derive(Debug, Clone)]
pub struct NodeClient {
    registry: SharedNodeRegistry,
    balancer: Arc<NodeBalancer>,
    http: reqwest::Client,
    shared_secret: Option<String>,
    call_timeout: Duration,
}

impl NodeClient {
    /// Create a client over a shared registry and balancer
    #[must_use]
    pub fn new(
        registry: SharedNodeRegistry,
        balancer: Arc<NodeBalancer>,
        config: &DispatchConfig,
    ) -> Self {
        Self {
            registry,
            balancer,
            http: reqwest::Client::new(),
            shared_secret: config.shared_secret.clone(),
            call_timeout: config.call_timeout,
        }
    }

    /// Dispatch a buffered JSON task with the default timeout
    ///
    /// # Errors
    ///
    /// [`Error::NodeUnavailable`] when the role's pool is exhausted,
    /// [`Error::TaskRejected`] when a reached worker returned non-2xx.
    pub async fn call(
        &self,
        role: NodeRole,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        self.call_with_timeout(role, path, body, self.call_timeout)
            .await
    }

    /// Dispatch a buffered JSON task with an explicit timeout.
    ///
    /// Bounded failover loop: each transport failure marks the node offline,
    /// adds it to the attempt's excluded set and re-acquires. The attempt
    /// count is capped at the role's online node count as seen at entry, so
    /// the call terminates even if the registry changes mid-flight.
    ///
    /// # Errors
    ///
    /// See [`Self::call`].
    pub async fn call_with_timeout(
        &self,
        role: NodeRole,
        path: &str,
        body: &serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value> {
        let mut attempted: HashSet<String> = HashSet::new();
        let max_attempts = self.online_count(role).await.max(1);

        for _ in 0..max_attempts {
            let node = self.balancer.acquire(role, &attempted).await?;
            let guard = SlotGuard::new(self.balancer.clone(), role, node.id.clone());

            let outcome = self.send_json(&node, path, body, timeout).await;
            drop(guard);

            match outcome {
                Ok(value) => return Ok(value),
                Err(AttemptError::Fatal(err)) => return Err(err),
                Err(AttemptError::Transport(err)) => {
                    self.demote(&node, &err).await;
                    attempted.insert(node.id);
                }
            }
        }

        Err(Error::NodeUnavailable(role))
    }

    /// Open a streamed response from a worker, with the same
    /// acquisition/failover contract as [`Self::call`].
    ///
    /// The returned [`NodeStream`] holds the node's slot until the stream is
    /// consumed or dropped; there is no overall timeout since the stream's
    /// lifetime is the caller's to manage.
    ///
    /// # Errors
    ///
    /// See [`Self::call`].
    pub async fn open_stream(
        &self,
        role: NodeRole,
        method: reqwest::Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<NodeStream> {
        let mut attempted: HashSet<String> = HashSet::new();
        let max_attempts = self.online_count(role).await.max(1);

        for _ in 0..max_attempts {
            let node = self.balancer.acquire(role, &attempted).await?;
            let guard = SlotGuard::new(self.balancer.clone(), role, node.id.clone());

            match self.send_stream(&method, &node, path, body).await {
                Ok(response) => {
                    return Ok(NodeStream {
                        response,
                        node_id: node.id,
                        guard,
                    });
                }
                Err(AttemptError::Fatal(err)) => return Err(err),
                Err(AttemptError::Transport(err)) => {
                    drop(guard);
                    self.demote(&node, &err).await;
                    attempted.insert(node.id);
                }
            }
        }

        Err(Error::NodeUnavailable(role))
    }

    async fn online_count(&self, role: NodeRole) -> usize {
        let mut registry = self.registry.lock().await;
        registry.available_nodes(role).len()
    }

    async fn demote(&self, node: &RegisteredNode, err: &reqwest::Error) {
        tracing::warn!(
            node_id = %node.id,
            node_name = %node.name,
            error = %err,
            "transport failure, marking node offline and failing over"
        );
        self.registry.lock().await.mark_offline(&node.id);
    }

    fn request(
        &self,
        method: reqwest::Method,
        node: &RegisteredNode,
        path: &str,
    ) -> reqwest::RequestBuilder {
        let url = format!("{}{}", node.base_url.trim_end_matches('/'), path);
        let mut request = self.http.request(method, url);
        if let Some(secret) = &self.shared_secret {
            request = request.header(NODE_SECRET_HEADER, secret);
        }
        request
    }

    async fn send_json(
        &self,
        node: &RegisteredNode,
        path: &str,
        body: &serde_json::Value,
        timeout: Duration,
    ) -> std::result::Result<serde_json::Value, AttemptError> {
        let response = self
            .request(reqwest::Method::POST, node, path)
            .json(body)
            .timeout(timeout)
            .send()
            .await
            .map_err(AttemptError::Transport)?;

        let response = Self::check_status(response).await?;
        // the worker answered 2xx; a malformed body is the task's problem,
        // not grounds for failover
        response
            .json()
            .await
            .map_err(|e| AttemptError::Fatal(Error::Http(e)))
    }

    async fn send_stream(
        &self,
        method: &reqwest::Method,
        node: &RegisteredNode,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> std::result::Result<reqwest::Response, AttemptError> {
        let mut request = self.request(method.clone(), node, path);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await.map_err(AttemptError::Transport)?;
        Self::check_status(response).await
    }

    async fn check_status(
        response: reqwest::Response,
    ) -> std::result::Result<reqwest::Response, AttemptError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let mut message = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown error".to_string());
        if message.len() > MAX_REJECTION_BODY {
            message = message.chars().take(MAX_REJECTION_BODY).collect();
        }
        Err(AttemptError::Fatal(Error::TaskRejected {
            status: status.as_u16(),
            message,
        }))
    }
}
