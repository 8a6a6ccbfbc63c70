//! Coordinator-facing side of a worker: registration and heartbeats

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::config::WorkerConfig;
use crate::nodes::{NODE_SECRET_HEADER, NodeMetrics, NodeRegistration};
use crate::{Error, Result};

/// Registers the worker with the coordinator and keeps it alive with
/// periodic heartbeats carrying advisory metrics
pub struct WorkerAgent {
    http: reqwest::Client,
    config: WorkerConfig,
    node_id: String,
    started: Instant,
    active_tasks: Arc<AtomicU64>,
}

impl WorkerAgent {
    /// Create an agent; `active_tasks` is the task surface's in-flight gauge
    #[must_use]
    pub fn new(config: WorkerConfig, node_id: String, active_tasks: Arc<AtomicU64>) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            node_id,
            started: Instant::now(),
            active_tasks,
        }
    }

    /// Stable id this worker registers under
    #[must_use]
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Register with the coordinator
    ///
    /// # Errors
    ///
    /// Returns error when the coordinator is unreachable or rejects the
    /// registration; callers log and retry via the heartbeat cycle.
    pub async fn register(&self) -> Result<()> {
        let registration = NodeRegistration {
            id: Some(self.node_id.clone()),
            name: self.config.node_name.clone(),
            role: self.config.role,
            base_url: self.config.advertise_url.clone(),
            location: self.config.location.clone(),
        };

        let response = self
            .coordinator_post("/nodes/register")
            .json(&registration)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Config(format!(
                "coordinator rejected registration with status {}",
                response.status()
            )));
        }

        tracing::info!(
            node_id = %self.node_id,
            role = %self.config.role,
            coordinator = %self.config.coordinator_url,
            "registered with coordinator"
        );
        Ok(())
    }

    /// Send one heartbeat; a 404 means the coordinator restarted and lost the
    /// registration, so re-register and try again on the next tick
    pub async fn heartbeat(&self) {
        let body = serde_json::json!({
            "id": self.node_id,
            "metrics": self.metrics(),
        });

        let result = self
            .coordinator_post("/nodes/heartbeat")
            .json(&body)
            .send()
            .await;

        match result {
            Ok(response) if response.status() == reqwest::StatusCode::NOT_FOUND => {
                tracing::warn!(node_id = %self.node_id, "coordinator lost our registration, re-registering");
                if let Err(err) = self.register().await {
                    tracing::warn!(error = %err, "re-registration failed");
                }
            }
            Ok(response) if !response.status().is_success() => {
                tracing::warn!(status = %response.status(), "heartbeat rejected");
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(error = %err, "heartbeat failed");
            }
        }
    }

    /// Register, then heartbeat forever on the configured interval
    pub async fn run(&self) {
        if let Err(err) = self.register().await {
            tracing::warn!(error = %err, "initial registration failed, will retry via heartbeat");
        }

        let mut interval = tokio::time::interval(self.config.heartbeat_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            self.heartbeat().await;
        }
    }

    fn metrics(&self) -> NodeMetrics {
        NodeMetrics {
            cpu: None,
            ram: None,
            tasks: Some(self.active_tasks.load(Ordering::Relaxed)),
            uptime_seconds: Some(self.started.elapsed().as_secs_f64()),
        }
    }

    fn coordinator_post(&self, path: &str) -> reqwest::RequestBuilder {
        let url = format!(
            "{}{}",
            self.config.coordinator_url.trim_end_matches('/'),
            path
        );
        let mut request = self.http.post(url);
        if let Some(secret) = &self.config.shared_secret {
            request = request.header(NODE_SECRET_HEADER, secret);
        }
        request
    }
}
