//! Node registry types for worker dispatch

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Category of work a node performs; pools are partitioned by role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Coordinator,
    Conversion,
    Streaming,
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Coordinator => "coordinator",
            Self::Conversion => "conversion",
            Self::Streaming => "streaming",
        };
        f.write_str(s)
    }
}

/// Derived liveness state of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Online,
    Warning,
    Offline,
}

/// Advisory metrics reported with heartbeats; never consulted for scheduling
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeMetrics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ram: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tasks: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_seconds: Option<f64>,
}

/// Registration message from a worker process
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRegistration {
    /// Stable id; generated when absent
    pub id: Option<String>,
    pub name: String,
    pub role: NodeRole,
    pub base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// Identity and health record for one registered worker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredNode {
    pub id: String,
    pub name: String,
    pub role: NodeRole,
    pub base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub status: NodeStatus,
    pub last_heartbeat: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<NodeMetrics>,
}

/// Evaluate a node's effective status at `now`.
///
/// A node whose last heartbeat is older than `staleness` is offline no matter
/// what it last declared; otherwise the declared status stands. Pure so it is
/// testable without timers.
#[must_use]
pub fn compute_status(
    now: DateTime<Utc>,
    last_heartbeat: DateTime<Utc>,
    declared: NodeStatus,
    staleness: std::time::Duration,
) -> NodeStatus {
    let staleness = Duration::from_std(staleness).unwrap_or(Duration::MAX);
    if now - last_heartbeat > staleness {
        NodeStatus::Offline
    } else {
        declared
    }
}
