//! Configuration for mediamesh

use std::time::Duration;

use crate::nodes::NodeRole;

/// Default seconds since last heartbeat before a node is considered offline
pub const DEFAULT_STALENESS_SECS: u64 = 15;

/// Default per-request dispatch timeout
pub const DEFAULT_CALL_TIMEOUT_SECS: u64 = 60;

/// Default interval between worker heartbeats
pub const DEFAULT_HEARTBEAT_SECS: u64 = 5;

/// Dispatch subsystem configuration (registry, balancer, client)
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Maximum time since last heartbeat before a node is considered offline
    pub staleness_threshold: Duration,

    /// Maximum concurrent in-flight tasks routed to one node
    pub max_tasks_per_node: usize,

    /// Default timeout for buffered dispatch calls
    pub call_timeout: Duration,

    /// Shared secret for worker/coordinator calls (`x-node-secret` header)
    pub shared_secret: Option<String>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            staleness_threshold: Duration::from_secs(DEFAULT_STALENESS_SECS),
            max_tasks_per_node: crate::nodes::DEFAULT_MAX_TASKS_PER_NODE,
            call_timeout: Duration::from_secs(DEFAULT_CALL_TIMEOUT_SECS),
            shared_secret: None,
        }
    }
}

impl DispatchConfig {
    /// Build from environment variables, falling back to defaults.
    ///
    /// Reads `MEDIAMESH_STALENESS_SECS`, `MEDIAMESH_MAX_TASKS_PER_NODE`,
    /// `MEDIAMESH_CALL_TIMEOUT_SECS` and `MEDIAMESH_NODE_SECRET`.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            staleness_threshold: env_secs("MEDIAMESH_STALENESS_SECS")
                .unwrap_or(defaults.staleness_threshold),
            max_tasks_per_node: env_parse("MEDIAMESH_MAX_TASKS_PER_NODE")
                .map_or(defaults.max_tasks_per_node, |n: usize| n.max(1)),
            call_timeout: env_secs("MEDIAMESH_CALL_TIMEOUT_SECS")
                .unwrap_or(defaults.call_timeout),
            shared_secret: std::env::var("MEDIAMESH_NODE_SECRET").ok(),
        }
    }
}

/// Coordinator HTTP server configuration
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Port to listen on
    pub port: u16,
}

/// Worker process configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Coordinator base URL for registration and heartbeats
    pub coordinator_url: String,

    /// Address this worker advertises for inbound task calls
    pub advertise_url: String,

    /// Stable node id; generated when absent
    pub node_id: Option<String>,

    /// Human-readable node name
    pub node_name: String,

    /// Role this worker serves
    pub role: NodeRole,

    /// Informational location label
    pub location: Option<String>,

    /// Port the task surface listens on
    pub port: u16,

    /// Interval between heartbeats
    pub heartbeat_interval: Duration,

    /// Base URL of the Conversion Engine this worker fronts
    pub engine_url: String,

    /// Shared secret expected on inbound task calls and attached to
    /// coordinator-bound calls
    pub shared_secret: Option<String>,
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.parse().ok()
}

fn env_secs(key: &str) -> Option<Duration> {
    env_parse(key).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_deployment() {
        let config = DispatchConfig::default();
        assert_eq!(config.staleness_threshold, Duration::from_secs(15));
        assert_eq!(config.max_tasks_per_node, 2);
        assert_eq!(config.call_timeout, Duration::from_secs(60));
        assert!(config.shared_secret.is_none());
    }
}
