//! In-memory node registry with lazy staleness evaluation

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::types::{
    NodeMetrics, NodeRegistration, NodeRole, NodeStatus, RegisteredNode, compute_status,
};

/// Shared registry handle used across API handlers and the dispatch client
pub type SharedNodeRegistry = Arc<Mutex<NodeRegistry>>;

/// Authoritative map of known workers and their last-reported health.
///
/// Status is recomputed on every read from heartbeat recency; a node whose
/// heartbeat has gone stale is flipped to offline as a side effect of the
/// read. Nodes are never deleted, an unreachable node stays offline until it
/// re-registers or heartbeats again.
#[derive(Debug)]
pub struct NodeRegistry {
    nodes: HashMap<String, RegisteredNode>,
    staleness: Duration,
}

impl NodeRegistry {
    /// Create an empty registry with the given staleness threshold
    #[must_use]
    pub fn new(staleness: Duration) -> Self {
        Self {
            nodes: HashMap::new(),
            staleness,
        }
    }

    /// Wrap a registry for sharing across tasks
    #[must_use]
    pub fn shared(self) -> SharedNodeRegistry {
        Arc::new(Mutex::new(self))
    }

    /// Register a worker, inserting or updating its record.
    ///
    /// Idempotent on id: re-registering refreshes address and metadata while
    /// keeping previously reported metrics and the prior status. A demoted
    /// node stays offline until its next heartbeat; only a first
    /// registration starts out online.
    pub fn register(&mut self, registration: NodeRegistration) -> RegisteredNode {
        let id = registration
            .id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let existing = self.nodes.get(&id);
        let status = existing.map_or(NodeStatus::Online, |n| n.status);
        let metrics = existing.and_then(|n| n.metrics.clone());

        let node = RegisteredNode {
            id: id.clone(),
            name: registration.name,
            role: registration.role,
            base_url: registration.base_url,
            location: registration.location,
            status,
            last_heartbeat: Utc::now(),
            metrics,
        };
        self.nodes.insert(id, node.clone());
        node
    }

    /// Record a liveness signal from a worker.
    ///
    /// Returns `None` for an unknown id with no side effect; there is no
    /// implicit re-registration. A heartbeat without metrics still proves
    /// liveness and keeps the prior metrics.
    pub fn heartbeat(
        &mut self,
        id: &str,
        metrics: Option<NodeMetrics>,
    ) -> Option<RegisteredNode> {
        let node = self.nodes.get_mut(id)?;
        node.status = NodeStatus::Online;
        node.last_heartbeat = Utc::now();
        if let Some(metrics) = metrics {
            node.metrics = Some(metrics);
        }
        Some(node.clone())
    }

    /// Immediately downgrade a node to offline, bypassing the staleness
    /// timer. Used by the dispatch client when a transport failure shows the
    /// worker process itself is unreachable.
    pub fn mark_offline(&mut self, id: &str) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.status = NodeStatus::Offline;
        }
    }

    /// Get a node by id without triggering a staleness sweep
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&RegisteredNode> {
        self.nodes.get(id)
    }

    /// Snapshot of all nodes after staleness evaluation
    pub fn list_nodes(&mut self) -> Vec<RegisteredNode> {
        self.list_nodes_at(Utc::now())
    }

    /// Snapshot of all nodes, evaluating staleness against an explicit clock
    pub fn list_nodes_at(&mut self, now: DateTime<Utc>) -> Vec<RegisteredNode> {
        self.sweep(now);
        let mut nodes: Vec<RegisteredNode> = self.nodes.values().cloned().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }

    /// Online nodes of a role, after staleness evaluation
    pub fn available_nodes(&mut self, role: NodeRole) -> Vec<RegisteredNode> {
        self.available_nodes_at(role, Utc::now())
    }

    /// Online nodes of a role, evaluating staleness against an explicit clock
    pub fn available_nodes_at(
        &mut self,
        role: NodeRole,
        now: DateTime<Utc>,
    ) -> Vec<RegisteredNode> {
        self.list_nodes_at(now)
            .into_iter()
            .filter(|n| n.role == role && n.status == NodeStatus::Online)
            .collect()
    }

    /// Number of registered nodes
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn sweep(&mut self, now: DateTime<Utc>) {
        for node in self.nodes.values_mut() {
            node.status = compute_status(now, node.last_heartbeat, node.status, self.staleness);
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;

    use super::*;

    const STALENESS: Duration = Duration::from_secs(15);

    fn sample_registration(name: &str, role: NodeRole, base_url: &str) -> NodeRegistration {
        NodeRegistration {
            id: None,
            name: name.to_string(),
            role,
            base_url: base_url.to_string(),
            location: Some("local".to_string()),
        }
    }

    #[test]
    fn register_generates_id_and_comes_up_online() {
        let mut registry = NodeRegistry::new(STALENESS);
        let node = registry.register(sample_registration(
            "conv-1",
            NodeRole::Conversion,
            "http://10.0.0.1:4001",
        ));

        assert!(!node.id.is_empty());
        assert_eq!(node.status, NodeStatus::Online);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn reregister_same_id_updates_base_url_once() {
        let mut registry = NodeRegistry::new(STALENESS);
        let mut registration =
            sample_registration("conv-1", NodeRole::Conversion, "http://10.0.0.1:4001");
        registration.id = Some("node-a".to_string());
        registry.register(registration.clone());

        registration.base_url = "http://10.0.0.2:4001".to_string();
        registry.register(registration);

        assert_eq!(registry.len(), 1);
        let node = registry.get("node-a").unwrap();
        assert_eq!(node.base_url, "http://10.0.0.2:4001");
    }

    #[test]
    fn heartbeat_unknown_id_is_not_found() {
        let mut registry = NodeRegistry::new(STALENESS);
        assert!(registry.heartbeat("ghost", None).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn heartbeat_without_metrics_keeps_prior_metrics() {
        let mut registry = NodeRegistry::new(STALENESS);
        let node = registry.register(sample_registration(
            "conv-1",
            NodeRole::Conversion,
            "http://10.0.0.1:4001",
        ));

        let metrics = NodeMetrics {
            cpu: Some(42.0),
            tasks: Some(1),
            ..NodeMetrics::default()
        };
        registry.heartbeat(&node.id, Some(metrics.clone()));
        let updated = registry.heartbeat(&node.id, None).unwrap();

        assert_eq!(updated.metrics, Some(metrics));
        assert_eq!(updated.status, NodeStatus::Online);
    }

    #[test]
    fn stale_node_flips_offline_on_read() {
        let mut registry = NodeRegistry::new(STALENESS);
        let node = registry.register(sample_registration(
            "conv-1",
            NodeRole::Conversion,
            "http://10.0.0.1:4001",
        ));

        let later = Utc::now() + ChronoDuration::seconds(16);
        let nodes = registry.list_nodes_at(later);
        assert_eq!(nodes[0].status, NodeStatus::Offline);
        assert!(registry.available_nodes_at(NodeRole::Conversion, later).is_empty());

        // a fresh heartbeat brings it back
        registry.heartbeat(&node.id, None);
        assert_eq!(registry.available_nodes(NodeRole::Conversion).len(), 1);
    }

    #[test]
    fn available_nodes_filters_by_role() {
        let mut registry = NodeRegistry::new(STALENESS);
        registry.register(sample_registration(
            "conv-1",
            NodeRole::Conversion,
            "http://10.0.0.1:4001",
        ));
        registry.register(sample_registration(
            "stream-1",
            NodeRole::Streaming,
            "http://10.0.0.2:4002",
        ));

        let conversion = registry.available_nodes(NodeRole::Conversion);
        assert_eq!(conversion.len(), 1);
        assert_eq!(conversion[0].name, "conv-1");
    }

    #[test]
    fn mark_offline_bypasses_staleness_timer() {
        let mut registry = NodeRegistry::new(STALENESS);
        let node = registry.register(sample_registration(
            "conv-1",
            NodeRole::Conversion,
            "http://10.0.0.1:4001",
        ));

        registry.mark_offline(&node.id);
        assert!(registry.available_nodes(NodeRole::Conversion).is_empty());
        assert_eq!(registry.get(&node.id).unwrap().status, NodeStatus::Offline);
    }

    #[test]
    fn reregister_keeps_offline_status_until_heartbeat() {
        let mut registry = NodeRegistry::new(STALENESS);
        let mut registration =
            sample_registration("conv-1", NodeRole::Conversion, "http://10.0.0.1:4001");
        registration.id = Some("node-a".to_string());
        registry.register(registration.clone());
        registry.mark_offline("node-a");

        registration.base_url = "http://10.0.0.2:4001".to_string();
        let node = registry.register(registration);

        assert_eq!(node.status, NodeStatus::Offline);
        assert_eq!(node.base_url, "http://10.0.0.2:4001");
        assert!(registry.available_nodes(NodeRole::Conversion).is_empty());

        registry.heartbeat("node-a", None);
        assert_eq!(registry.get("node-a").unwrap().status, NodeStatus::Online);
    }
}
