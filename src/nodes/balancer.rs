//! Concurrency-bounded node selection
//!
//! Picks the least-loaded online node of a role, capping in-flight tasks per
//! node, and parks callers when every candidate is saturated. Liveness
//! depends on every successful acquire being paired with exactly one release.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use tokio::sync::oneshot;

use super::registry::SharedNodeRegistry;
use super::types::{NodeRole, RegisteredNode};
use crate::{Error, Result};

/// Default maximum concurrent in-flight tasks routed to one node
pub const DEFAULT_MAX_TASKS_PER_NODE: usize = 2;

#[derive(Debug, Default)]
struct BalancerState {
    /// In-flight task count per node id
    active: HashMap<String, usize>,
    /// FIFO of parked callers per role; a waiter whose receiver was dropped
    /// is skipped at wake time
    waiters: HashMap<NodeRole, VecDeque<oneshot::Sender<()>>>,
}

/// Load balancer over the node registry.
///
/// The inner mutex is only ever held for map lookups, never across an await,
/// so `release` stays synchronous and safe to call from a `Drop` impl.
#[derive(Debug)]
pub struct NodeBalancer {
    registry: SharedNodeRegistry,
    state: Mutex<BalancerState>,
    max_per_node: usize,
}

impl NodeBalancer {
    /// Create a balancer over a shared registry with a per-node cap
    #[must_use]
    pub fn new(registry: SharedNodeRegistry, max_per_node: usize) -> Self {
        Self {
            registry,
            state: Mutex::new(BalancerState::default()),
            max_per_node: max_per_node.max(1),
        }
    }

    /// Acquire a node of `role`, excluding ids that already failed during the
    /// current logical call.
    ///
    /// Selection is least-loaded-first with id as the tiebreak, so a newly
    /// recovered idle node is preferred over a busy one. When every candidate
    /// is at capacity the caller parks on the role's FIFO queue and re-runs
    /// selection after the next release.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NodeUnavailable`] when no online, non-excluded node
    /// of the role exists; an empty pool fails fast rather than blocking.
    pub async fn acquire(
        &self,
        role: NodeRole,
        excluded: &HashSet<String>,
    ) -> Result<RegisteredNode> {
        loop {
            let mut candidates: Vec<RegisteredNode> = {
                let mut registry = self.registry.lock().await;
                registry
                    .available_nodes(role)
                    .into_iter()
                    .filter(|n| !excluded.contains(&n.id))
                    .collect()
            };

            if candidates.is_empty() {
                return Err(Error::NodeUnavailable(role));
            }

            let wait = {
                let mut state = self.state.lock().expect("balancer state poisoned");
                candidates.sort_by(|a, b| {
                    let load_a = state.active.get(&a.id).copied().unwrap_or(0);
                    let load_b = state.active.get(&b.id).copied().unwrap_or(0);
                    load_a.cmp(&load_b).then_with(|| a.id.cmp(&b.id))
                });

                let pick = candidates.into_iter().find(|n| {
                    state.active.get(&n.id).copied().unwrap_or(0) < self.max_per_node
                });

                if let Some(node) = pick {
                    // check and increment under one lock, the cap cannot be
                    // raced past
                    *state.active.entry(node.id.clone()).or_insert(0) += 1;
                    return Ok(node);
                }

                let (tx, rx) = oneshot::channel();
                state.waiters.entry(role).or_default().push_back(tx);
                rx
            };

            tracing::debug!(role = %role, "all nodes at capacity, waiting for a slot");
            // Err means the balancer dropped the sender; re-run selection
            // either way, the registry may have changed.
            let _ = wait.await;
        }
    }

    /// Release a node's slot and wake the oldest live waiter on the role
    pub fn release(&self, role: NodeRole, node_id: &str) {
        let mut state = self.state.lock().expect("balancer state poisoned");
        if let Some(count) = state.active.get_mut(node_id) {
            *count = count.saturating_sub(1);
        }

        if let Some(queue) = state.waiters.get_mut(&role) {
            // skip waiters whose caller gave up (receiver dropped), so an
            // abandoned queue entry cannot swallow the wake-up
            while let Some(tx) = queue.pop_front() {
                if tx.send(()).is_ok() {
                    break;
                }
            }
        }
    }

    /// Current in-flight count for a node
    #[must_use]
    pub fn active_count(&self, node_id: &str) -> usize {
        let state = self.state.lock().expect("balancer state poisoned");
        state.active.get(node_id).copied().unwrap_or(0)
    }

    /// Per-node cap this balancer enforces
    #[must_use]
    pub const fn max_per_node(&self) -> usize {
        self.max_per_node
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::super::registry::NodeRegistry;
    use super::super::types::NodeRegistration;
    use super::*;

    const STALENESS: Duration = Duration::from_secs(15);

    fn registry_with_nodes(nodes: &[(&str, NodeRole)]) -> SharedNodeRegistry {
        let mut registry = NodeRegistry::new(STALENESS);
        for (id, role) in nodes {
            registry.register(NodeRegistration {
                id: Some((*id).to_string()),
                name: (*id).to_string(),
                role: *role,
                base_url: format!("http://127.0.0.1:0/{id}"),
                location: None,
            });
        }
        registry.shared()
    }

    #[tokio::test]
    async fn least_loaded_node_wins() {
        let registry =
            registry_with_nodes(&[("a", NodeRole::Conversion), ("b", NodeRole::Conversion)]);
        let balancer = NodeBalancer::new(registry, 2);
        let none = HashSet::new();

        let first = balancer.acquire(NodeRole::Conversion, &none).await.unwrap();
        assert_eq!(first.id, "a"); // id tiebreak at equal load

        let second = balancer.acquire(NodeRole::Conversion, &none).await.unwrap();
        assert_eq!(second.id, "b"); // a now has load 1
    }

    #[tokio::test]
    async fn empty_role_fails_fast() {
        let registry = registry_with_nodes(&[("a", NodeRole::Conversion)]);
        let balancer = NodeBalancer::new(registry, 2);

        let err = balancer
            .acquire(NodeRole::Streaming, &HashSet::new())
            .await
            .unwrap_err();
        assert!(err.is_unavailable());
    }

    #[tokio::test]
    async fn fully_excluded_role_fails_fast() {
        let registry = registry_with_nodes(&[("a", NodeRole::Conversion)]);
        let balancer = NodeBalancer::new(registry, 2);

        let excluded: HashSet<String> = ["a".to_string()].into();
        let err = balancer
            .acquire(NodeRole::Conversion, &excluded)
            .await
            .unwrap_err();
        assert!(err.is_unavailable());
    }

    #[tokio::test]
    async fn saturated_role_blocks_until_release() {
        let registry = registry_with_nodes(&[("a", NodeRole::Conversion)]);
        let balancer = Arc::new(NodeBalancer::new(registry, 1));
        let none = HashSet::new();

        let held = balancer.acquire(NodeRole::Conversion, &none).await.unwrap();
        assert_eq!(balancer.active_count("a"), 1);

        let waiter = {
            let balancer = balancer.clone();
            tokio::spawn(async move {
                balancer
                    .acquire(NodeRole::Conversion, &HashSet::new())
                    .await
            })
        };

        // waiter must still be parked
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        balancer.release(NodeRole::Conversion, &held.id);
        let node = waiter.await.unwrap().unwrap();
        assert_eq!(node.id, "a");
        assert_eq!(balancer.active_count("a"), 1);
    }

    #[tokio::test]
    async fn waiters_wake_in_arrival_order() {
        let registry = registry_with_nodes(&[("a", NodeRole::Conversion)]);
        let balancer = Arc::new(NodeBalancer::new(registry, 1));
        let none = HashSet::new();

        let held = balancer.acquire(NodeRole::Conversion, &none).await.unwrap();

        // park two waiters, oldest first
        let first = {
            let balancer = balancer.clone();
            tokio::spawn(async move {
                balancer
                    .acquire(NodeRole::Conversion, &HashSet::new())
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = {
            let balancer = balancer.clone();
            tokio::spawn(async move {
                balancer
                    .acquire(NodeRole::Conversion, &HashSet::new())
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!first.is_finished());
        assert!(!second.is_finished());

        // one release serves only the oldest waiter
        balancer.release(NodeRole::Conversion, &held.id);
        let node = first.await.unwrap().unwrap();
        assert_eq!(node.id, "a");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!second.is_finished());

        balancer.release(NodeRole::Conversion, "a");
        let node = second.await.unwrap().unwrap();
        assert_eq!(node.id, "a");
        assert_eq!(balancer.active_count("a"), 1);
    }

    #[tokio::test]
    async fn cap_bounds_total_acquires() {
        let registry =
            registry_with_nodes(&[("a", NodeRole::Conversion), ("b", NodeRole::Conversion)]);
        let balancer = Arc::new(NodeBalancer::new(registry, 2));
        let none = HashSet::new();

        for _ in 0..4 {
            balancer.acquire(NodeRole::Conversion, &none).await.unwrap();
        }
        assert_eq!(balancer.active_count("a"), 2);
        assert_eq!(balancer.active_count("b"), 2);

        let fifth = {
            let balancer = balancer.clone();
            tokio::spawn(async move {
                balancer
                    .acquire(NodeRole::Conversion, &HashSet::new())
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!fifth.is_finished());

        balancer.release(NodeRole::Conversion, "b");
        let node = fifth.await.unwrap().unwrap();
        assert_eq!(node.id, "b");
    }

    #[tokio::test]
    async fn release_floors_at_zero() {
        let registry = registry_with_nodes(&[("a", NodeRole::Conversion)]);
        let balancer = NodeBalancer::new(registry, 1);

        balancer.release(NodeRole::Conversion, "a");
        assert_eq!(balancer.active_count("a"), 0);

        // state is intact, the next acquire still works
        let node = balancer
            .acquire(NodeRole::Conversion, &HashSet::new())
            .await
            .unwrap();
        assert_eq!(node.id, "a");
    }

    #[tokio::test]
    async fn abandoned_waiter_does_not_swallow_wakeup() {
        let registry = registry_with_nodes(&[("a", NodeRole::Conversion)]);
        let balancer = Arc::new(NodeBalancer::new(registry, 1));
        let none = HashSet::new();

        let held = balancer.acquire(NodeRole::Conversion, &none).await.unwrap();

        // first waiter gives up before any slot frees
        let abandoned = {
            let balancer = balancer.clone();
            tokio::spawn(async move {
                balancer
                    .acquire(NodeRole::Conversion, &HashSet::new())
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        abandoned.abort();
        let _ = abandoned.await;

        let second = {
            let balancer = balancer.clone();
            tokio::spawn(async move {
                balancer
                    .acquire(NodeRole::Conversion, &HashSet::new())
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        balancer.release(NodeRole::Conversion, &held.id);
        let node = second.await.unwrap().unwrap();
        assert_eq!(node.id, "a");
    }
}
