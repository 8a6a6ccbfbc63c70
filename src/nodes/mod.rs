//! Worker dispatch: node registry, load balancer and dispatch client
//!
//! Workers register over HTTP and prove liveness with heartbeats; the
//! balancer picks the least-loaded online node of a role under a per-node
//! concurrency cap, and the client performs the actual calls with automatic
//! failover when a worker turns out to be unreachable.

pub mod balancer;
pub mod client;
pub mod registry;
pub mod types;

pub use balancer::{DEFAULT_MAX_TASKS_PER_NODE, NodeBalancer};
pub use client::{NODE_SECRET_HEADER, NodeClient, NodeStream};
pub use registry::{NodeRegistry, SharedNodeRegistry};
pub use types::{
    NodeMetrics, NodeRegistration, NodeRole, NodeStatus, RegisteredNode, compute_status,
};
