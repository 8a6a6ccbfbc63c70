//! Mediamesh - worker dispatch coordinator for a media sharing platform
//!
//! The coordinator keeps a registry of interchangeable backend workers by
//! role (coordinator, conversion, streaming), balances task load across them
//! under a per-node concurrency cap, and dispatches buffered or streamed
//! calls with automatic failover when a worker becomes unreachable.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                Application code                      │
//! │        convert / stream media requests               │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │               Dispatch client                        │
//! │   acquire → call → release, failover on transport   │
//! └─────────┬──────────────────────────┬────────────────┘
//!           │                          │
//! ┌─────────▼─────────┐   ┌────────────▼────────────────┐
//! │   Load balancer   │──▶│   Node registry              │
//! │  per-node caps +  │   │  heartbeats + lazy staleness │
//! │  FIFO waiters     │   └────────────┬────────────────┘
//! └───────────────────┘                │ register/heartbeat
//!                          ┌───────────▼──────────────────┐
//!                          │   Worker processes (HTTP)    │
//!                          │   front the Conversion Engine│
//!                          └──────────────────────────────┘
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod nodes;
pub mod worker;

pub use config::{ApiServerConfig, DispatchConfig, WorkerConfig};
pub use error::{Error, Result};
pub use nodes::{
    NodeBalancer, NodeClient, NodeMetrics, NodeRegistration, NodeRegistry, NodeRole, NodeStatus,
    NodeStream, RegisteredNode, SharedNodeRegistry, compute_status,
};
