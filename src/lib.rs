//! WolfKV - Replicated Key-Value Node Core
//!
//! The per-node state machine of a replicated key-value store, plus the
//! routing metadata needed to spread keys across a cluster.
//!
//! # Architecture
//!
//! Every local write is appended to a Write-Ahead Log (WAL), optionally
//! synced, applied to an in-memory store and then handed to replication
//! without waiting for peers. Writes carry a `(seq, node_id)` version and
//! replicas converge by keeping the highest version per key, so replicated
//! operations can arrive late, twice or out of order.
//!
//! # Features
//!
//! - Segmented, checksummed WAL with optional LZ4 compression
//! - Tombstone deletes that keep their version
//! - Idempotent, order-independent replica apply
//! - Weighted consistent-hash ring with virtual nodes
//! - Health-aware read and write target selection
//! - Queue-backed replication fan-out with retries

pub mod cluster;
pub mod config;
pub mod error;
pub mod kv;
pub mod replication;
pub mod wal;

pub use config::WolfKvConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::cluster::{HashRing, HealthChecker, NodeSelector, Route};
    pub use crate::config::WolfKvConfig;
    pub use crate::error::{Error, Result};
    pub use crate::kv::{Engine, EngineConfig, MemStore, NodeId, Operation, Record, Version};
    pub use crate::replication::{QueueReplicator, Replicator, ReplicationWorker};
    pub use crate::wal::{FileWal, Wal};
}
