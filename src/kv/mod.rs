//! Key-Value State Machine Module
//!
//! Versioned operations, the materialized store and the engine that
//! ties them to the WAL and replication.

mod engine;
mod store;
mod types;

pub use engine::{Engine, EngineConfig};
pub use store::{MemStore, Store};
pub use types::{NodeId, OpKind, Operation, Record, Version};
