//! Cluster Routing Module
//!
//! Consistent-hash ring, health oracles and the node selector that
//! combines them into read and write targets.

mod health;
mod ring;
mod selector;

pub use crate::kv::NodeId;
pub use health::{HealthChecker, HeartbeatHealth, StaticHealth};
pub use ring::{hash_key, HashRing};
pub use selector::{NodeSelector, ReadConsistency, Route, SelectorConfig, WriteConsistency};
