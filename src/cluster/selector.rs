//! Node Selector
//!
//! Turns the ring's replica list for a key into concrete read and write
//! targets, filtered by live health. Health is asked fresh on every call.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{HashRing, HealthChecker, NodeId};

/// Which replicas may serve a read
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadConsistency {
    /// Only the primary, and only while it is healthy
    #[default]
    Primary,
    /// The first healthy replica in priority order
    AnyReplica,
}

/// Which replicas must receive a write
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteConsistency {
    /// Only the primary, and only while it is healthy
    #[default]
    PrimaryOnly,
    /// Every healthy replica
    Replicate,
}

/// Routing policy
#[derive(Debug, Clone, Copy)]
pub struct SelectorConfig {
    pub replication_factor: usize,
    pub read_consistency: ReadConsistency,
    pub write_consistency: WriteConsistency,
}

/// Routing decision for one key, both target sets from one health reading per replica
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Route {
    pub key: String,
    pub primary: Option<NodeId>,
    pub replicas: Vec<NodeId>,
    pub read_targets: Vec<NodeId>,
    pub write_targets: Vec<NodeId>,
}

/// Policy layer over the ring and a health oracle
pub struct NodeSelector {
    ring: Arc<HashRing>,
    local: NodeId,
    health: Arc<dyn HealthChecker>,
    config: SelectorConfig,
}

impl NodeSelector {
    pub fn new(
        ring: Arc<HashRing>,
        local: NodeId,
        health: Arc<dyn HealthChecker>,
        config: SelectorConfig,
    ) -> Self {
        Self {
            ring,
            local,
            health,
            config,
        }
    }

    pub fn local(&self) -> &NodeId {
        &self.local
    }

    pub fn config(&self) -> &SelectorConfig {
        &self.config
    }

    pub fn primary(&self, key: &str) -> Option<NodeId> {
        self.replicas(key).into_iter().next()
    }

    /// First `replication_factor` distinct nodes for `key`, primary first
    pub fn replicas(&self, key: &str) -> Vec<NodeId> {
        self.ring.replicas(key, self.config.replication_factor)
    }

    pub fn is_primary(&self, key: &str) -> bool {
        self.primary(key).as_ref() == Some(&self.local)
    }

    /// Nodes that should receive a write for `key`.
    ///
    /// Empty means no safe target right now.
    pub fn write_targets(&self, key: &str) -> Vec<NodeId> {
        let replicas = self.replicas(key);
        let healthy = self.health_of(&replicas);
        self.write_targets_from(&replicas, &healthy)
    }

    /// Node that may serve a read for `key`; at most one entry
    pub fn read_targets(&self, key: &str) -> Vec<NodeId> {
        let replicas = self.replicas(key);
        let healthy = self.health_of(&replicas);
        self.read_targets_from(&replicas, &healthy)
    }

    /// Full routing decision for `key`.
    ///
    /// Health is asked once per replica and both target sets are derived
    /// from those answers, so a flapping node lands in both sets or in
    /// neither.
    pub fn route(&self, key: &str) -> Route {
        let replicas = self.replicas(key);
        let healthy = self.health_of(&replicas);
        Route {
            key: key.to_string(),
            primary: replicas.first().cloned(),
            read_targets: self.read_targets_from(&replicas, &healthy),
            write_targets: self.write_targets_from(&replicas, &healthy),
            replicas,
        }
    }

    fn health_of(&self, replicas: &[NodeId]) -> Vec<bool> {
        replicas
            .iter()
            .map(|node| self.health.is_healthy(node))
            .collect()
    }

    fn write_targets_from(&self, replicas: &[NodeId], healthy: &[bool]) -> Vec<NodeId> {
        let take = match self.config.write_consistency {
            WriteConsistency::PrimaryOnly => 1,
            WriteConsistency::Replicate => replicas.len(),
        };
        replicas
            .iter()
            .zip(healthy)
            .take(take)
            .filter(|(_, ok)| **ok)
            .map(|(node, _)| node.clone())
            .collect()
    }

    fn read_targets_from(&self, replicas: &[NodeId], healthy: &[bool]) -> Vec<NodeId> {
        let candidate = match self.config.read_consistency {
            ReadConsistency::Primary => replicas.first().filter(|_| healthy.first() == Some(&true)),
            ReadConsistency::AnyReplica => replicas
                .iter()
                .zip(healthy)
                .find(|(_, ok)| **ok)
                .map(|(node, _)| node),
        };
        candidate.cloned().into_iter().collect()
    }
}
