//! Node Health
//!
//! Liveness oracles consulted by the node selector on every routing
//! decision.

use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

use super::NodeId;

/// Point-in-time liveness oracle
pub trait HealthChecker: Send + Sync {
    fn is_healthy(&self, node: &NodeId) -> bool;
}

/// Health of a single peer
#[derive(Debug, Clone, Default)]
struct PeerHealth {
    last_heartbeat: Option<Instant>,
    marked_down: bool,
}

impl PeerHealth {
    fn is_healthy(&self, timeout: Duration) -> bool {
        if self.marked_down {
            return false;
        }
        match self.last_heartbeat {
            Some(last) => last.elapsed() < timeout,
            None => false,
        }
    }
}

/// Heartbeat-driven health tracking.
///
/// A peer is healthy while its last heartbeat is younger than the
/// timeout and nobody marked it down since. The local node is always
/// healthy.
pub struct HeartbeatHealth {
    local: NodeId,
    timeout: Duration,
    peers: RwLock<HashMap<NodeId, PeerHealth>>,
}

impl HeartbeatHealth {
    pub fn new(local: NodeId, timeout: Duration) -> Self {
        Self {
            local,
            timeout,
            peers: RwLock::new(HashMap::new()),
        }
    }

    /// Record a heartbeat from `node`, clearing any down mark
    pub fn record_heartbeat(&self, node: &NodeId) {
        let mut peers = self.peers.write().unwrap_or_else(PoisonError::into_inner);
        let peer = peers.entry(node.clone()).or_default();
        if peer.marked_down {
            tracing::info!("node {} is back", node);
        }
        peer.last_heartbeat = Some(Instant::now());
        peer.marked_down = false;
    }

    /// Mark `node` unhealthy until its next heartbeat
    pub fn mark_down(&self, node: &NodeId) {
        let mut peers = self.peers.write().unwrap_or_else(PoisonError::into_inner);
        let peer = peers.entry(node.clone()).or_default();
        if !peer.marked_down {
            tracing::warn!("node {} marked down", node);
        }
        peer.marked_down = true;
    }

    /// Stop tracking `node`
    pub fn forget(&self, node: &NodeId) {
        self.peers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(node);
    }

    /// Known peers that are currently unhealthy, sorted by id
    pub fn unhealthy_peers(&self) -> Vec<NodeId> {
        let peers = self.peers.read().unwrap_or_else(PoisonError::into_inner);
        let mut down: Vec<NodeId> = peers
            .iter()
            .filter(|(id, peer)| **id != self.local && !peer.is_healthy(self.timeout))
            .map(|(id, _)| id.clone())
            .collect();
        down.sort();
        down
    }

    /// Time since the last heartbeat from `node`
    pub fn time_since_heartbeat(&self, node: &NodeId) -> Option<Duration> {
        let peers = self.peers.read().unwrap_or_else(PoisonError::into_inner);
        peers
            .get(node)
            .and_then(|p| p.last_heartbeat)
            .map(|t| t.elapsed())
    }
}

impl HealthChecker for HeartbeatHealth {
    fn is_healthy(&self, node: &NodeId) -> bool {
        if *node == self.local {
            return true;
        }
        let peers = self.peers.read().unwrap_or_else(PoisonError::into_inner);
        peers
            .get(node)
            .map_or(false, |peer| peer.is_healthy(self.timeout))
    }
}

/// Health oracle with an explicit set of down nodes; everything else is
/// healthy.
#[derive(Default)]
pub struct StaticHealth {
    down: RwLock<HashSet<NodeId>>,
}

impl StaticHealth {
    pub fn all_healthy() -> Self {
        Self::default()
    }

    pub fn with_down<I, N>(nodes: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<NodeId>,
    {
        Self {
            down: RwLock::new(nodes.into_iter().map(Into::into).collect()),
        }
    }

    pub fn set_down(&self, node: impl Into<NodeId>, down: bool) {
        let node = node.into();
        let mut set = self.down.write().unwrap_or_else(PoisonError::into_inner);
        if down {
            set.insert(node);
        } else {
            set.remove(&node);
        }
    }
}

impl HealthChecker for StaticHealth {
    fn is_healthy(&self, node: &NodeId) -> bool {
        !self
            .down
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(node)
    }
}
