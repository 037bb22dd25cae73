//! Replication Transport
//!
//! How an operation reaches a peer. Only an in-process implementation
//! exists; it feeds engines living in the same process.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::kv::{Engine, NodeId, Operation};

/// Delivers one operation to one peer
#[async_trait]
pub trait Transport: Send + Sync {
    async fn deliver(&self, target: &NodeId, op: Operation) -> Result<()>;
}

/// Transport to engines registered in this process
#[derive(Default)]
pub struct InProcessTransport {
    engines: RwLock<HashMap<NodeId, Arc<Engine>>>,
}

impl InProcessTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, engine: Arc<Engine>) {
        let id = engine.node_id().clone();
        tracing::debug!("Registered in-process peer {}", id);
        self.engines
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, engine);
    }

    /// Remove a peer; later deliveries to it fail
    pub fn unregister(&self, node: &NodeId) -> Option<Arc<Engine>> {
        self.engines
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(node)
    }

    fn engine(&self, node: &NodeId) -> Option<Arc<Engine>> {
        self.engines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(node)
            .cloned()
    }
}

#[async_trait]
impl Transport for InProcessTransport {
    async fn deliver(&self, target: &NodeId, op: Operation) -> Result<()> {
        let engine = self
            .engine(target)
            .ok_or_else(|| Error::UnknownNode(target.to_string()))?;
        let version = op.version().clone();
        match engine.apply_replica(op).await {
            Ok(_) => Ok(()),
            // a malformed op fails the same way on every attempt
            Err(e) if e.is_corruption() => Err(e),
            Err(e) => Err(Error::Replication(format!(
                "{} could not apply {}: {}",
                target, version, e
            ))),
        }
    }
}
