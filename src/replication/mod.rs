//! Replication Module
//!
//! Hand-off of local writes to peer nodes. The engine only sees the
//! fire-and-forget `Replicator`; the queue and worker behind it do the
//! fan-out.

mod queue;
mod transport;

pub use queue::{QueueReplicator, ReplicationWorker};
pub use transport::{InProcessTransport, Transport};

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::kv::Operation;

/// Receives every committed local write.
///
/// Must not block and must not fail visibly; a lost hand-off is the
/// replicator's problem, not the writer's.
pub trait Replicator: Send + Sync {
    fn replicate(&self, op: Operation);
}

/// Configuration for replication
#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    /// Operations buffered between the engine and the worker
    pub queue_capacity: usize,
    /// Delivery attempts per target
    pub max_attempts: u32,
    /// Backoff step; attempt `n` waits `n * retry_backoff`
    pub retry_backoff: Duration,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
            max_attempts: 3,
            retry_backoff: Duration::from_millis(100),
        }
    }
}

/// Replicator that only remembers what it was handed
#[derive(Default)]
pub struct RecordingReplicator {
    ops: Mutex<Vec<Operation>>,
}

impl RecordingReplicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ops(&self) -> Vec<Operation> {
        self.ops.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn len(&self) -> usize {
        self.ops.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Replicator for RecordingReplicator {
    fn replicate(&self, op: Operation) {
        self.ops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(op);
    }
}
