//! Replication Queue and Fan-out Worker

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

use super::{ReplicationConfig, Replicator, Transport};
use crate::cluster::NodeSelector;
use crate::kv::{NodeId, Operation};

/// `Replicator` backed by a bounded queue.
///
/// A full or closed queue drops the operation with a warning; the write
/// that produced it has already succeeded locally.
pub struct QueueReplicator {
    tx: mpsc::Sender<Operation>,
    dropped: AtomicU64,
}

impl QueueReplicator {
    /// Create the replicator and the receiving end for a `ReplicationWorker`
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Operation>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let replicator = Self {
            tx,
            dropped: AtomicU64::new(0),
        };
        (replicator, rx)
    }

    /// Operations dropped because the queue was full or closed
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Replicator for QueueReplicator {
    fn replicate(&self, op: Operation) {
        match self.tx.try_send(op) {
            Ok(()) => {}
            Err(TrySendError::Full(op)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    "Replication queue full, dropping {} for '{}' at {}",
                    op.kind(),
                    op.key(),
                    op.version()
                );
            }
            Err(TrySendError::Closed(op)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    "Replication worker gone, dropping {} for '{}' at {}",
                    op.kind(),
                    op.key(),
                    op.version()
                );
            }
        }
    }
}

/// Drains the replication queue and pushes each operation to the key's
/// other write targets
pub struct ReplicationWorker {
    selector: Arc<NodeSelector>,
    transport: Arc<dyn Transport>,
    config: ReplicationConfig,
}

impl ReplicationWorker {
    pub fn new(
        selector: Arc<NodeSelector>,
        transport: Arc<dyn Transport>,
        config: ReplicationConfig,
    ) -> Self {
        Self {
            selector,
            transport,
            config,
        }
    }

    pub fn spawn(self, rx: mpsc::Receiver<Operation>) -> JoinHandle<()> {
        tokio::spawn(self.run(rx))
    }

    /// Run until every sender is dropped
    pub async fn run(self, mut rx: mpsc::Receiver<Operation>) {
        tracing::info!("Replication worker started on {}", self.selector.local());
        while let Some(op) = rx.recv().await {
            self.fan_out(op).await;
        }
        tracing::info!("Replication worker on {} stopped", self.selector.local());
    }

    /// Deliver `op` to every healthy write target except this node.
    ///
    /// Returns how many targets accepted it.
    pub async fn fan_out(&self, op: Operation) -> usize {
        let local = self.selector.local();
        let targets: Vec<NodeId> = self
            .selector
            .write_targets(op.key())
            .into_iter()
            .filter(|node| node != local)
            .collect();

        if targets.is_empty() {
            tracing::debug!("No remote write targets for '{}'", op.key());
            return 0;
        }

        let results = join_all(targets.iter().map(|target| self.deliver(target, &op))).await;
        results.into_iter().filter(|delivered| *delivered).count()
    }

    async fn deliver(&self, target: &NodeId, op: &Operation) -> bool {
        let attempts = self.config.max_attempts.max(1);
        for attempt in 1..=attempts {
            match self.transport.deliver(target, op.clone()).await {
                Ok(()) => {
                    tracing::trace!("Replicated '{}' at {} to {}", op.key(), op.version(), target);
                    return true;
                }
                Err(e) if attempt < attempts && e.is_retryable() => {
                    tracing::warn!(
                        "Replication of '{}' to {} failed (attempt {}/{}): {}",
                        op.key(),
                        target,
                        attempt,
                        attempts,
                        e
                    );
                    tokio::time::sleep(self.config.retry_backoff * attempt).await;
                }
                Err(e) => {
                    tracing::error!(
                        "Giving up replicating '{}' at {} to {} after {} attempt(s): {}",
                        op.key(),
                        op.version(),
                        target,
                        attempt,
                        e
                    );
                    return false;
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{HashRing, ReadConsistency, SelectorConfig, StaticHealth, WriteConsistency};
    use crate::error::{Error, Result};
    use crate::kv::Version;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Fails the first `failures` deliveries, then records the rest
    struct FlakyTransport {
        failures: AtomicU32,
        error: fn() -> Error,
        delivered: Mutex<Vec<NodeId>>,
    }

    impl FlakyTransport {
        fn new(failures: u32, error: fn() -> Error) -> Self {
            Self {
                failures: AtomicU32::new(failures),
                error,
                delivered: Mutex::new(Vec::new()),
            }
        }

        fn delivered(&self) -> Vec<NodeId> {
            let mut nodes = self.delivered.lock().unwrap().clone();
            nodes.sort();
            nodes
        }
    }

    #[async_trait]
    impl Transport for FlakyTransport {
        async fn deliver(&self, target: &NodeId, _op: Operation) -> Result<()> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err((self.error)());
            }
            self.delivered.lock().unwrap().push(target.clone());
            Ok(())
        }
    }

    fn selector(health: Arc<StaticHealth>) -> Arc<NodeSelector> {
        let ring = Arc::new(HashRing::with_nodes([("n1", 16), ("n2", 16), ("n3", 16)]));
        Arc::new(NodeSelector::new(
            ring,
            NodeId::from("n1"),
            health,
            SelectorConfig {
                replication_factor: 3,
                read_consistency: ReadConsistency::Primary,
                write_consistency: WriteConsistency::Replicate,
            },
        ))
    }

    fn config(max_attempts: u32) -> ReplicationConfig {
        ReplicationConfig {
            queue_capacity: 16,
            max_attempts,
            retry_backoff: Duration::from_millis(1),
        }
    }

    fn op() -> Operation {
        Operation::put("k", "v", Version::new("n1", 1))
    }

    #[tokio::test]
    async fn test_fan_out_skips_local_and_unhealthy() {
        let health = Arc::new(StaticHealth::all_healthy());
        let transport = Arc::new(FlakyTransport::new(0, || Error::Replication("x".into())));
        let worker = ReplicationWorker::new(selector(Arc::clone(&health)), transport.clone(), config(1));

        assert_eq!(worker.fan_out(op()).await, 2);
        assert_eq!(transport.delivered(), vec![NodeId::from("n2"), NodeId::from("n3")]);

        health.set_down("n3", true);
        assert_eq!(worker.fan_out(op()).await, 1);
    }

    #[tokio::test]
    async fn test_retries_transient_failures() {
        let transport = Arc::new(FlakyTransport::new(2, || Error::Unavailable("peer busy".into())));
        let worker = ReplicationWorker::new(
            selector(Arc::new(StaticHealth::all_healthy())),
            transport.clone(),
            config(3),
        );

        assert_eq!(worker.fan_out(op()).await, 2);
        assert_eq!(transport.delivered().len(), 2);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let transport = Arc::new(FlakyTransport::new(100, || Error::Unavailable("down".into())));
        let worker = ReplicationWorker::new(
            selector(Arc::new(StaticHealth::all_healthy())),
            transport.clone(),
            config(2),
        );

        assert_eq!(worker.fan_out(op()).await, 0);
        // two targets, two attempts each
        assert_eq!(transport.failures.load(Ordering::SeqCst), 96);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let transport = Arc::new(FlakyTransport::new(100, || Error::Internal("boom".into())));
        let worker = ReplicationWorker::new(
            selector(Arc::new(StaticHealth::all_healthy())),
            transport.clone(),
            config(5),
        );

        assert_eq!(worker.fan_out(op()).await, 0);
        assert_eq!(transport.failures.load(Ordering::SeqCst), 98);
    }

    #[tokio::test]
    async fn test_queue_drops_when_full_or_closed() {
        let (replicator, mut rx) = QueueReplicator::channel(1);
        replicator.replicate(op());
        replicator.replicate(op());
        assert_eq!(replicator.dropped(), 1);

        assert!(rx.recv().await.is_some());
        drop(rx);
        replicator.replicate(op());
        assert_eq!(replicator.dropped(), 2);
    }

    #[tokio::test]
    async fn test_worker_drains_queue_until_closed() {
        let transport = Arc::new(FlakyTransport::new(0, || Error::Replication("x".into())));
        let worker = ReplicationWorker::new(
            selector(Arc::new(StaticHealth::all_healthy())),
            transport.clone(),
            config(1),
        );

        let (replicator, rx) = QueueReplicator::channel(8);
        let handle = worker.spawn(rx);
        replicator.replicate(op());
        replicator.replicate(op());
        drop(replicator);

        handle.await.unwrap();
        assert_eq!(transport.delivered().len(), 4);
    }
}
