//! Engine
//!
//! The authoritative state machine of a node. Local writes go
//! WAL append -> optional sync -> in-memory apply -> replication hand-off.
//! Replicated writes are applied only when their version is strictly
//! newer than what the node already holds for the key.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::RwLock;

use super::store::Store;
use super::types::{NodeId, Operation, Record, Version};
use crate::error::{Error, Result};
use crate::replication::Replicator;
use crate::wal::Wal;

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// This node's identity, stamped into every local version
    pub node_id: NodeId,
    /// Sync the WAL before a write becomes visible
    pub sync_writes: bool,
    /// Hand local writes to the replicator
    pub enable_replication: bool,
}

impl EngineConfig {
    pub fn new(node_id: impl Into<NodeId>) -> Self {
        Self {
            node_id: node_id.into(),
            sync_writes: true,
            enable_replication: true,
        }
    }
}

/// Per-node state machine
pub struct Engine {
    config: EngineConfig,
    store: Arc<dyn Store>,
    wal: Arc<dyn Wal>,
    replicator: Option<Arc<dyn Replicator>>,
    /// Guards the visible apply step, not the WAL
    apply_lock: RwLock<()>,
    /// Last sequence number issued for a local write
    seq: AtomicU64,
}

impl Engine {
    /// Build an engine and rebuild its state from the WAL.
    ///
    /// Every logged operation is folded through the normal apply rule and
    /// the local sequence counter resumes after the highest local `seq`
    /// found in the log.
    pub async fn open(
        config: EngineConfig,
        store: Arc<dyn Store>,
        wal: Arc<dyn Wal>,
        replicator: Option<Arc<dyn Replicator>>,
    ) -> Result<Self> {
        let ops = wal.replay().await?;

        let mut high_water = 0;
        for op in &ops {
            apply_to(store.as_ref(), op)?;
            if op.version().node_id == config.node_id {
                high_water = high_water.max(op.version().seq);
            }
        }

        tracing::info!(
            "Engine {} recovered {} operation(s) from WAL, next seq {}",
            config.node_id,
            ops.len(),
            high_water + 1
        );

        Ok(Self {
            config,
            store,
            wal,
            replicator,
            apply_lock: RwLock::new(()),
            seq: AtomicU64::new(high_water),
        })
    }

    pub fn node_id(&self) -> &NodeId {
        &self.config.node_id
    }

    /// Highest sequence number issued so far
    pub fn current_seq(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }

    /// Current value of `key`, `None` if missing or deleted
    pub async fn get(&self, key: &str) -> Option<Bytes> {
        let _guard = self.apply_lock.read().await;
        self.store
            .get(key)
            .filter(|rec| !rec.is_deleted())
            .map(|rec| rec.value)
    }

    /// Like `get`, with absence reported as `Error::KeyNotFound`
    pub async fn fetch(&self, key: &str) -> Result<Bytes> {
        self.get(key)
            .await
            .ok_or_else(|| Error::KeyNotFound(key.to_string()))
    }

    /// Write `value` under `key`; returns the version assigned to the write
    pub async fn put(&self, key: &str, value: impl Into<Bytes>) -> Result<Version> {
        let op = Operation::put(key, value, self.next_version());
        self.write_local(op).await
    }

    /// Tombstone `key`; returns the version assigned to the delete
    pub async fn delete(&self, key: &str) -> Result<Version> {
        let op = Operation::delete(key, self.next_version());
        self.write_local(op).await
    }

    /// Apply an operation received from another node.
    ///
    /// Safe to call any number of times, in any order. Returns `Ok(false)`
    /// when the node already holds an equal or newer version for the key.
    /// The WAL is written without the apply lock held, so readers never
    /// wait on a replica's sync.
    pub async fn apply_replica(&self, op: Operation) -> Result<bool> {
        op.validate()?;

        {
            let _guard = self.apply_lock.read().await;
            if self.is_stale(&op) {
                return Ok(false);
            }
        }

        // a racing apply of the same op may log it twice; replay folds that away
        self.wal.append(&op).await?;
        if self.config.sync_writes {
            self.wal.sync().await?;
        }

        {
            let _guard = self.apply_lock.write().await;
            if self.is_stale(&op) {
                return Ok(false);
            }
            apply_to(self.store.as_ref(), &op)?;
        }

        // an import of our own history must not let the counter reissue it
        if op.version().node_id == self.config.node_id {
            self.seq.fetch_max(op.version().seq, Ordering::SeqCst);
        }

        tracing::trace!("Applied replica {} for '{}' at {}", op.kind(), op.key(), op.version());
        Ok(true)
    }

    /// Visit every record, tombstones included, until `visitor` returns false
    pub async fn export<F>(&self, mut visitor: F)
    where
        F: FnMut(&str, &Record) -> bool,
    {
        let _guard = self.apply_lock.read().await;
        self.store.scan(&mut visitor);
    }

    /// Every record rewritten as the operation that produces it, for
    /// shipping to another node's `import`
    pub async fn export_operations(&self) -> Vec<Operation> {
        let mut ops = Vec::new();
        self.export(|key, record| {
            let op = if record.is_deleted() {
                Operation::delete(key, record.version.clone())
            } else {
                Operation::put(key, record.value.clone(), record.version.clone())
            };
            ops.push(op);
            true
        })
        .await;
        ops
    }

    /// Ingest an operation from a migration or snapshot transfer
    pub async fn import(&self, op: Operation) -> Result<bool> {
        self.apply_replica(op).await
    }

    /// Number of live keys
    pub async fn len(&self) -> usize {
        let mut live = 0;
        self.export(|_, record| {
            if !record.is_deleted() {
                live += 1;
            }
            true
        })
        .await;
        live
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Close the underlying WAL
    pub async fn close(&self) -> Result<()> {
        self.wal.close().await
    }

    /// True if the store already holds `op`'s version or a newer one
    fn is_stale(&self, op: &Operation) -> bool {
        match self.store.record(op.key()) {
            Some(existing) if !op.version().greater_than(&existing.version) => {
                tracing::debug!(
                    "Dropping stale {} for '{}': have {}, got {}",
                    op.kind(),
                    op.key(),
                    existing.version,
                    op.version()
                );
                true
            }
            _ => false,
        }
    }

    fn next_version(&self) -> Version {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        Version::new(self.config.node_id.clone(), seq)
    }

    async fn write_local(&self, op: Operation) -> Result<Version> {
        self.wal.append(&op).await?;
        if self.config.sync_writes {
            self.wal.sync().await?;
        }

        {
            let _guard = self.apply_lock.write().await;
            apply_to(self.store.as_ref(), &op)?;
        }

        let version = op.version().clone();
        if self.config.enable_replication {
            if let Some(replicator) = &self.replicator {
                replicator.replicate(op);
            }
        }
        Ok(version)
    }
}

/// Fold one operation into the store
fn apply_to(store: &dyn Store, op: &Operation) -> Result<()> {
    let record = op.to_record()?;
    store.put(op.key(), record);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemStore;
    use crate::replication::RecordingReplicator;
    use crate::wal::MemoryWal;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::{Notify, Semaphore};

    struct Harness {
        engine: Engine,
        store: Arc<MemStore>,
        wal: Arc<MemoryWal>,
        replicator: Arc<RecordingReplicator>,
    }

    async fn harness_with(config: EngineConfig, wal: MemoryWal) -> Harness {
        let store = Arc::new(MemStore::new());
        let wal = Arc::new(wal);
        let replicator = Arc::new(RecordingReplicator::new());
        let engine = Engine::open(
            config,
            store.clone(),
            wal.clone(),
            Some(replicator.clone()),
        )
        .await
        .unwrap();
        Harness {
            engine,
            store,
            wal,
            replicator,
        }
    }

    async fn harness(node: &str) -> Harness {
        harness_with(EngineConfig::new(node), MemoryWal::new()).await
    }

    fn put(key: &str, value: &'static str, node: &str, seq: u64) -> Operation {
        Operation::put(key, value, Version::new(node, seq))
    }

    fn del(key: &str, node: &str, seq: u64) -> Operation {
        Operation::delete(key, Version::new(node, seq))
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let h = harness("a").await;

        let v1 = h.engine.put("k", "v1").await.unwrap();
        assert_eq!(v1, Version::new("a", 1));
        assert_eq!(h.engine.get("k").await, Some(Bytes::from("v1")));

        let v2 = h.engine.delete("k").await.unwrap();
        assert_eq!(v2.seq, 2);
        assert_eq!(h.engine.get("k").await, None);
        assert!(matches!(h.engine.fetch("k").await, Err(Error::KeyNotFound(_))));

        // tombstone is still there, carrying the delete's version
        let raw = h.store.record("k").unwrap();
        assert!(raw.is_deleted());
        assert_eq!(raw.version, v2);

        assert_eq!(h.wal.len(), 2);
        assert_eq!(h.wal.sync_count(), 2);
    }

    #[tokio::test]
    async fn test_failed_append_changes_nothing() {
        let h = harness("a").await;
        h.engine.put("k", "before").await.unwrap();

        h.wal.set_fail_appends(true);
        assert!(h.engine.put("k", "after").await.is_err());
        assert!(h.engine.delete("k").await.is_err());
        assert!(h.engine.put("fresh", "x").await.is_err());

        assert_eq!(h.engine.get("k").await, Some(Bytes::from("before")));
        assert!(h.store.record("fresh").is_none());
        assert_eq!(h.replicator.len(), 1);

        // the engine keeps working once the log recovers
        h.wal.set_fail_appends(false);
        h.engine.put("k", "after").await.unwrap();
        assert_eq!(h.engine.get("k").await, Some(Bytes::from("after")));
    }

    #[tokio::test]
    async fn test_failed_sync_blocks_visibility() {
        let h = harness("a").await;
        h.engine.put("k", "before").await.unwrap();

        h.wal.set_fail_syncs(true);
        assert!(h.engine.put("k", "after").await.is_err());
        assert_eq!(h.engine.get("k").await, Some(Bytes::from("before")));
        assert_eq!(h.replicator.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_replica_durability_changes_nothing() {
        let h = harness("a").await;
        h.engine.apply_replica(put("k", "v1", "b", 1)).await.unwrap();
        let before = h.store.record("k");

        h.wal.set_fail_appends(true);
        assert!(h.engine.apply_replica(put("k", "v2", "b", 2)).await.is_err());
        assert!(h.engine.import(del("k", "c", 3)).await.is_err());
        assert_eq!(h.store.record("k"), before);

        h.wal.set_fail_appends(false);
        h.wal.set_fail_syncs(true);
        assert!(h.engine.apply_replica(put("k", "v2", "b", 2)).await.is_err());
        assert!(h.engine.import(del("k", "c", 3)).await.is_err());
        assert_eq!(h.store.record("k"), before);

        // retries succeed once the log recovers
        h.wal.set_fail_syncs(false);
        assert!(h.engine.apply_replica(put("k", "v2", "b", 2)).await.unwrap());
        assert_eq!(h.engine.get("k").await, Some(Bytes::from("v2")));
        assert!(h.engine.import(del("k", "c", 3)).await.unwrap());
        assert_eq!(h.engine.get("k").await, None);
        assert_eq!(h.store.record("k").unwrap().version, Version::new("c", 3));
    }

    /// WAL whose `sync` parks until the test opens the gate
    struct GatedWal {
        inner: MemoryWal,
        entered: Notify,
        gate: Semaphore,
    }

    #[async_trait]
    impl Wal for GatedWal {
        async fn append(&self, op: &Operation) -> Result<()> {
            self.inner.append(op).await
        }

        async fn replay(&self) -> Result<Vec<Operation>> {
            self.inner.replay().await
        }

        async fn sync(&self) -> Result<()> {
            self.entered.notify_one();
            self.gate
                .acquire()
                .await
                .map_err(|e| Error::Internal(e.to_string()))?
                .forget();
            self.inner.sync().await
        }

        async fn close(&self) -> Result<()> {
            self.inner.close().await
        }
    }

    #[tokio::test]
    async fn test_reads_do_not_wait_for_replica_sync() {
        let wal = Arc::new(GatedWal {
            inner: MemoryWal::new(),
            entered: Notify::new(),
            gate: Semaphore::new(0),
        });
        let engine = Arc::new(
            Engine::open(EngineConfig::new("a"), Arc::new(MemStore::new()), wal.clone(), None)
                .await
                .unwrap(),
        );

        let writer = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.apply_replica(put("k", "v", "b", 1)).await })
        };
        wal.entered.notified().await;

        // the replica is logged but parked in sync; readers carry on
        let read = tokio::time::timeout(Duration::from_millis(500), engine.get("unrelated")).await;
        assert_eq!(read.unwrap(), None);
        let read = tokio::time::timeout(Duration::from_millis(500), engine.get("k")).await;
        assert_eq!(read.unwrap(), None, "not visible before it is durable");

        wal.gate.add_permits(1);
        assert!(writer.await.unwrap().unwrap());
        assert_eq!(engine.get("k").await, Some(Bytes::from("v")));
    }

    #[tokio::test]
    async fn test_sync_skipped_without_sync_writes() {
        let mut config = EngineConfig::new("a");
        config.sync_writes = false;
        let h = harness_with(config, MemoryWal::new()).await;

        h.wal.set_fail_syncs(true);
        h.engine.put("k", "v").await.unwrap();
        assert_eq!(h.wal.sync_count(), 0);
        assert_eq!(h.engine.get("k").await, Some(Bytes::from("v")));
    }

    #[tokio::test]
    async fn test_stale_replica_is_dropped() {
        let h = harness("a").await;
        let v1 = h.engine.put("k", "v1").await.unwrap();
        assert_eq!(v1.seq, 1);

        let applied = h.engine.apply_replica(put("k", "old", "b", 0)).await.unwrap();
        assert!(!applied);
        assert_eq!(h.engine.get("k").await, Some(Bytes::from("v1")));
        assert_eq!(h.wal.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_replica_is_noop() {
        let h = harness("a").await;
        let op = put("k", "v", "b", 7);

        assert!(h.engine.apply_replica(op.clone()).await.unwrap());
        assert!(!h.engine.apply_replica(op.clone()).await.unwrap());
        assert!(!h.engine.import(op).await.unwrap());

        assert_eq!(h.wal.len(), 1);
        assert_eq!(h.store.record("k").unwrap().version, Version::new("b", 7));
    }

    #[tokio::test]
    async fn test_equal_seq_breaks_tie_on_node_id() {
        let h = harness("a").await;
        h.engine.apply_replica(put("k", "from-b", "b", 3)).await.unwrap();
        h.engine.apply_replica(put("k", "from-c", "c", 3)).await.unwrap();
        h.engine.apply_replica(put("k", "from-a", "a", 3)).await.unwrap();

        assert_eq!(h.engine.get("k").await, Some(Bytes::from("from-c")));
    }

    #[tokio::test]
    async fn test_delete_tombstone_wins_over_older_put() {
        let h = harness("a").await;
        h.engine.apply_replica(del("k", "b", 5)).await.unwrap();
        assert!(!h.engine.apply_replica(put("k", "late", "c", 4)).await.unwrap());
        assert_eq!(h.engine.get("k").await, None);

        assert!(h.engine.apply_replica(put("k", "newer", "c", 6)).await.unwrap());
        assert_eq!(h.engine.get("k").await, Some(Bytes::from("newer")));
    }

    #[tokio::test]
    async fn test_any_permutation_converges() {
        let ops = vec![
            put("k", "v1", "a", 1),
            del("k", "b", 2),
            put("k", "v3", "a", 3),
            put("k", "v3b", "b", 3),
        ];
        let winner = Version::new("b", 3);

        let mut orders = Vec::new();
        permutations(&mut (0..ops.len()).collect::<Vec<_>>(), 0, &mut orders);
        assert_eq!(orders.len(), 24);

        for order in orders {
            let h = harness("z").await;
            for &i in &order {
                h.engine.apply_replica(ops[i].clone()).await.unwrap();
                // a redelivery never changes anything
                h.engine.apply_replica(ops[i].clone()).await.unwrap();
            }
            let rec = h.store.record("k").unwrap();
            assert_eq!(rec.version, winner, "order {:?}", order);
            assert_eq!(rec.value, Bytes::from("v3b"));
        }
    }

    fn permutations(items: &mut Vec<usize>, k: usize, out: &mut Vec<Vec<usize>>) {
        if k == items.len() {
            out.push(items.clone());
            return;
        }
        for i in k..items.len() {
            items.swap(k, i);
            permutations(items, k + 1, out);
            items.swap(k, i);
        }
    }

    #[tokio::test]
    async fn test_malformed_replica_is_rejected() {
        let h = harness("a").await;
        let op: Operation = serde_json::from_str(
            r#"{"kind":"Put","key":"k","value":null,"version":{"node_id":"b","seq":1}}"#,
        )
        .unwrap();

        let err = h.engine.apply_replica(op).await.unwrap_err();
        assert!(err.is_corruption());
        assert!(h.wal.is_empty());
    }

    #[tokio::test]
    async fn test_replication_hand_off() {
        let h = harness("a").await;
        h.engine.put("k1", "v").await.unwrap();
        h.engine.delete("k1").await.unwrap();
        h.engine.apply_replica(put("k2", "v", "b", 1)).await.unwrap();

        let handed = h.replicator.ops();
        assert_eq!(handed.len(), 2, "replica applies are not re-replicated");
        assert!(handed[0].is_put());
        assert!(handed[1].is_delete());

        let mut config = EngineConfig::new("a");
        config.enable_replication = false;
        let quiet = harness_with(config, MemoryWal::new()).await;
        quiet.engine.put("k", "v").await.unwrap();
        assert!(quiet.replicator.is_empty());
    }

    #[tokio::test]
    async fn test_recovery_restores_state_and_sequence() {
        let log = vec![
            put("x", "1", "a", 1),
            put("y", "2", "b", 9),
            put("x", "3", "a", 2),
            del("y", "a", 3),
            put("z", "4", "b", 1),
        ];
        let h = harness_with(EngineConfig::new("a"), MemoryWal::with_ops(log)).await;

        assert_eq!(h.engine.get("x").await, Some(Bytes::from("3")));
        // b@9 beats a@3, so the delete lost
        assert_eq!(h.engine.get("y").await, Some(Bytes::from("2")));
        assert_eq!(h.engine.get("z").await, Some(Bytes::from("4")));

        // counter resumes after the highest local seq, not the global one
        assert_eq!(h.engine.current_seq(), 3);
        let v = h.engine.put("w", "5").await.unwrap();
        assert_eq!(v, Version::new("a", 4));
    }

    #[tokio::test]
    async fn test_import_of_own_history_advances_counter() {
        let h = harness("a").await;
        h.engine.import(put("k", "restored", "a", 40)).await.unwrap();
        assert_eq!(h.engine.current_seq(), 40);

        let v = h.engine.put("k", "next").await.unwrap();
        assert_eq!(v.seq, 41);
        assert_eq!(h.engine.get("k").await, Some(Bytes::from("next")));
    }

    #[tokio::test]
    async fn test_export_and_import_migrates_state() {
        let src = harness("a").await;
        src.engine.put("k1", "v1").await.unwrap();
        src.engine.put("k2", "v2").await.unwrap();
        src.engine.delete("k2").await.unwrap();

        let dst = harness("b").await;
        for op in src.engine.export_operations().await {
            dst.engine.import(op).await.unwrap();
        }

        assert_eq!(dst.engine.get("k1").await, Some(Bytes::from("v1")));
        assert_eq!(dst.engine.get("k2").await, None);
        assert!(dst.store.record("k2").unwrap().is_deleted());
        assert_eq!(dst.engine.len().await, 1);

        let mut visited = 0;
        src.engine
            .export(|_, _| {
                visited += 1;
                false
            })
            .await;
        assert_eq!(visited, 1);
    }

    #[tokio::test]
    async fn test_concurrent_local_writes_get_unique_versions() {
        let h = harness("a").await;
        let engine = Arc::new(h.engine);

        let mut tasks = Vec::new();
        for t in 0..8 {
            let engine = Arc::clone(&engine);
            tasks.push(tokio::spawn(async move {
                let mut seqs = Vec::new();
                for i in 0..50 {
                    let v = engine.put(&format!("k{}", i % 5), format!("t{}-{}", t, i)).await.unwrap();
                    seqs.push(v.seq);
                }
                seqs
            }));
        }

        let mut all = Vec::new();
        for task in tasks {
            all.extend(task.await.unwrap());
        }
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 400);
        assert_eq!(engine.current_seq(), 400);

        // every key ends on its highest-versioned write
        for i in 0..5 {
            let key = format!("k{}", i);
            let winner = h
                .wal
                .ops()
                .into_iter()
                .filter(|op| op.key() == key)
                .max_by(|a, b| a.version().cmp(b.version()))
                .unwrap();
            assert_eq!(engine.get(&key).await.as_ref(), winner.value());
        }
    }

    #[tokio::test]
    async fn test_closed_engine_rejects_writes() {
        let h = harness("a").await;
        h.engine.close().await.unwrap();
        assert!(matches!(h.engine.put("k", "v").await, Err(Error::WalClosed)));
    }
}
