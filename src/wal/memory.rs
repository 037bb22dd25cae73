//! In-memory WAL
//!
//! Keeps operations in a `Vec`. Appends and syncs can be told to fail,
//! which lets tests drive the engine's durability paths.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use super::Wal;
use crate::error::{Error, Result};
use crate::kv::Operation;

#[derive(Default)]
pub struct MemoryWal {
    ops: Mutex<Vec<Operation>>,
    syncs: AtomicUsize,
    fail_appends: AtomicBool,
    fail_syncs: AtomicBool,
    closed: AtomicBool,
}

impl MemoryWal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with a log that already holds `ops`
    pub fn with_ops(ops: Vec<Operation>) -> Self {
        Self {
            ops: Mutex::new(ops),
            ..Self::default()
        }
    }

    pub fn set_fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_syncs(&self, fail: bool) {
        self.fail_syncs.store(fail, Ordering::SeqCst);
    }

    /// Snapshot of the logged operations
    pub fn ops(&self) -> Vec<Operation> {
        self.ops.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn len(&self) -> usize {
        self.ops.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of successful syncs
    pub fn sync_count(&self) -> usize {
        self.syncs.load(Ordering::SeqCst)
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::WalClosed);
        }
        Ok(())
    }
}

#[async_trait]
impl Wal for MemoryWal {
    async fn append(&self, op: &Operation) -> Result<()> {
        self.check_open()?;
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(Error::Wal("injected append failure".into()));
        }
        self.ops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(op.clone());
        Ok(())
    }

    async fn replay(&self) -> Result<Vec<Operation>> {
        self.check_open()?;
        Ok(self.ops())
    }

    async fn sync(&self) -> Result<()> {
        self.check_open()?;
        if self.fail_syncs.load(Ordering::SeqCst) {
            return Err(Error::Wal("injected sync failure".into()));
        }
        self.syncs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::Version;

    #[tokio::test]
    async fn test_failure_injection() {
        let wal = MemoryWal::new();
        let op = Operation::put("k", "v", Version::new("n", 1));

        wal.append(&op).await.unwrap();
        wal.set_fail_appends(true);
        assert!(wal.append(&op).await.is_err());
        assert_eq!(wal.len(), 1);

        wal.set_fail_syncs(true);
        assert!(wal.sync().await.is_err());
        wal.set_fail_syncs(false);
        wal.sync().await.unwrap();
        assert_eq!(wal.sync_count(), 1);

        wal.close().await.unwrap();
        assert!(matches!(wal.replay().await, Err(Error::WalClosed)));
    }
}
