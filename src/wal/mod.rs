//! Write-Ahead Log Module
//!
//! Append-only, replayable log of operations. The engine only sees the
//! `Wal` trait; `FileWal` is the on-disk implementation and `MemoryWal`
//! is the in-memory one used by tests.

mod file;
mod memory;
mod segment;

pub use file::FileWal;
pub use memory::MemoryWal;

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::Result;
use crate::kv::Operation;

/// Durable, ordered log of operations
#[async_trait]
pub trait Wal: Send + Sync {
    /// Record `op` after every previously appended operation
    async fn append(&self, op: &Operation) -> Result<()>;

    /// Every appended operation, in append order
    async fn replay(&self) -> Result<Vec<Operation>>;

    /// Force prior appends to stable storage
    async fn sync(&self) -> Result<()>;

    /// Release underlying resources
    async fn close(&self) -> Result<()>;
}

/// WAL directory structure
pub struct WalPaths {
    pub base_dir: PathBuf,
}

impl WalPaths {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Path for the segment whose first entry has the given index
    pub fn segment_path(&self, first_index: u64) -> PathBuf {
        self.base_dir.join(format!("wal_{:020}.log", first_index))
    }

    /// Ensure WAL directory exists
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.base_dir)
    }
}
