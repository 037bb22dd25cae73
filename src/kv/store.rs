//! Materialized Store
//!
//! Keyed storage of the latest `Record` per key. Ordering is decided by
//! the engine; the in-memory implementation only refuses to move a key
//! backwards.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use super::types::Record;

/// Current-state storage consumed by the engine
pub trait Store: Send + Sync {
    /// Live record for `key`; `None` when missing or tombstoned
    fn get(&self, key: &str) -> Option<Record>;

    /// Raw record for `key`, tombstones included
    fn record(&self, key: &str) -> Option<Record>;

    /// Install `record` for `key`
    fn put(&self, key: &str, record: Record);

    /// Tombstone `key` in place, keeping its version
    fn delete(&self, key: &str);

    /// Visit every record until the visitor returns `false`
    fn scan(&self, visitor: &mut dyn FnMut(&str, &Record) -> bool);
}

/// `HashMap`-backed store behind a read/write lock
#[derive(Default)]
pub struct MemStore {
    data: RwLock<HashMap<String, Record>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries, tombstones included
    pub fn len(&self) -> usize {
        self.data.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Store for MemStore {
    fn get(&self, key: &str) -> Option<Record> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        data.get(key).filter(|rec| !rec.is_deleted()).cloned()
    }

    fn record(&self, key: &str) -> Option<Record> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        data.get(key).cloned()
    }

    fn put(&self, key: &str, record: Record) {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = data.get(key) {
            if !record.version.greater_than(&existing.version) {
                tracing::trace!(
                    "store: ignoring {} for '{}', holding {}",
                    record.version,
                    key,
                    existing.version
                );
                return;
            }
        }
        data.insert(key.to_string(), record);
    }

    fn delete(&self, key: &str) {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = data.get_mut(key) {
            existing.tombstone = true;
        }
    }

    fn scan(&self, visitor: &mut dyn FnMut(&str, &Record) -> bool) {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        for (key, record) in data.iter() {
            if !visitor(key, record) {
                return;
            }
        }
    }
}
