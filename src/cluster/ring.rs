//! Consistent Hash Ring
//!
//! Maps keys onto weighted virtual node positions. A physical node of
//! weight `w` owns the `w` positions hashed from `"<id>#0"` through
//! `"<id>#<w-1>"`; a key belongs to the first position at or after its
//! own hash, wrapping around to the start of the ring.

use std::sync::{PoisonError, RwLock};

use super::NodeId;

/// One virtual position on the ring
#[derive(Debug, Clone, PartialEq, Eq)]
struct RingEntry {
    hash: u32,
    id: NodeId,
}

/// Weighted consistent-hash ring
#[derive(Default)]
pub struct HashRing {
    /// Sorted by `(hash, id)`
    entries: RwLock<Vec<RingEntry>>,
}

impl HashRing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a ring from `(id, weight)` pairs
    pub fn with_nodes<I, N>(nodes: I) -> Self
    where
        I: IntoIterator<Item = (N, u32)>,
        N: Into<NodeId>,
    {
        let ring = Self::new();
        for (id, weight) in nodes {
            ring.add_node(id, weight);
        }
        ring
    }

    /// Place `weight` virtual positions for `id`.
    ///
    /// Adding a node that is already present replaces its positions, so
    /// re-adding is idempotent and can change the weight.
    pub fn add_node(&self, id: impl Into<NodeId>, weight: u32) {
        let id = id.into();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);

        let before = entries.len();
        entries.retain(|e| e.id != id);
        if entries.len() != before {
            tracing::debug!("ring: replacing {} positions of {}", before - entries.len(), id);
        }

        entries.reserve(weight as usize);
        for i in 0..weight {
            entries.push(RingEntry {
                hash: hash_key(&format!("{}#{}", id, i)),
                id: id.clone(),
            });
        }

        entries.sort_by(|a, b| a.hash.cmp(&b.hash).then_with(|| a.id.cmp(&b.id)));
        tracing::debug!("ring: added {} with weight {}, {} positions total", id, weight, entries.len());
    }

    /// Remove every position of `id`. Returns false if it was not present.
    pub fn remove_node(&self, id: &NodeId) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        // retain keeps the relative order of the survivors
        entries.retain(|e| &e.id != id);

        let removed = before - entries.len();
        if removed > 0 {
            tracing::debug!("ring: removed {} ({} positions)", id, removed);
        }
        removed > 0
    }

    /// Node owning `key`, or `None` on an empty ring
    pub fn primary(&self, key: &str) -> Option<NodeId> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        if entries.is_empty() {
            return None;
        }
        let idx = successor(&entries, hash_key(key));
        Some(entries[idx].id.clone())
    }

    /// Up to `n` distinct physical nodes for `key`, primary first
    pub fn replicas(&self, key: &str, n: usize) -> Vec<NodeId> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        if entries.is_empty() || n == 0 {
            return Vec::new();
        }

        let start = successor(&entries, hash_key(key));
        let mut replicas: Vec<NodeId> = Vec::with_capacity(n);
        for offset in 0..entries.len() {
            let entry = &entries[(start + offset) % entries.len()];
            if !replicas.contains(&entry.id) {
                replicas.push(entry.id.clone());
                if replicas.len() == n {
                    break;
                }
            }
        }
        replicas
    }

    /// Distinct physical nodes on the ring, sorted by id
    pub fn nodes(&self) -> Vec<NodeId> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut nodes: Vec<NodeId> = entries.iter().map(|e| e.id.clone()).collect();
        nodes.sort();
        nodes.dedup();
        nodes
    }

    /// Number of virtual positions
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Index of the first entry with hash >= `hash`, wrapping to 0
fn successor(entries: &[RingEntry], hash: u32) -> usize {
    let idx = entries.partition_point(|e| e.hash < hash);
    if idx == entries.len() {
        0
    } else {
        idx
    }
}

/// FNV-1a over the bytes, then the murmur3 finalizer.
///
/// Plain FNV-1a leaves labels that differ only in their last digits
/// bunched together on the ring; the finalizer spreads them out.
pub fn hash_key(key: &str) -> u32 {
    const FNV_OFFSET: u32 = 0x811c_9dc5;
    const FNV_PRIME: u32 = 0x0100_0193;

    let mut h = FNV_OFFSET;
    for byte in key.as_bytes() {
        h ^= *byte as u32;
        h = h.wrapping_mul(FNV_PRIME);
    }

    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;
    h
}
