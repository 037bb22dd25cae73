//! Version, Operation and Record Types
//!
//! Defines the total order over writes and the vocabulary of
//! state-mutating operations that flow through the WAL and
//! replication.

use std::cmp::Ordering;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Identifier of a physical node in the cluster
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Version of a single write.
///
/// Ordered by `seq` first, then by `node_id`. The ordering decides
/// which write wins for a key; it is never used to order locks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Version {
    /// Node that issued the write
    pub node_id: NodeId,
    /// Per-node sequence number, strictly increasing for local writes
    pub seq: u64,
}

impl Version {
    pub fn new(node_id: impl Into<NodeId>, seq: u64) -> Self {
        Self {
            node_id: node_id.into(),
            seq,
        }
    }

    /// True if `self` is strictly newer than `other`
    pub fn greater_than(&self, other: &Version) -> bool {
        self.cmp(other) == Ordering::Greater
    }

    /// True if `self` is strictly older than `other`
    pub fn less_than(&self, other: &Version) -> bool {
        self.cmp(other) == Ordering::Less
    }

    /// True if both versions identify the same write
    pub fn equal(&self, other: &Version) -> bool {
        self.seq == other.seq && self.node_id == other.node_id
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.seq
            .cmp(&other.seq)
            .then_with(|| self.node_id.cmp(&other.node_id))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.seq, self.node_id)
    }
}

/// Kind of state-mutating operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpKind {
    /// Insert or overwrite a value
    Put,
    /// Logical delete (tombstone)
    Delete,
}

impl std::fmt::Display for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpKind::Put => write!(f, "PUT"),
            OpKind::Delete => write!(f, "DELETE"),
        }
    }
}

/// A single write, the unit of durability and replication.
///
/// Fields are private so an operation cannot change after it is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    kind: OpKind,
    key: String,
    value: Option<Bytes>,
    version: Version,
}

impl Operation {
    /// Build a put operation
    pub fn put(key: impl Into<String>, value: impl Into<Bytes>, version: Version) -> Self {
        Self {
            kind: OpKind::Put,
            key: key.into(),
            value: Some(value.into()),
            version,
        }
    }

    /// Build a delete (tombstone) operation
    pub fn delete(key: impl Into<String>, version: Version) -> Self {
        Self {
            kind: OpKind::Delete,
            key: key.into(),
            value: None,
            version,
        }
    }

    pub fn kind(&self) -> OpKind {
        self.kind
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> Option<&Bytes> {
        self.value.as_ref()
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn is_put(&self) -> bool {
        self.kind == OpKind::Put
    }

    pub fn is_delete(&self) -> bool {
        self.kind == OpKind::Delete
    }

    /// Check that the payload matches the kind.
    ///
    /// Operations read back from a log or received from a peer may not
    /// have gone through the constructors above.
    pub fn validate(&self) -> Result<()> {
        let reason = match (self.kind, &self.value) {
            (OpKind::Put, None) => "put without value",
            (OpKind::Delete, Some(_)) => "delete carrying a value",
            _ => return Ok(()),
        };
        Err(Error::CorruptOperation {
            key: self.key.clone(),
            reason: reason.to_string(),
        })
    }

    /// Fold this operation into the record it produces
    pub fn to_record(&self) -> Result<Record> {
        match (self.kind, &self.value) {
            (OpKind::Put, Some(value)) => Ok(Record::live(value.clone(), self.version.clone())),
            (OpKind::Delete, None) => Ok(Record::tombstone(self.version.clone())),
            _ => {
                self.validate()?;
                Err(Error::Internal("validated operation failed to fold".into()))
            }
        }
    }
}

/// Latest known state for a key. Not history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub value: Bytes,
    pub version: Version,
    pub tombstone: bool,
}

impl Record {
    pub fn live(value: Bytes, version: Version) -> Self {
        Self {
            value,
            version,
            tombstone: false,
        }
    }

    pub fn tombstone(version: Version) -> Self {
        Self {
            value: Bytes::new(),
            version,
            tombstone: true,
        }
    }

    /// A tombstoned record is absent to readers, whatever bytes it still holds
    pub fn is_deleted(&self) -> bool {
        self.tombstone
    }
}
