//! WolfKV Configuration
//!
//! Configuration structures for a WolfKV node, loaded from TOML.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::cluster::{NodeId, ReadConsistency, SelectorConfig, WriteConsistency};
use crate::kv::EngineConfig;
use crate::replication::ReplicationConfig;

/// Main WolfKV configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WolfKvConfig {
    /// Node-specific configuration
    pub node: NodeConfig,

    /// Write-Ahead Log configuration
    #[serde(default)]
    pub wal: WalConfig,

    /// State machine configuration
    #[serde(default)]
    pub engine: EngineSection,

    /// Ring and routing configuration
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Replication fan-out configuration
    #[serde(default)]
    pub replication: ReplicationSection,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Node-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Unique node identifier, also the node's name on the ring
    pub id: String,

    /// Data directory for the WAL
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// Write-Ahead Log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalConfig {
    /// Enable LZ4 compression for WAL entries
    #[serde(default = "default_compression")]
    pub compression: bool,

    /// Maximum segment size in megabytes
    #[serde(default = "default_segment_size_mb")]
    pub segment_size_mb: u64,
}

/// `[engine]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSection {
    /// Sync the WAL before a write becomes visible
    #[serde(default = "default_true")]
    pub sync_writes: bool,

    /// Hand local writes to the replicator
    #[serde(default = "default_true")]
    pub enable_replication: bool,
}

/// A physical node on the ring
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemberConfig {
    pub id: String,

    /// Number of virtual positions
    #[serde(default = "default_weight")]
    pub weight: u32,
}

/// Ring and routing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Number of distinct nodes holding each key
    #[serde(default = "default_replication_factor")]
    pub replication_factor: usize,

    #[serde(default)]
    pub read_consistency: ReadConsistency,

    #[serde(default)]
    pub write_consistency: WriteConsistency,

    /// A peer without a heartbeat for this long is unhealthy
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,

    /// Ring members; empty means this node alone
    #[serde(default)]
    pub members: Vec<MemberConfig>,
}

/// `[replication]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationSection {
    /// Operations buffered between the engine and the fan-out worker
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Delivery attempts per target before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff step between attempts in milliseconds
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/wolfkv")
}

fn default_compression() -> bool {
    true
}

fn default_segment_size_mb() -> u64 {
    64
}

fn default_true() -> bool {
    true
}

fn default_weight() -> u32 {
    64
}

fn default_replication_factor() -> usize {
    3
}

fn default_heartbeat_timeout_ms() -> u64 {
    1500
}

fn default_queue_capacity() -> usize {
    10_000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    100
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            compression: default_compression(),
            segment_size_mb: default_segment_size_mb(),
        }
    }
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            sync_writes: true,
            enable_replication: true,
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            replication_factor: default_replication_factor(),
            read_consistency: ReadConsistency::default(),
            write_consistency: WriteConsistency::default(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            members: Vec::new(),
        }
    }
}

impl Default for ReplicationSection {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl WolfKvConfig {
    /// Minimal configuration for a single node
    pub fn single_node(id: &str, data_dir: PathBuf) -> Self {
        Self {
            node: NodeConfig {
                id: id.to_string(),
                data_dir,
            },
            wal: WalConfig::default(),
            engine: EngineSection::default(),
            cluster: ClusterConfig::default(),
            replication: ReplicationSection::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: WolfKvConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize back to TOML
    pub fn to_toml(&self) -> crate::Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| crate::Error::Config(format!("cannot serialize configuration: {}", e)))
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.node.id.is_empty() {
            return Err(crate::Error::Config("node.id cannot be empty".into()));
        }

        if self.cluster.replication_factor == 0 {
            return Err(crate::Error::Config(
                "cluster.replication_factor must be at least 1".into(),
            ));
        }

        let mut seen = HashSet::new();
        for member in &self.cluster.members {
            if member.id.is_empty() {
                return Err(crate::Error::Config("cluster.members id cannot be empty".into()));
            }
            if member.weight == 0 {
                return Err(crate::Error::Config(format!(
                    "cluster member '{}' has zero weight",
                    member.id
                )));
            }
            if !seen.insert(member.id.as_str()) {
                return Err(crate::Error::Config(format!(
                    "cluster member '{}' listed twice",
                    member.id
                )));
            }
        }

        if !self.cluster.members.is_empty() && !seen.contains(self.node.id.as_str()) {
            return Err(crate::Error::Config(format!(
                "node.id '{}' is not listed in cluster.members",
                self.node.id
            )));
        }

        if self.replication.queue_capacity == 0 {
            return Err(crate::Error::Config(
                "replication.queue_capacity must be at least 1".into(),
            ));
        }

        if self.replication.max_attempts == 0 {
            return Err(crate::Error::Config(
                "replication.max_attempts must be at least 1".into(),
            ));
        }

        Ok(())
    }

    /// This node's identity on the ring
    pub fn node_id(&self) -> NodeId {
        NodeId::new(self.node.id.clone())
    }

    /// Get the WAL directory path
    pub fn wal_dir(&self) -> PathBuf {
        self.node.data_dir.join("wal")
    }

    /// Ring members, defaulting to this node alone
    pub fn ring_members(&self) -> Vec<MemberConfig> {
        if self.cluster.members.is_empty() {
            vec![MemberConfig {
                id: self.node.id.clone(),
                weight: default_weight(),
            }]
        } else {
            self.cluster.members.clone()
        }
    }

    /// Get heartbeat timeout as Duration
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.cluster.heartbeat_timeout_ms)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            node_id: self.node_id(),
            sync_writes: self.engine.sync_writes,
            enable_replication: self.engine.enable_replication,
        }
    }

    pub fn selector_config(&self) -> SelectorConfig {
        SelectorConfig {
            replication_factor: self.cluster.replication_factor,
            read_consistency: self.cluster.read_consistency,
            write_consistency: self.cluster.write_consistency,
        }
    }

    pub fn replication_config(&self) -> ReplicationConfig {
        ReplicationConfig {
            queue_capacity: self.replication.queue_capacity,
            max_attempts: self.replication.max_attempts,
            retry_backoff: Duration::from_millis(self.replication.retry_backoff_ms),
        }
    }
}
