//! WolfKV Error Types

use thiserror::Error;

/// Result type alias for WolfKV operations
pub type Result<T> = std::result::Result<T, Error>;

/// WolfKV error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // WAL errors
    #[error("WAL error: {0}")]
    Wal(String),

    #[error("WAL corrupted in segment {segment} at offset {offset}: {reason}")]
    WalCorrupted {
        segment: u64,
        offset: u64,
        reason: String,
    },

    #[error("WAL serialization error: {0}")]
    WalSerialization(#[from] bincode::Error),

    #[error("WAL is closed")]
    WalClosed,

    // Data errors
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Corrupt operation for key {key}: {reason}")]
    CorruptOperation { key: String, reason: String },

    // Routing errors
    #[error("No healthy target for key {0}")]
    Unavailable(String),

    // Replication errors
    #[error("Replication error: {0}")]
    Replication(String),

    #[error("Unknown node: {0}")]
    UnknownNode(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Unavailable(_) | Error::Replication(_) | Error::UnknownNode(_)
        )
    }

    /// Check if this error means the operation stream can no longer be trusted
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Error::CorruptOperation { .. } | Error::WalCorrupted { .. }
        )
    }
}
