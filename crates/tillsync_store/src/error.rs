//! Error types for store operations.

use std::io;
use thiserror::Error;
use tillsync_protocol::SyncGuid;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store cannot be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A record expected to exist is missing.
    #[error("{entity_type} record {guid} not found")]
    NotFound {
        /// Entity type that was searched.
        entity_type: String,
        /// Identity that was searched for.
        guid: SyncGuid,
    },

    /// A record body could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The store refused the write.
    #[error("write rejected: {0}")]
    Rejected(String),
}

impl StoreError {
    /// Returns true if retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Io(_))
    }
}
