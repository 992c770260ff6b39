//! Error types for the sync engine.

use thiserror::Error;
use tillsync_protocol::SyncErrorType;
use tillsync_store::StoreError;
use uuid::Uuid;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur inside the engine.
///
/// Sync runs never return these to callers directly; they are folded into
/// the run's [`SyncResult`](tillsync_protocol::SyncResult) as report
/// entries. They do surface from configuration, history and manual
/// conflict operations.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Invalid configuration or registration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Store failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// History log failure.
    #[error("history error: {0}")]
    History(String),

    /// Snapshot encoding failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No queued conflict with this id.
    #[error("no pending conflict with id {0}")]
    ConflictNotFound(Uuid),

    /// The entity type has no merge implementation.
    #[error("entity type {0} does not support merging")]
    MergeUnsupported(String),

    /// The entity type is not registered with this orchestrator.
    #[error("unknown entity type {0}")]
    UnknownEntityType(String),

    /// Another sync holds the single-flight lock.
    #[error("sync already in progress")]
    AlreadyRunning,

    /// The caller cancelled the operation.
    #[error("sync cancelled")]
    Cancelled,

    /// The operation ran out of time.
    #[error("operation timed out")]
    Timeout,
}

impl EngineError {
    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Store(e) => e.is_transient(),
            EngineError::Timeout => true,
            _ => false,
        }
    }

    /// Report category when this error ends an entity pass.
    pub fn error_type(&self) -> SyncErrorType {
        match self {
            EngineError::Store(e) if e.is_transient() => SyncErrorType::NetworkError,
            EngineError::Timeout => SyncErrorType::TimeoutError,
            EngineError::Cancelled => SyncErrorType::Cancelled,
            EngineError::MergeUnsupported(_) | EngineError::ConflictNotFound(_) => {
                SyncErrorType::ConflictError
            }
            _ => SyncErrorType::UnknownError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(EngineError::Store(StoreError::Unavailable("down".into())).is_retryable());
        assert!(!EngineError::Store(StoreError::Rejected("no".into())).is_retryable());
        assert!(EngineError::Timeout.is_retryable());
        assert!(!EngineError::Cancelled.is_retryable());
        assert!(!EngineError::AlreadyRunning.is_retryable());
    }

    #[test]
    fn error_categories() {
        assert_eq!(
            EngineError::Store(StoreError::Unavailable("down".into())).error_type(),
            SyncErrorType::NetworkError
        );
        assert_eq!(
            EngineError::Store(StoreError::Rejected("no".into())).error_type(),
            SyncErrorType::UnknownError
        );
        assert_eq!(EngineError::Cancelled.error_type(), SyncErrorType::Cancelled);
        assert_eq!(
            EngineError::Configuration("x".into()).error_type(),
            SyncErrorType::UnknownError
        );
    }

    #[test]
    fn error_display() {
        assert_eq!(EngineError::AlreadyRunning.to_string(), "sync already in progress");
        let id = Uuid::nil();
        assert!(EngineError::ConflictNotFound(id).to_string().contains(&id.to_string()));
    }
}
