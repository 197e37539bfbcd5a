//! Error types for the sync layer

use quire_core::{ChainError, DecodeError, IdentityError, PublisherAddress, StorageError};
use thiserror::Error;

/// Errors surfaced to callers of the sync layer
///
/// `Clone` so a single group failure can be delivered to every caller whose
/// entry rode in that group, and to every reader sharing a coalesced fetch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("No signer available to write as publisher {publisher}")]
    MissingSigner { publisher: PublisherAddress },

    #[error("Signer {signer} cannot write as publisher {publisher}")]
    SignerMismatch {
        publisher: PublisherAddress,
        signer: PublisherAddress,
    },

    #[error("Transaction queue was cleared before the task ran")]
    QueueCleared,

    #[error("Worker stopped before the task completed")]
    WorkerStopped,

    #[error("Schema not registered: {0}")]
    UnknownSchema(String),

    #[error("Sync layer is shutting down")]
    ShuttingDown,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
}

impl SyncError {
    /// Whether the error came from the chain client timing out
    pub fn is_timeout(&self) -> bool {
        matches!(self, SyncError::Chain(e) if e.is_timeout())
    }
}

/// Result type alias for sync operations
pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_error_converts() {
        let err: SyncError = ChainError::Timeout("set".into()).into();
        assert!(err.is_timeout());
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn test_missing_signer_names_publisher() {
        let publisher = PublisherAddress::from_bytes([0xbb; 20]);
        let err = SyncError::MissingSigner {
            publisher: publisher.clone(),
        };
        assert!(err.to_string().contains(publisher.as_str()));
        assert_eq!(err.clone(), err);
    }
}
