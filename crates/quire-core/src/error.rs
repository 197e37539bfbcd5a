//! Error types for Quire

use thiserror::Error;

/// Top-level error type for Quire
#[derive(Debug, Error)]
pub enum QuireError {
    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
}

/// Errors related to publisher and signer identities
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("Invalid identity format: {0}")]
    InvalidFormat(String),

    #[error("Invalid address length: expected {expected} hex chars, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// Errors reported by the chain client collaborator
///
/// `NoData` is the benign "nothing stored for this publisher" condition.
/// Readers normalize it to an empty result instead of surfacing it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    #[error("No data stored for schema {schema} by {publisher}")]
    NoData { schema: String, publisher: String },

    #[error("Chain request timed out: {0}")]
    Timeout(String),

    #[error("Transaction rejected: {0}")]
    Rejected(String),

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),
}

impl ChainError {
    /// Whether this is the benign empty-result condition
    pub fn is_no_data(&self) -> bool {
        matches!(self, ChainError::NoData { .. })
    }

    /// Whether this is a timeout (only used to pick a log line)
    pub fn is_timeout(&self) -> bool {
        matches!(self, ChainError::Timeout(_))
    }
}

/// Errors related to local durable storage
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    Io(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

impl StorageError {
    /// Create a new NotFound error
    pub fn not_found(item: impl Into<String>) -> Self {
        Self::NotFound(item.into())
    }

    /// Create a new Serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization(message.into())
    }

    /// Create a new Deserialization error
    pub fn deserialization(message: impl Into<String>) -> Self {
        Self::Deserialization(message.into())
    }

    /// Create a new I/O error
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io(message.into())
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

/// Errors raised while mapping a raw record onto a typed layout
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Field {field} is not a valid {expected}")]
    InvalidType { field: String, expected: &'static str },
}

/// Result type alias for Quire operations
pub type QuireResult<T> = Result<T, QuireError>;
