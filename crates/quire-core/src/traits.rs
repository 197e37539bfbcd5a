//! Collaborator traits
//!
//! The sync layer is written against these two seams so tests can supply
//! fakes and applications can plug in their own chain client and storage.
//!
//! - [`ChainClient`]: the metered keyed store
//! - [`DurableStore`]: small local key/value persistence

use async_trait::async_trait;

use crate::error::{ChainError, StorageError};
use crate::identity::{PublisherAddress, SignerHandle};
use crate::schema::{DataItem, RawRecord, SchemaDescriptor, SchemaId, TxHandle};

/// The external chain client
///
/// Timeouts are the client's responsibility; they come back as
/// [`ChainError::Timeout`] and are treated like any other failure.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Derive the id of a schema
    async fn compute_schema_id(
        &self,
        descriptor: &SchemaDescriptor,
    ) -> Result<SchemaId, ChainError>;

    /// Submit one composite write signed by `signer`
    ///
    /// All items land in a single atomic transaction.
    async fn set(&self, signer: &SignerHandle, items: Vec<DataItem>)
    -> Result<TxHandle, ChainError>;

    /// Read every record `publisher` has stored under `schema_id`
    ///
    /// Returns [`ChainError::NoData`] when the publisher never wrote to the
    /// schema.
    async fn get_all_publisher_data_for_schema(
        &self,
        schema_id: &SchemaId,
        publisher: &PublisherAddress,
    ) -> Result<Vec<RawRecord>, ChainError>;
}

/// Local durable key/value storage
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Read a value, `None` if the key was never written
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Write (or overwrite) a value
    async fn set(&self, key: &str, value: String) -> Result<(), StorageError>;

    /// Remove a key; removing a missing key is not an error
    async fn remove(&self, key: &str) -> Result<(), StorageError>;
}
