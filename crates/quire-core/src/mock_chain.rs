//! Mock chain client for testing
//!
//! An in-memory [`ChainClient`] that records every composite write and
//! serves per-(schema, publisher) fixtures for reads. Failures and latency
//! can be injected per publisher so batching, serialization and fan-out
//! behaviour can be exercised without a real network.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use quire_core::{MockChainClient, PublisherAddress, SchemaId};
//!
//! let chain = MockChainClient::new();
//! let alice = PublisherAddress::from_bytes([0xaa; 20]);
//! let schema = SchemaId::new("0x01");
//!
//! chain.insert_records(&schema, &alice, vec![record]);
//! let records = chain.get_all_publisher_data_for_schema(&schema, &alice).await?;
//! assert_eq!(chain.read_count(), 1);
//! ```

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::error::ChainError;
use crate::identity::{PublisherAddress, SignerHandle};
use crate::schema::{DataItem, RawRecord, SchemaDescriptor, SchemaId, TxHandle};
use crate::traits::ChainClient;

/// A recorded `set()` call
#[derive(Debug, Clone)]
pub struct SetCall {
    /// Signer that submitted the write
    pub signer: SignerHandle,
    /// Items carried by the composite write
    pub items: Vec<DataItem>,
    /// When the call entered the client
    pub started_at: Instant,
    /// When the call returned
    pub finished_at: Instant,
    /// Whether the call succeeded
    pub succeeded: bool,
}

/// In-memory chain client
#[derive(Debug, Default)]
pub struct MockChainClient {
    /// Stored records per (schema, publisher)
    records: DashMap<(SchemaId, PublisherAddress), Vec<RawRecord>>,
    /// Every completed `set()` call, in completion order
    set_calls: Mutex<Vec<SetCall>>,
    /// Publishers whose reads fail with the given error
    read_failures: DashMap<PublisherAddress, ChainError>,
    /// Signers whose writes fail with the given error
    write_failures: DashMap<PublisherAddress, ChainError>,
    /// Publishers queried, in call order
    read_log: Mutex<Vec<PublisherAddress>>,
    /// Artificial latency applied to reads
    read_latency: Mutex<Option<Duration>>,
    /// Artificial latency applied to writes
    write_latency: Mutex<Option<Duration>>,
    /// Writes currently executing, per signer address
    in_flight: Mutex<HashMap<PublisherAddress, usize>>,
    /// Highest number of overlapping writes seen for any single signer
    max_in_flight_per_signer: AtomicUsize,
    /// Highest number of overlapping writes seen overall
    max_in_flight_total: AtomicUsize,
    read_count: AtomicUsize,
    schema_id_calls: AtomicUsize,
    next_tx: AtomicU64,
}

impl MockChainClient {
    /// Create an empty mock chain
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed records for a (schema, publisher) pair
    pub fn insert_records(
        &self,
        schema_id: &SchemaId,
        publisher: &PublisherAddress,
        records: Vec<RawRecord>,
    ) {
        self.records
            .entry((schema_id.clone(), publisher.clone()))
            .or_default()
            .extend(records);
    }

    /// Make every read of `publisher` fail with `error`
    pub fn fail_reads_for(&self, publisher: &PublisherAddress, error: ChainError) {
        self.read_failures.insert(publisher.clone(), error);
    }

    /// Make every write signed as `publisher` fail with `error`
    pub fn fail_writes_for(&self, publisher: &PublisherAddress, error: ChainError) {
        self.write_failures.insert(publisher.clone(), error);
    }

    /// Remove all injected failures
    pub fn clear_failures(&self) {
        self.read_failures.clear();
        self.write_failures.clear();
    }

    /// Delay every read by `latency`
    pub fn set_read_latency(&self, latency: Duration) {
        *self.read_latency.lock() = Some(latency);
    }

    /// Delay every write by `latency`
    pub fn set_write_latency(&self, latency: Duration) {
        *self.write_latency.lock() = Some(latency);
    }

    /// All completed writes, in completion order
    pub fn set_calls(&self) -> Vec<SetCall> {
        self.set_calls.lock().clone()
    }

    /// Completed writes signed as `publisher`
    pub fn set_calls_for(&self, publisher: &PublisherAddress) -> Vec<SetCall> {
        self.set_calls
            .lock()
            .iter()
            .filter(|call| &call.signer.address == publisher)
            .cloned()
            .collect()
    }

    /// Number of per-publisher reads issued
    pub fn read_count(&self) -> usize {
        self.read_count.load(Ordering::SeqCst)
    }

    /// Publishers queried, in call order
    pub fn read_log(&self) -> Vec<PublisherAddress> {
        self.read_log.lock().clone()
    }

    /// Number of schema id derivations
    pub fn schema_id_calls(&self) -> usize {
        self.schema_id_calls.load(Ordering::SeqCst)
    }

    /// Highest overlap of writes for a single signer
    pub fn max_in_flight_per_signer(&self) -> usize {
        self.max_in_flight_per_signer.load(Ordering::SeqCst)
    }

    /// Highest overlap of writes across all signers
    pub fn max_in_flight_total(&self) -> usize {
        self.max_in_flight_total.load(Ordering::SeqCst)
    }

    fn enter_write(&self, signer: &PublisherAddress) {
        let mut in_flight = self.in_flight.lock();
        let count = in_flight.entry(signer.clone()).or_insert(0);
        *count += 1;
        let per_signer = *count;
        let total: usize = in_flight.values().sum();
        self.max_in_flight_per_signer
            .fetch_max(per_signer, Ordering::SeqCst);
        self.max_in_flight_total.fetch_max(total, Ordering::SeqCst);
    }

    fn exit_write(&self, signer: &PublisherAddress) {
        let mut in_flight = self.in_flight.lock();
        if let Some(count) = in_flight.get_mut(signer) {
            *count = count.saturating_sub(1);
        }
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn compute_schema_id(
        &self,
        descriptor: &SchemaDescriptor,
    ) -> Result<SchemaId, ChainError> {
        if descriptor.as_str().trim().is_empty() {
            return Err(ChainError::InvalidSchema("empty descriptor".into()));
        }
        self.schema_id_calls.fetch_add(1, Ordering::SeqCst);

        let mut hasher = DefaultHasher::new();
        descriptor.as_str().hash(&mut hasher);
        Ok(SchemaId::new(format!("0x{:064x}", hasher.finish())))
    }

    async fn set(
        &self,
        signer: &SignerHandle,
        items: Vec<DataItem>,
    ) -> Result<TxHandle, ChainError> {
        let started_at = Instant::now();
        self.enter_write(&signer.address);

        let latency = *self.write_latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let result = match self.write_failures.get(&signer.address) {
            Some(err) => Err(err.clone()),
            None => {
                let n = self.next_tx.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(TxHandle::new(format!("0x{:064x}", n)))
            }
        };

        self.exit_write(&signer.address);
        self.set_calls.lock().push(SetCall {
            signer: signer.clone(),
            items,
            started_at,
            finished_at: Instant::now(),
            succeeded: result.is_ok(),
        });

        result
    }

    async fn get_all_publisher_data_for_schema(
        &self,
        schema_id: &SchemaId,
        publisher: &PublisherAddress,
    ) -> Result<Vec<RawRecord>, ChainError> {
        self.read_count.fetch_add(1, Ordering::SeqCst);
        self.read_log.lock().push(publisher.clone());

        let latency = *self.read_latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        if let Some(err) = self.read_failures.get(publisher) {
            return Err(err.clone());
        }

        self.records
            .get(&(schema_id.clone(), publisher.clone()))
            .map(|records| records.clone())
            .ok_or_else(|| ChainError::NoData {
                schema: schema_id.to_string(),
                publisher: publisher.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{RawField, RecordId};

    fn alice() -> PublisherAddress {
        PublisherAddress::from_bytes([0xaa; 20])
    }

    #[tokio::test]
    async fn test_unknown_pair_is_no_data() {
        let chain = MockChainClient::new();
        let err = chain
            .get_all_publisher_data_for_schema(&SchemaId::new("0x01"), &alice())
            .await
            .unwrap_err();
        assert!(err.is_no_data());
        assert_eq!(chain.read_count(), 1);
        assert_eq!(chain.read_log(), vec![alice()]);
    }

    #[tokio::test]
    async fn test_seeded_records_are_returned() {
        let chain = MockChainClient::new();
        let schema = SchemaId::new("0x01");
        let record = RawRecord::new(vec![RawField::new("id", "uint64", 1.into())]);
        chain.insert_records(&schema, &alice(), vec![record.clone()]);

        let records = chain
            .get_all_publisher_data_for_schema(&schema, &alice())
            .await
            .unwrap();
        assert_eq!(records, vec![record]);
    }

    #[tokio::test]
    async fn test_set_records_calls_and_failures() {
        let chain = MockChainClient::new();
        let signer = SignerHandle::new(alice(), "k");
        let item = DataItem::new(SchemaId::new("0x01"), RecordId::new("r1"), vec![1u8, 2]);

        let tx = chain.set(&signer, vec![item.clone()]).await.unwrap();
        assert!(tx.hash.starts_with("0x"));

        chain.fail_writes_for(&alice(), ChainError::Rejected("nonce too low".into()));
        assert!(chain.set(&signer, vec![item]).await.is_err());

        let calls = chain.set_calls_for(&alice());
        assert_eq!(calls.len(), 2);
        assert!(calls[0].succeeded);
        assert!(!calls[1].succeeded);
        assert_eq!(chain.max_in_flight_per_signer(), 1);
    }

    #[tokio::test]
    async fn test_schema_id_is_deterministic() {
        let chain = MockChainClient::new();
        let descriptor = SchemaDescriptor::new("uint64 id, bool deleted");
        let a = chain.compute_schema_id(&descriptor).await.unwrap();
        let b = chain.compute_schema_id(&descriptor).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(chain.schema_id_calls(), 2);

        assert!(
            chain
                .compute_schema_id(&SchemaDescriptor::new("  "))
                .await
                .is_err()
        );
    }
}
