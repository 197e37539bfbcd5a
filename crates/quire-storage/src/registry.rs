//! Publisher registry
//!
//! The durable set of known publisher addresses. There is no global index
//! on the chain, so this set is the fan-out seed for every read. It grows
//! from local writes and from authorship fields observed on reads, and it is
//! bounded by age-based [`PublisherRegistry::cleanup`].
//!
//! Every mutation persists the full registry as one JSON document under a
//! single [`DurableStore`] key; [`PublisherRegistry::load`] rehydrates it.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use quire_core::{DurableStore, PublisherAddress, StorageError};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Metadata about a known publisher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublisherRecord {
    /// Canonical publisher address
    pub address: PublisherAddress,
    /// Last time this publisher was involved in a read or write (Unix millis)
    pub last_activity_millis: i64,
    /// First time we saw this publisher (Unix millis)
    pub first_seen_millis: i64,
    /// Number of recorded activities
    #[serde(default)]
    pub count: u64,
}

impl PublisherRecord {
    /// Create a new record first seen at `at`
    pub fn new(address: PublisherAddress, at: DateTime<Utc>) -> Self {
        let millis = at.timestamp_millis();
        Self {
            address,
            last_activity_millis: millis,
            first_seen_millis: millis,
            count: 1,
        }
    }

    fn touch(&mut self, at: DateTime<Utc>) {
        self.last_activity_millis = self.last_activity_millis.max(at.timestamp_millis());
        self.count += 1;
    }
}

/// Durable registry of publishers
pub struct PublisherRegistry {
    records: DashMap<PublisherAddress, PublisherRecord>,
    store: Arc<dyn DurableStore>,
    /// Storage key holding the serialized registry
    storage_key: String,
    /// Serializes persistence so an older snapshot never lands after a newer one
    persist_lock: Mutex<()>,
}

impl std::fmt::Debug for PublisherRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublisherRegistry")
            .field("storage_key", &self.storage_key)
            .field("publishers", &self.records.len())
            .finish()
    }
}

impl PublisherRegistry {
    /// Load the registry from `store`, starting empty if nothing was saved
    ///
    /// A corrupt document is logged and discarded rather than failing
    /// startup; the registry regrows from reads and writes.
    pub async fn load(
        store: Arc<dyn DurableStore>,
        storage_key: impl Into<String>,
    ) -> Result<Self, StorageError> {
        let storage_key = storage_key.into();
        let records = DashMap::new();

        match store.get(&storage_key).await? {
            Some(raw) => match serde_json::from_str::<Vec<PublisherRecord>>(&raw) {
                Ok(saved) => {
                    for record in saved {
                        records.insert(record.address.clone(), record);
                    }
                    info!(
                        key = %storage_key,
                        publishers = records.len(),
                        "Loaded publisher registry"
                    );
                }
                Err(e) => {
                    warn!(key = %storage_key, error = %e, "Discarding unreadable publisher registry");
                }
            },
            None => {
                debug!(key = %storage_key, "No saved publisher registry, starting fresh");
            }
        }

        Ok(Self {
            records,
            store,
            storage_key,
            persist_lock: Mutex::new(()),
        })
    }

    /// Register or refresh a publisher
    ///
    /// Idempotent: a second add for the same address updates its activity
    /// time instead of creating a second entry.
    pub async fn add(&self, address: &PublisherAddress) -> Result<(), StorageError> {
        self.add_at(address, Utc::now()).await
    }

    /// Register or refresh a publisher with an explicit activity time
    pub async fn add_at(
        &self,
        address: &PublisherAddress,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        self.upsert(address, at);
        self.persist().await
    }

    /// Register or refresh several publishers with a single persistence write
    ///
    /// Returns how many addresses were new.
    pub async fn add_many<'a, I>(&self, addresses: I) -> Result<usize, StorageError>
    where
        I: IntoIterator<Item = &'a PublisherAddress>,
    {
        let now = Utc::now();
        let mut added = 0;
        let mut touched = 0;
        for address in addresses {
            if self.upsert(address, now) {
                added += 1;
            }
            touched += 1;
        }
        if touched > 0 {
            self.persist().await?;
        }
        Ok(added)
    }

    /// Returns true if the address was not known before
    fn upsert(&self, address: &PublisherAddress, at: DateTime<Utc>) -> bool {
        let mut is_new = false;
        self.records
            .entry(address.clone())
            .and_modify(|record| record.touch(at))
            .or_insert_with(|| {
                is_new = true;
                PublisherRecord::new(address.clone(), at)
            });
        if is_new {
            debug!(publisher = %address, "Registered new publisher");
        }
        is_new
    }

    /// Add `local` if the registry is empty
    ///
    /// Guarantees at least one address is ever queried. Returns true if the
    /// address was synthesized.
    pub async fn ensure_bootstrap(&self, local: &PublisherAddress) -> Result<bool, StorageError> {
        if !self.records.is_empty() {
            return Ok(false);
        }
        info!(publisher = %local, "Publisher registry empty, bootstrapping with local signer");
        self.add(local).await?;
        Ok(true)
    }

    /// All known addresses, in no particular order
    pub fn all(&self) -> Vec<PublisherAddress> {
        self.records.iter().map(|r| r.key().clone()).collect()
    }

    /// Addresses ordered by most recent activity first
    pub fn most_active(&self, limit: Option<usize>) -> Vec<PublisherAddress> {
        let mut records: Vec<PublisherRecord> =
            self.records.iter().map(|r| r.value().clone()).collect();
        records.sort_by(|a, b| {
            b.last_activity_millis
                .cmp(&a.last_activity_millis)
                .then_with(|| a.address.cmp(&b.address))
        });
        records
            .into_iter()
            .take(limit.unwrap_or(usize::MAX))
            .map(|r| r.address)
            .collect()
    }

    /// Check if an address is known
    pub fn has(&self, address: &PublisherAddress) -> bool {
        self.records.contains_key(address)
    }

    /// Get the record for an address
    pub fn get(&self, address: &PublisherAddress) -> Option<PublisherRecord> {
        self.records.get(address).map(|r| r.value().clone())
    }

    /// Number of known publishers
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if no publishers are known
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Evict a publisher, returns whether it was known
    pub async fn remove(&self, address: &PublisherAddress) -> Result<bool, StorageError> {
        let removed = self.records.remove(address).is_some();
        if removed {
            self.persist().await?;
        }
        Ok(removed)
    }

    /// Forget every publisher and drop the saved document
    pub async fn clear(&self) -> Result<(), StorageError> {
        let _guard = self.persist_lock.lock().await;
        self.records.clear();
        self.store.remove(&self.storage_key).await?;
        info!(key = %self.storage_key, "Cleared publisher registry");
        Ok(())
    }

    /// Remove publishers inactive for longer than `max_age`
    ///
    /// Returns the number of evicted entries.
    pub async fn cleanup(&self, max_age: Duration) -> Result<usize, StorageError> {
        self.cleanup_at(max_age, Utc::now()).await
    }

    /// [`cleanup`](Self::cleanup) against an explicit reference time
    pub async fn cleanup_at(
        &self,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> Result<usize, StorageError> {
        let max_age_millis = i64::try_from(max_age.as_millis()).unwrap_or(i64::MAX);
        let cutoff = now.timestamp_millis().saturating_sub(max_age_millis);

        let before = self.records.len();
        self.records
            .retain(|_, record| record.last_activity_millis >= cutoff);
        let evicted = before - self.records.len();

        if evicted > 0 {
            info!(evicted, remaining = self.records.len(), "Cleaned up stale publishers");
            self.persist().await?;
        }
        Ok(evicted)
    }

    /// Write the full registry to durable storage
    pub async fn persist(&self) -> Result<(), StorageError> {
        let _guard = self.persist_lock.lock().await;

        let mut snapshot: Vec<PublisherRecord> =
            self.records.iter().map(|r| r.value().clone()).collect();
        snapshot.sort_by(|a, b| a.address.cmp(&b.address));

        let value = serde_json::to_string(&snapshot)
            .map_err(|e| StorageError::serialization(e.to_string()))?;
        self.store.set(&self.storage_key, value).await?;

        debug!(publishers = snapshot.len(), "Persisted publisher registry");
        Ok(())
    }
}
