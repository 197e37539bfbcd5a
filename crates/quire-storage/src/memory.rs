//! In-memory storage implementation
//!
//! Suitable for tests and for sessions that should not leave anything on
//! disk.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use quire_core::{DurableStore, StorageError};
use tracing::trace;

/// In-memory implementation of [`DurableStore`]
#[derive(Debug, Default)]
pub struct InMemoryStore {
    values: DashMap<String, String>,
    /// Number of `set` calls served
    writes: AtomicUsize,
}

impl InMemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys held
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the store holds no keys
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Number of `set` calls served so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DurableStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.values.get(key).map(|v| v.clone()))
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        trace!(key, bytes = value.len(), "Storing value in memory");
        self.values.insert(key.to_string(), value);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.values.remove(key);
        Ok(())
    }
}
