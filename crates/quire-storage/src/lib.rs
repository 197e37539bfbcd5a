//! # Quire Storage
//!
//! Local persistence for the Quire sync layer.
//!
//! ## Features
//!
//! - **InMemoryStore**: [`DurableStore`] backed by a map, for tests and ephemeral sessions
//! - **FileStore**: [`DurableStore`] writing one JSON document per key into a directory
//! - **PublisherRegistry**: the durable set of known publishers that seeds every fan-out read
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use quire_core::PublisherAddress;
//! use quire_storage::{InMemoryStore, PublisherRegistry};
//!
//! let store = Arc::new(InMemoryStore::new());
//! let registry = PublisherRegistry::load(store, "quire.publishers").await?;
//!
//! registry.add(&PublisherAddress::from_bytes([0xaa; 20])).await?;
//! assert_eq!(registry.all().len(), 1);
//! ```

pub mod file;
pub mod memory;
pub mod registry;

// Re-exports
pub use file::FileStore;
pub use memory::InMemoryStore;
pub use registry::{PublisherRecord, PublisherRegistry};

pub use quire_core::{DurableStore, StorageError};
