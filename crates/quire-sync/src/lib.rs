//! # Quire Sync
//!
//! A client-side sync layer over a metered keyed store, where every write
//! is a transaction and reads are only addressable per (schema, publisher)
//! pair.
//!
//! Feature code writes and reads as if against an ordinary eventually
//! consistent database. Underneath, cheap facts are batched into few
//! transactions, writes by one signer are strictly serialized, reads fan out
//! across every known publisher and are merged, cached and deduplicated.
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use quire_sync::prelude::*;
//!
//! let layer = SyncLayer::new(
//!     SyncConfig::default(),
//!     chain_client,
//!     Arc::new(FileStore::new("./state").await?),
//!     SignerHandle::new(my_address, "wallet-0"),
//! )
//! .await?;
//!
//! let likes = layer
//!     .register_schema(&SchemaDescriptor::new("uint64 id, address author, bool deleted"), None)
//!     .await?;
//!
//! // Batched; resolves once the transaction carrying it lands
//! let tx = layer
//!     .enqueue_write(WriteKind::Like, likes.clone(), RecordId::new("42"), payload, json!({}), None)
//!     .await?;
//!
//! // Fan-out read across every known publisher
//! let page = layer.read_all(&likes, ReadOptions::new().with_page(0, 50)).await?;
//! ```
//!
//! ## Components
//!
//! - [`TransactionSerializer`] / [`SerializerPool`]: one write in flight per signer
//! - [`BatchAccumulator`] / [`WriteRouter`]: size and debounce batching, unified routing
//! - [`BatchWriter`]: per-publisher grouping and submission
//! - [`MultiPublisherReader`]: fan-out, defensive decode, merge, discovery
//! - [`ReadCache`]: TTL cache with in-flight coalescing
//! - [`SchemaCatalog`] / [`SchemaLayout`]: schema ids and typed decode
//!
//! ## Configuration
//!
//! ```ignore
//! let layer = SyncLayer::new(SyncConfig::with_preset(Preset::Interactive), chain, store, signer).await?;
//! let layer = SyncLayer::new(SyncConfig::load("quire.toml")?, chain, store, signer).await?;
//! ```

pub mod accumulator;
pub mod cache;
pub mod config;
pub mod decode;
pub mod error;
pub mod events;
pub mod layer;
pub mod page;
pub mod reader;
pub mod request;
pub mod router;
pub mod schemas;
pub mod serializer;
pub mod writer;

pub use accumulator::{BatchAccumulator, BatchStatus};
pub use cache::{CacheEntry, ReadCache};
pub use config::{AccumulatorConfig, AccumulatorSet, ConfigError, Preset, SyncConfig};
pub use decode::{Decoded, DecodedRecord, FieldKind, FieldSpec, FieldValue, SchemaLayout};
pub use error::{SyncError, SyncResult};
pub use events::{EventSink, WriteEvent};
pub use layer::SyncLayer;
pub use page::{Page, ReadOptions};
pub use reader::{MultiPublisherReader, ReadOutcome, RecordCache};
pub use request::{PendingWrite, WriteRequest, WriteTicket};
pub use router::WriteRouter;
pub use schemas::SchemaCatalog;
pub use serializer::{SerializerPhase, SerializerPool, SerializerStats, TransactionSerializer};
pub use writer::{BatchWriter, FlushReport, SignerSet};

/// Common imports for applications embedding the sync layer
pub mod prelude {
    pub use crate::{
        Page, Preset, ReadOptions, SchemaLayout, SyncConfig, SyncError, SyncLayer, SyncResult,
        WriteEvent, WriteTicket,
    };
    pub use quire_core::{
        ChainClient, DataItem, DurableStore, PublisherAddress, RecordId, SchemaDescriptor,
        SchemaId, SignerHandle, TxHandle, WriteKind,
    };
    pub use quire_storage::{FileStore, InMemoryStore};
}
