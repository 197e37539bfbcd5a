//! # Quire Core
//!
//! Core traits, types, and errors for the Quire sync layer.
//!
//! Quire sits between feature code and a metered keyed store where every
//! write is a transaction and reads are only addressable per
//! (schema, publisher) pair. This crate holds the vocabulary shared by the
//! storage and sync crates, plus the two collaborator seams the layer is
//! built against.
//!
//! ## Key Traits
//!
//! - [`ChainClient`]: schema id derivation, composite writes, per-publisher reads
//! - [`DurableStore`]: small key/value persistence for local state
//!
//! ## Key Types
//!
//! - [`PublisherAddress`]: canonical (lower-cased) writer identity
//! - [`SignerHandle`]: a local signing identity able to write as a publisher
//! - [`SchemaId`] / [`SchemaDescriptor`]: typed record layouts
//! - [`DataItem`] / [`RawRecord`]: what goes out on write and comes back on read
//! - [`WriteKind`]: interaction class used to pick a batch accumulator

pub mod error;
pub mod identity;
pub mod mock_chain;
pub mod schema;
pub mod traits;

// Re-export main types
pub use error::*;
pub use identity::*;
pub use mock_chain::*;
pub use schema::*;
pub use traits::*;
