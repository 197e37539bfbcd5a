//! Schema and record types
//!
//! These are the shapes that cross the chain client seam: what a composite
//! write carries out ([`DataItem`]) and what a per-publisher read brings back
//! ([`RawRecord`]).

use std::fmt::{self, Display};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Textual schema definition, e.g. `"uint64 id, string body, bool deleted"`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchemaDescriptor(pub String);

impl SchemaDescriptor {
    /// Create a new descriptor
    pub fn new(definition: impl Into<String>) -> Self {
        Self(definition.into())
    }

    /// The raw definition text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for SchemaDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier derived from a [`SchemaDescriptor`] by the chain client
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SchemaId(String);

impl SchemaId {
    /// Wrap a chain-derived schema id (stored lower-cased)
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(id.as_ref().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for SchemaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key of a single stored record within a (schema, publisher) pair
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId(pub String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One entry of a composite `set()` call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataItem {
    /// Schema the payload is encoded with
    pub schema_id: SchemaId,
    /// Record key
    pub id: RecordId,
    /// Encoded payload
    pub data: Bytes,
}

impl DataItem {
    pub fn new(schema_id: SchemaId, id: RecordId, data: impl Into<Bytes>) -> Self {
        Self {
            schema_id,
            id,
            data: data.into(),
        }
    }
}

/// Handle returned by the chain client for a submitted transaction
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxHandle {
    /// Transaction hash
    pub hash: String,
}

impl TxHandle {
    pub fn new(hash: impl Into<String>) -> Self {
        Self { hash: hash.into() }
    }
}

impl Display for TxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hash)
    }
}

/// One decoded field as handed back by the chain client
///
/// `value` is loosely shaped: depending on the client version a primitive can
/// arrive bare or wrapped one or more times as `{"value": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawField {
    pub name: String,
    #[serde(rename = "type", default)]
    pub type_name: String,
    #[serde(default)]
    pub value: serde_json::Value,
}

impl RawField {
    pub fn new(
        name: impl Into<String>,
        type_name: impl Into<String>,
        value: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            value,
        }
    }
}

/// A stored record as returned by a per-publisher read
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub fields: Vec<RawField>,
}

impl RawRecord {
    pub fn new(fields: Vec<RawField>) -> Self {
        Self { fields }
    }

    /// Look a field up by name
    pub fn field(&self, name: &str) -> Option<&RawField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Look a field up by position
    pub fn field_at(&self, position: usize) -> Option<&RawField> {
        self.fields.get(position)
    }
}

/// Interaction class used to pick a batch accumulator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteKind {
    /// Anything without a dedicated queue (posts, follows, play events)
    Generic,
    Like,
    Bookmark,
    Repost,
    /// Merge queue for publishers with several classes pending at once
    Unified,
}

impl WriteKind {
    /// Every kind, unified last
    pub const ALL: [WriteKind; 5] = [
        WriteKind::Generic,
        WriteKind::Like,
        WriteKind::Bookmark,
        WriteKind::Repost,
        WriteKind::Unified,
    ];

    /// The interaction classes that have their own accumulator
    pub const CLASSES: [WriteKind; 4] = [
        WriteKind::Generic,
        WriteKind::Like,
        WriteKind::Bookmark,
        WriteKind::Repost,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WriteKind::Generic => "generic",
            WriteKind::Like => "like",
            WriteKind::Bookmark => "bookmark",
            WriteKind::Repost => "repost",
            WriteKind::Unified => "unified",
        }
    }
}

impl Display for WriteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
