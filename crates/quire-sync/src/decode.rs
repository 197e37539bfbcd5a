//! Typed, defensive record decoding
//!
//! Raw records come back from the chain client as loosely shaped field
//! lists: values may be bare or wrapped in `{"value": ...}` one or more
//! times, numbers may arrive as JSON numbers or as decimal/hex strings, and
//! older records may lack fields added to a schema later. A [`SchemaLayout`]
//! maps each schema position to a named, typed field with an explicit
//! default, and [`SchemaLayout::decode`] turns a raw record into either a
//! [`DecodedRecord`] or a [`Decoded::Skip`] with the reason.
//!
//! Only the identity field is mandatory. Every other field falls back to
//! its default (`0`, `""`, `false`, the zero address, empty bytes).
//!
//! Integers wider than 64 bits (`uint256` ids are common) are kept as
//! canonical decimal text in [`FieldValue::WideInt`]. A JSON number past
//! `u64` has already been rounded to `f64` by the time it reaches us, so
//! chain clients should hand such values over as strings.

use std::collections::BTreeMap;

use quire_core::{DecodeError, PublisherAddress, RawField, RawRecord, SchemaDescriptor};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How many `{"value": ...}` wrappers are peeled before giving up
const MAX_WRAP_DEPTH: usize = 8;

/// Primitive type of a schema field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Uint,
    Int,
    Bool,
    Text,
    Address,
    Bytes,
}

impl FieldKind {
    /// Map a descriptor type name (`uint64`, `string`, `bytes32`, ...)
    pub fn from_type_name(type_name: &str) -> Option<Self> {
        let type_name = type_name.trim();
        match type_name {
            "bool" => Some(FieldKind::Bool),
            "string" => Some(FieldKind::Text),
            "address" => Some(FieldKind::Address),
            _ if type_name.starts_with("uint") => Some(FieldKind::Uint),
            _ if type_name.starts_with("int") => Some(FieldKind::Int),
            _ if type_name.starts_with("bytes") => Some(FieldKind::Bytes),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Uint => "uint",
            FieldKind::Int => "int",
            FieldKind::Bool => "bool",
            FieldKind::Text => "string",
            FieldKind::Address => "address",
            FieldKind::Bytes => "bytes",
        }
    }

    /// Value used when a field is absent or unreadable
    pub fn default_value(&self) -> FieldValue {
        match self {
            FieldKind::Uint => FieldValue::Uint(0),
            FieldKind::Int => FieldValue::Int(0),
            FieldKind::Bool => FieldValue::Bool(false),
            FieldKind::Text => FieldValue::Text(String::new()),
            FieldKind::Address => FieldValue::Address(PublisherAddress::from_bytes([0; 20])),
            FieldKind::Bytes => FieldValue::Bytes(Vec::new()),
        }
    }
}

/// A decoded field value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Uint(u64),
    Int(i64),
    /// Integer outside the 64-bit range, as canonical decimal
    WideInt(String),
    Bool(bool),
    Text(String),
    Address(PublisherAddress),
    Bytes(Vec<u8>),
}

impl FieldValue {
    pub fn as_uint(&self) -> Option<u64> {
        match self {
            FieldValue::Uint(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            FieldValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Decimal form of any integer value, wide or not
    pub fn as_integer_text(&self) -> Option<String> {
        match self {
            FieldValue::Uint(v) => Some(v.to_string()),
            FieldValue::Int(v) => Some(v.to_string()),
            FieldValue::WideInt(v) => Some(v.clone()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_address(&self) -> Option<&PublisherAddress> {
        match self {
            FieldValue::Address(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            FieldValue::Bytes(v) => Some(v),
            _ => None,
        }
    }

    /// String form used when this value serves as a logical record id
    fn to_id(&self) -> Option<String> {
        match self {
            FieldValue::Uint(v) => Some(v.to_string()),
            FieldValue::Int(v) => Some(v.to_string()),
            FieldValue::WideInt(v) => Some(v.clone()),
            FieldValue::Text(v) if !v.is_empty() => Some(v.clone()),
            FieldValue::Address(v) if !v.is_zero() => Some(v.to_string()),
            FieldValue::Bytes(v) if !v.is_empty() => Some(format!("0x{}", hex::encode(v))),
            _ => None,
        }
    }
}

/// One named, typed field of a layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub default: FieldValue,
}

/// Positional, typed view of a schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaLayout {
    fields: Vec<FieldSpec>,
    id_field: String,
    author_field: Option<String>,
    terminal_field: Option<String>,
}

impl SchemaLayout {
    /// Empty layout whose logical id lives in `id_field`
    pub fn new(id_field: impl Into<String>) -> Self {
        Self {
            fields: Vec::new(),
            id_field: id_field.into(),
            author_field: None,
            terminal_field: None,
        }
    }

    /// Build a layout from a descriptor such as
    /// `"uint64 id, address author, string body, bool deleted"`
    ///
    /// The `id` field is the logical id. An `address` field named `author`
    /// is used for discovery and a `bool` field named `deleted` as the
    /// terminal flag; override either with [`author`](Self::author) and
    /// [`terminal`](Self::terminal).
    pub fn from_descriptor(descriptor: &SchemaDescriptor) -> Result<Self, DecodeError> {
        let mut layout = Self::new("id");

        for token in descriptor.as_str().split(',') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            let mut parts = token.split_whitespace();
            let (Some(type_name), Some(name)) = (parts.next(), parts.next()) else {
                return Err(DecodeError::MissingField(token.to_string()));
            };
            let kind = FieldKind::from_type_name(type_name).ok_or_else(|| DecodeError::InvalidType {
                field: name.to_string(),
                expected: "schema type",
            })?;
            layout = layout.field(name, kind);
        }

        if layout.spec("id").is_none() {
            return Err(DecodeError::MissingField("id".to_string()));
        }
        if layout.spec("author").is_some_and(|s| s.kind == FieldKind::Address) {
            layout.author_field = Some("author".to_string());
        }
        if layout.spec("deleted").is_some_and(|s| s.kind == FieldKind::Bool) {
            layout.terminal_field = Some("deleted".to_string());
        }
        Ok(layout)
    }

    /// Append a field with the kind's default
    pub fn field(self, name: impl Into<String>, kind: FieldKind) -> Self {
        let default = kind.default_value();
        self.field_with_default(name, kind, default)
    }

    /// Append a field with an explicit default
    pub fn field_with_default(
        mut self,
        name: impl Into<String>,
        kind: FieldKind,
        default: FieldValue,
    ) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            kind,
            default,
        });
        self
    }

    /// Use `name` as the authorship field for publisher discovery
    pub fn author(mut self, name: impl Into<String>) -> Self {
        self.author_field = Some(name.into());
        self
    }

    /// Use `name` as the terminal-state flag
    pub fn terminal(mut self, name: impl Into<String>) -> Self {
        self.terminal_field = Some(name.into());
        self
    }

    pub fn id_field(&self) -> &str {
        &self.id_field
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    fn spec(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|s| s.name == name)
    }

    /// Decode `raw`, read from `publisher`
    pub fn decode(&self, raw: &RawRecord, publisher: &PublisherAddress) -> Decoded {
        let mut fields = BTreeMap::new();
        let mut id = None;

        for (position, spec) in self.fields.iter().enumerate() {
            let is_id = spec.name == self.id_field;
            let value = match locate(raw, &spec.name, position) {
                Some(field) => match convert(&field.value, spec) {
                    Ok(value) => value,
                    Err(e) if is_id => return Decoded::Skip(e.to_string()),
                    Err(_) => spec.default.clone(),
                },
                None if is_id => {
                    return Decoded::Skip(DecodeError::MissingField(spec.name.clone()).to_string());
                }
                None => spec.default.clone(),
            };
            if is_id {
                id = value.to_id();
            }
            fields.insert(spec.name.clone(), value);
        }

        let Some(id) = id else {
            return Decoded::Skip(format!("empty identity field {}", self.id_field));
        };

        let author = self
            .author_field
            .as_ref()
            .and_then(|name| fields.get(name))
            .and_then(FieldValue::as_address)
            .filter(|address| !address.is_zero())
            .cloned();
        let terminal = self
            .terminal_field
            .as_ref()
            .and_then(|name| fields.get(name))
            .and_then(FieldValue::as_bool)
            .unwrap_or(false);

        Decoded::Record(DecodedRecord {
            id,
            publisher: publisher.clone(),
            author,
            terminal,
            fields,
        })
    }
}

/// Outcome of decoding one raw record
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Record(DecodedRecord),
    /// Record dropped, with the reason
    Skip(String),
}

/// A record mapped onto its layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedRecord {
    /// Logical id shared by every version of the record
    pub id: String,
    /// Publisher whose storage held this version
    pub publisher: PublisherAddress,
    /// Author named inside the record, if the layout has one and it is set
    pub author: Option<PublisherAddress>,
    /// Whether the terminal flag is set
    pub terminal: bool,
    pub fields: BTreeMap<String, FieldValue>,
}

impl DecodedRecord {
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn uint(&self, name: &str) -> Option<u64> {
        self.get(name).and_then(FieldValue::as_uint)
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(FieldValue::as_int)
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(FieldValue::as_bool)
    }

    /// Decimal text of an integer field, including wide ones
    pub fn integer_text(&self, name: &str) -> Option<String> {
        self.get(name).and_then(FieldValue::as_integer_text)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(FieldValue::as_text)
    }

    pub fn address(&self, name: &str) -> Option<&PublisherAddress> {
        self.get(name).and_then(FieldValue::as_address)
    }
}

/// Find a field by name, or by position when the raw field is unnamed
fn locate<'a>(raw: &'a RawRecord, name: &str, position: usize) -> Option<&'a RawField> {
    raw.field(name)
        .or_else(|| raw.field_at(position).filter(|f| f.name.is_empty()))
}

/// Peel `{"value": ...}` wrappers
fn unwrap_value(mut value: &Value) -> &Value {
    for _ in 0..MAX_WRAP_DEPTH {
        match value {
            Value::Object(map) => match map.get("value") {
                Some(inner) => value = inner,
                None => break,
            },
            _ => break,
        }
    }
    value
}

fn convert(raw: &Value, spec: &FieldSpec) -> Result<FieldValue, DecodeError> {
    let value = unwrap_value(raw);
    if value.is_null() {
        return Ok(spec.default.clone());
    }

    let invalid = || DecodeError::InvalidType {
        field: spec.name.clone(),
        expected: spec.kind.as_str(),
    };

    match spec.kind {
        FieldKind::Uint | FieldKind::Int => {
            let signed = spec.kind == FieldKind::Int;
            match value {
                Value::Number(n) => number_text(n)
                    .and_then(|text| parse_integer(&text, signed))
                    .ok_or_else(invalid),
                Value::String(s) => parse_integer(s, signed).ok_or_else(invalid),
                _ => Err(invalid()),
            }
        }
        FieldKind::Bool => match value {
            Value::Bool(b) => Ok(FieldValue::Bool(*b)),
            Value::Number(n) => match n.as_u64() {
                Some(0) => Ok(FieldValue::Bool(false)),
                Some(1) => Ok(FieldValue::Bool(true)),
                _ => Err(invalid()),
            },
            Value::String(s) => match s.trim() {
                "true" | "1" => Ok(FieldValue::Bool(true)),
                "false" | "0" | "" => Ok(FieldValue::Bool(false)),
                _ => Err(invalid()),
            },
            _ => Err(invalid()),
        },
        FieldKind::Text => match value {
            Value::String(s) => Ok(FieldValue::Text(s.clone())),
            Value::Number(n) => Ok(FieldValue::Text(n.to_string())),
            Value::Bool(b) => Ok(FieldValue::Text(b.to_string())),
            _ => Err(invalid()),
        },
        FieldKind::Address => match value {
            Value::String(s) => PublisherAddress::parse(s)
                .map(FieldValue::Address)
                .map_err(|_| invalid()),
            _ => Err(invalid()),
        },
        FieldKind::Bytes => match value {
            Value::String(s) => {
                let body = s.trim();
                let body = body
                    .strip_prefix("0x")
                    .or_else(|| body.strip_prefix("0X"))
                    .unwrap_or(body);
                hex::decode(body).map(FieldValue::Bytes).map_err(|_| invalid())
            }
            Value::Array(items) => items
                .iter()
                .map(|item| item.as_u64().and_then(|b| u8::try_from(b).ok()))
                .collect::<Option<Vec<u8>>>()
                .map(FieldValue::Bytes)
                .ok_or_else(invalid),
            _ => Err(invalid()),
        },
    }
}

/// Integral text of a JSON number; fractional values are rejected
fn number_text(n: &serde_json::Number) -> Option<String> {
    if let Some(v) = n.as_u64() {
        return Some(v.to_string());
    }
    if let Some(v) = n.as_i64() {
        return Some(v.to_string());
    }
    n.as_f64()
        .filter(|f| f.is_finite() && f.fract() == 0.0)
        .map(|f| format!("{f:.0}"))
}

/// Parse decimal or `0x` hex text, narrowing to 64 bits when it fits
fn parse_integer(s: &str, signed: bool) -> Option<FieldValue> {
    let s = s.trim();
    let (negative, body) = match s.strip_prefix('-') {
        Some(rest) if signed => (true, rest),
        _ => (false, s),
    };

    let digits = match body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        Some(hex) => hex_to_decimal(hex)?,
        None if !body.is_empty() && body.bytes().all(|b| b.is_ascii_digit()) => body.to_string(),
        None => return None,
    };
    let digits = match digits.trim_start_matches('0') {
        "" => "0",
        trimmed => trimmed,
    };

    if negative {
        return Some(match format!("-{digits}").parse::<i64>() {
            Ok(v) => FieldValue::Int(v),
            Err(_) => FieldValue::WideInt(format!("-{digits}")),
        });
    }
    let narrow = digits.parse::<u64>().ok();
    Some(match (narrow, signed) {
        (Some(v), false) => FieldValue::Uint(v),
        (Some(v), true) => match i64::try_from(v) {
            Ok(v) => FieldValue::Int(v),
            Err(_) => FieldValue::WideInt(digits.to_string()),
        },
        (None, _) => FieldValue::WideInt(digits.to_string()),
    })
}

/// Base conversion of arbitrary-length hex into decimal digits
fn hex_to_decimal(hex: &str) -> Option<String> {
    const LIMB: u64 = 1_000_000_000;

    if hex.is_empty() {
        return None;
    }
    // Little-endian base-1e9 limbs
    let mut limbs: Vec<u64> = vec![0];
    for c in hex.chars() {
        let mut carry = u64::from(c.to_digit(16)?);
        for limb in limbs.iter_mut() {
            let v = *limb * 16 + carry;
            *limb = v % LIMB;
            carry = v / LIMB;
        }
        if carry > 0 {
            limbs.push(carry);
        }
    }

    let mut out = String::new();
    let mut iter = limbs.iter().rev();
    if let Some(head) = iter.next() {
        out.push_str(&head.to_string());
    }
    for limb in iter {
        out.push_str(&format!("{limb:09}"));
    }
    Some(out)
}
