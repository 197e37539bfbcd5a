//! Publisher and signer identities
//!
//! A [`PublisherAddress`] is the canonical key for a writer: a `0x`-prefixed,
//! lower-cased, 20-byte hex address. Anything that reaches the registry or a
//! batch group has been normalized through [`PublisherAddress::parse`], so two
//! spellings of the same address always compare equal.

use std::fmt::{self, Display};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::IdentityError;

/// Number of hex characters in an address body (20 bytes)
pub const ADDRESS_HEX_LEN: usize = 40;

/// Canonical writer identity
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PublisherAddress(String);

impl PublisherAddress {
    /// Parse and normalize an address
    ///
    /// Accepts upper, lower or mixed case with or without the `0x` prefix.
    pub fn parse(raw: &str) -> Result<Self, IdentityError> {
        let trimmed = raw.trim();
        let body = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);

        if body.len() != ADDRESS_HEX_LEN {
            return Err(IdentityError::InvalidLength {
                expected: ADDRESS_HEX_LEN,
                actual: body.len(),
            });
        }
        if !body.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(IdentityError::InvalidFormat(raw.to_string()));
        }

        Ok(Self(format!("0x{}", body.to_ascii_lowercase())))
    }

    /// Build an address from raw bytes
    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(format!("0x{}", hex::encode(bytes)))
    }

    /// Whether this is the all-zero address
    ///
    /// The zero address shows up as the default value of empty author
    /// fields and is never a real publisher.
    pub fn is_zero(&self) -> bool {
        self.0[2..].chars().all(|c| c == '0')
    }

    /// The canonical string form
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short display form for logs (`0xabcd…1234`)
    pub fn short_id(&self) -> String {
        format!("{}…{}", &self.0[..6], &self.0[self.0.len() - 4..])
    }
}

impl Display for PublisherAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PublisherAddress {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PublisherAddress {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PublisherAddress> for String {
    fn from(address: PublisherAddress) -> Self {
        address.0
    }
}

/// A local signing identity
///
/// The sync layer never touches key material. The handle names the address
/// the signer writes as and an opaque key reference that the chain client
/// resolves when it submits the transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignerHandle {
    /// Address this signer writes as
    pub address: PublisherAddress,
    /// Opaque reference understood by the chain client (wallet slot, key id)
    pub key_ref: String,
}

impl SignerHandle {
    /// Create a new signer handle
    pub fn new(address: PublisherAddress, key_ref: impl Into<String>) -> Self {
        Self {
            address,
            key_ref: key_ref.into(),
        }
    }

    /// Whether this signer can write as `publisher`
    pub fn signs_for(&self, publisher: &PublisherAddress) -> bool {
        &self.address == publisher
    }
}
