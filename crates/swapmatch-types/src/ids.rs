//! Identifiers used throughout swapmatch.
//!
//! Order and match IDs are SHA-256 digests of the canonical serialization
//! of the thing they identify, so they are content-derived and reproducible
//! by any auditor. Account IDs are assigned by the registration layer, and
//! coin IDs are opaque byte strings whose interpretation belongs to the
//! asset backend.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Length in bytes of the hash-derived identifiers.
pub const ID_SIZE: usize = 32;

// ---------------------------------------------------------------------------
// AccountId
// ---------------------------------------------------------------------------

/// Unique identifier for a client trading account.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize,
)]
pub struct AccountId(pub [u8; ID_SIZE]);

impl AccountId {
    #[must_use]
    pub fn from_bytes(bytes: [u8; ID_SIZE]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; ID_SIZE] {
        &self.0
    }

    /// Abbreviated hex form for log lines.
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

// ---------------------------------------------------------------------------
// OrderId
// ---------------------------------------------------------------------------

/// Unique order identifier: the SHA-256 of the order's canonical
/// serialization *including* the server timestamp. An order that has not
/// been stamped by the epoch pipeline does not yet have a valid ID.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize,
)]
pub struct OrderId(pub [u8; ID_SIZE]);

impl OrderId {
    #[must_use]
    pub fn from_bytes(bytes: [u8; ID_SIZE]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; ID_SIZE] {
        &self.0
    }

    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

// ---------------------------------------------------------------------------
// MatchId
// ---------------------------------------------------------------------------

/// Unique match identifier, derived from the two matched order IDs and the
/// match terms. Every party computes the same ID for the same match.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize,
)]
pub struct MatchId(pub [u8; ID_SIZE]);

impl MatchId {
    #[must_use]
    pub fn from_bytes(bytes: [u8; ID_SIZE]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; ID_SIZE] {
        &self.0
    }
}

impl fmt::Display for MatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

// ---------------------------------------------------------------------------
// AssetId
// ---------------------------------------------------------------------------

/// Registered asset identifier (the BIP-44 registered coin type).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize,
)]
pub struct AssetId(pub u32);

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// CoinId
// ---------------------------------------------------------------------------

/// Opaque identifier of an on-chain funding source: a serialized UTXO
/// outpoint for output-tracking assets, or an account address for
/// account-based assets. Only the owning backend can interpret it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct CoinId(pub Vec<u8>);

impl CoinId {
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for CoinId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}
