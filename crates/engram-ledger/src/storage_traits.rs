//! Storage trait definitions for the Justice Log
//!
//! - `LedgerEntry`: the chain unit (payload + hash link)
//! - `LedgerStore`: durable, append-only persistence of entries
//!
//! The trait is async and backend-agnostic. An in-memory fake lives in the
//! `fakes` module; `FsLedgerStore` and `SurrealLedgerStore` are the durable
//! backends.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// `prev_hash` of the first entry in every chain.
pub const GENESIS: &str = "GENESIS";

/// What a ledger entry carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    /// A normalized telemetry fact
    Event,
    /// A synthesized incident
    Incident,
}

impl PayloadKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Event => "event",
            Self::Incident => "incident",
        }
    }
}

impl std::fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PayloadKind {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "event" => Ok(Self::Event),
            "incident" => Ok(Self::Incident),
            other => Err(StorageError::Backend(format!(
                "unknown payload kind: {other}"
            ))),
        }
    }
}

/// Compute `H(prev_hash ‖ payload)` as lowercase hex.
pub fn chain_link(prev_hash: &str, payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prev_hash.as_bytes());
    hasher.update(payload.as_bytes());
    hex::encode(hasher.finalize())
}

/// One link of the Justice Log.
///
/// `payload` holds the canonical JSON text exactly as it was hashed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Position in the chain, strictly increasing from 0
    pub entry_index: u64,
    /// Payload discriminator
    pub kind: PayloadKind,
    /// Canonical JSON payload
    pub payload: String,
    /// `this_hash` of the predecessor, or [`GENESIS`]
    pub prev_hash: String,
    /// `chain_link(prev_hash, payload)`
    pub this_hash: String,
}

impl LedgerEntry {
    /// Recompute this entry's link from its own fields.
    pub fn recompute_hash(&self) -> String {
        chain_link(&self.prev_hash, &self.payload)
    }

    /// Decode the payload into a typed value.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_str(&self.payload)
    }
}

/// Durable, append-only entry storage.
///
/// Guarantees:
/// - `persist` accepts only `entry.entry_index == len()`; a failed persist
///   leaves no trace of the entry.
/// - `read_range(from, to)` returns entries `[from, to)` in index order,
///   clipped to what is stored.
/// - Nothing is ever updated or deleted.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Durably write the next entry.
    async fn persist(&self, entry: &LedgerEntry) -> StorageResult<()>;

    /// Read entries in `[from, to)`.
    async fn read_range(&self, from: u64, to: u64) -> StorageResult<Vec<LedgerEntry>>;

    /// Number of stored entries.
    async fn len(&self) -> StorageResult<u64>;

    /// Flush buffered state to durable storage.
    async fn flush(&self) -> StorageResult<()>;

    /// Short backend label for logs.
    fn backend(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_link_depends_on_both_inputs() {
        let a = chain_link(GENESIS, "{}");
        let b = chain_link(GENESIS, "{ }");
        let c = chain_link(&a, "{}");
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn payload_kind_parses_its_own_label() {
        for kind in [PayloadKind::Event, PayloadKind::Incident] {
            let parsed: PayloadKind = kind.as_str().parse().unwrap();
            assert_eq!(parsed, kind);
        }
        assert!("snapshot".parse::<PayloadKind>().is_err());
    }

    #[test]
    fn recompute_matches_link() {
        let payload = r#"{"agent_id":"bot-01"}"#.to_string();
        let entry = LedgerEntry {
            entry_index: 0,
            kind: PayloadKind::Event,
            this_hash: chain_link(GENESIS, &payload),
            prev_hash: GENESIS.to_string(),
            payload,
        };
        assert_eq!(entry.recompute_hash(), entry.this_hash);
    }
}
