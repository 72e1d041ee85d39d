//! Engram Ledger: the hash-chained Justice Log
//!
//! Every fact Engram records (normalized telemetry events and synthesized
//! incidents) is appended here as canonical JSON linked to its predecessor by
//! `SHA-256(prev_hash ‖ payload)`. Any later alteration, reordering or removal
//! is detectable by [`JusticeLog::verify`].
//!
//! ## Layer 0 - Persistence
//!
//! - [`JusticeLog`]: single-writer append, lazy range reads, verification, seal
//! - [`LedgerStore`]: durable backends ([`FsLedgerStore`], [`SurrealLedgerStore`],
//!   and [`fakes::MemoryLedgerStore`] for tests)
//! - [`canonical`]: the canonical JSON form every payload is hashed in

pub mod canonical;
mod error;
pub mod fakes;
mod fs_store;
mod justice_log;
mod migrations;
mod schema;
pub mod storage_traits;
mod surreal_store;

pub use canonical::{canonical_digest, canonical_json, to_canonical};
pub use error::{LedgerError, StorageError};
pub use fs_store::FsLedgerStore;
pub use justice_log::{
    BreakReason, ChainVerdict, EntryStream, JusticeLog, LedgerSnapshot, SealManifest, WritePolicy,
};
pub use schema::LedgerEntryRecord;
pub use storage_traits::{
    chain_link, LedgerEntry, LedgerStore, PayloadKind, StorageResult, GENESIS,
};
pub use surreal_store::SurrealLedgerStore;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, LedgerError>;
