//! Error types for engram-ledger

use thiserror::Error;

/// Errors raised by a [`crate::LedgerStore`] backend.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Filesystem I/O failure
    #[error("ledger I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// Backend (database) failure
    #[error("ledger backend failed: {0}")]
    Backend(String),

    /// A stored entry could not be decoded
    #[error("stored entry {index} is unreadable: {reason}")]
    Corrupt { index: u64, reason: String },

    /// An entry was offered out of chain order
    #[error("out-of-order persist: expected entry {expected}, got {got}")]
    OutOfOrder { expected: u64, got: u64 },
}

/// Errors surfaced by the [`crate::JusticeLog`].
#[derive(Error, Debug)]
pub enum LedgerError {
    /// The durable write failed after every retry; the chain did not advance.
    #[error("ledger write failed for entry {index} after {attempts} attempt(s): {reason}")]
    WriteFailed {
        index: u64,
        attempts: u32,
        reason: String,
    },

    /// The tip of an existing ledger could not be read, so nothing can be appended.
    #[error("ledger tip at entry {index} is unreadable: {reason}")]
    TipUnreadable { index: u64, reason: String },

    /// Read-side storage failure
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Payload could not be brought into canonical form
    #[error("canonical serialization failed: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        LedgerError::Serialization(err.to_string())
    }
}

impl From<surrealdb::Error> for StorageError {
    fn from(err: surrealdb::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}
