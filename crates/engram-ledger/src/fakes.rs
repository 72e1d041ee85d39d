//! In-memory fakes for storage traits (testing only)
//!
//! `MemoryLedgerStore` satisfies the [`LedgerStore`] contract without any
//! external dependencies and adds hooks for fault injection: failing the next
//! N writes, and corrupting stored bytes to simulate tampering.

use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::error::StorageError;
use crate::storage_traits::*;

#[derive(Debug, Default)]
struct Inner {
    entries: Vec<LedgerEntry>,
    fail_next: u32,
    /// Restrict injected failures to one payload kind
    fail_kind: Option<PayloadKind>,
}

/// In-memory ledger store backed by a `Vec<LedgerEntry>`.
#[derive(Debug, Default)]
pub struct MemoryLedgerStore {
    inner: Mutex<Inner>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next `n` calls to `persist` fail with a backend error.
    pub fn fail_next_writes(&self, n: u32) {
        let mut inner = self.lock();
        inner.fail_next = n;
        inner.fail_kind = None;
    }

    /// Like [`fail_next_writes`](Self::fail_next_writes), but only writes of
    /// `kind` fail (and count); other entries persist normally.
    pub fn fail_next_writes_of(&self, kind: PayloadKind, n: u32) {
        let mut inner = self.lock();
        inner.fail_next = n;
        inner.fail_kind = Some(kind);
    }

    /// Flip the low bit of byte `offset` of entry `index`'s payload.
    ///
    /// Returns `false` when the entry or offset does not exist.
    pub fn corrupt_payload_byte(&self, index: u64, offset: usize) -> bool {
        let mut inner = self.lock();
        let Some(entry) = inner.entries.get_mut(index as usize) else {
            return false;
        };
        let mut bytes = entry.payload.clone().into_bytes();
        let Some(byte) = bytes.get_mut(offset) else {
            return false;
        };
        *byte ^= 0x01;
        entry.payload = String::from_utf8_lossy(&bytes).into_owned();
        true
    }

    /// Overwrite a stored entry wholesale.
    pub fn replace_entry(&self, index: u64, entry: LedgerEntry) -> bool {
        let mut inner = self.lock();
        match inner.entries.get_mut(index as usize) {
            Some(slot) => {
                *slot = entry;
                true
            }
            None => false,
        }
    }

    /// Copy of everything stored.
    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.lock().entries.clone()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn persist(&self, entry: &LedgerEntry) -> StorageResult<()> {
        let mut inner = self.lock();
        if inner.fail_next > 0 && inner.fail_kind.map_or(true, |kind| kind == entry.kind) {
            inner.fail_next -= 1;
            return Err(StorageError::Backend("injected write failure".to_string()));
        }
        let expected = inner.entries.len() as u64;
        if entry.entry_index != expected {
            return Err(StorageError::OutOfOrder {
                expected,
                got: entry.entry_index,
            });
        }
        inner.entries.push(entry.clone());
        Ok(())
    }

    async fn read_range(&self, from: u64, to: u64) -> StorageResult<Vec<LedgerEntry>> {
        let inner = self.lock();
        let len = inner.entries.len() as u64;
        let (from, to) = (from.min(len), to.min(len));
        if from >= to {
            return Ok(Vec::new());
        }
        Ok(inner.entries[from as usize..to as usize].to_vec())
    }

    async fn len(&self) -> StorageResult<u64> {
        Ok(self.lock().entries.len() as u64)
    }

    async fn flush(&self) -> StorageResult<()> {
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
