//! Append-only JSON Lines ledger file.
//!
//! Layout: one serialized [`LedgerEntry`] per line, in chain order. Lines are
//! only ever appended; a write that fails part-way is truncated back to the
//! last committed byte so the file never holds a half entry.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::StorageError;
use crate::storage_traits::{LedgerEntry, LedgerStore, StorageResult};

#[derive(Debug, Clone)]
enum StoredLine {
    Entry(LedgerEntry),
    Unreadable(String),
}

#[derive(Debug)]
struct Inner {
    file: File,
    lines: Vec<StoredLine>,
    committed_bytes: u64,
}

/// Filesystem-backed [`LedgerStore`].
#[derive(Debug)]
pub struct FsLedgerStore {
    path: PathBuf,
    inner: Arc<Mutex<Inner>>,
}

impl FsLedgerStore {
    /// Open (or create) the ledger file at `path`, loading existing lines.
    ///
    /// Lines that fail to decode are kept as unreadable slots so that
    /// verification can report their index instead of silently skipping them.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)?;

        let mut lines = Vec::new();
        let mut committed_bytes = 0u64;
        for raw in BufReader::new(&file).split(b'\n') {
            let raw = raw?;
            committed_bytes += raw.len() as u64 + 1;
            if raw.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match decode_line(&raw) {
                Ok(entry) => lines.push(StoredLine::Entry(entry)),
                Err(reason) => {
                    warn!(index = lines.len(), error = %reason, "unreadable ledger line");
                    lines.push(StoredLine::Unreadable(reason));
                }
            }
        }

        // Terminate a final line that lost its newline so the next append
        // starts on a fresh line.
        if file.metadata()?.len() < committed_bytes {
            file.write_all(b"\n")?;
            file.sync_data()?;
        }

        info!(path = %path.display(), entries = lines.len(), "ledger file opened");
        Ok(Self {
            path,
            inner: Arc::new(Mutex::new(Inner {
                file,
                lines,
                committed_bytes,
            })),
        })
    }

    /// Location of the ledger file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        lock(&self.inner)
    }

    /// Run file I/O on the blocking pool, off the async workers.
    async fn blocking<T, F>(&self, f: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Inner) -> StorageResult<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || f(&mut lock(&inner)))
            .await
            .map_err(|e| StorageError::Backend(format!("ledger file task failed: {e}")))?
    }
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A line is readable only if it is UTF-8 holding one JSON entry.
fn decode_line(raw: &[u8]) -> Result<LedgerEntry, String> {
    let text = std::str::from_utf8(raw).map_err(|e| format!("invalid utf-8: {e}"))?;
    serde_json::from_str(text).map_err(|e| e.to_string())
}

fn write_line(inner: &mut Inner, line: &[u8]) -> std::io::Result<()> {
    inner.file.write_all(line)?;
    inner.file.sync_data()
}

#[async_trait]
impl LedgerStore for FsLedgerStore {
    async fn persist(&self, entry: &LedgerEntry) -> StorageResult<()> {
        let mut line = serde_json::to_vec(entry).map_err(|e| StorageError::Backend(e.to_string()))?;
        line.push(b'\n');

        let entry = entry.clone();
        self.blocking(move |inner| {
            let expected = inner.lines.len() as u64;
            if entry.entry_index != expected {
                return Err(StorageError::OutOfOrder {
                    expected,
                    got: entry.entry_index,
                });
            }

            if let Err(e) = write_line(inner, &line) {
                let committed = inner.committed_bytes;
                if let Err(trunc) = inner.file.set_len(committed) {
                    warn!(error = %trunc, "failed to truncate partial ledger line");
                }
                return Err(StorageError::Io(e));
            }

            inner.committed_bytes += line.len() as u64;
            debug!(index = entry.entry_index, "ledger line written");
            inner.lines.push(StoredLine::Entry(entry));
            Ok(())
        })
        .await
    }

    async fn read_range(&self, from: u64, to: u64) -> StorageResult<Vec<LedgerEntry>> {
        let inner = self.lock();
        let len = inner.lines.len() as u64;
        let (from, to) = (from.min(len), to.min(len));

        let mut out = Vec::with_capacity(to.saturating_sub(from) as usize);
        for index in from..to {
            match &inner.lines[index as usize] {
                StoredLine::Entry(entry) => out.push(entry.clone()),
                StoredLine::Unreadable(reason) => {
                    return Err(StorageError::Corrupt {
                        index,
                        reason: reason.clone(),
                    })
                }
            }
        }
        Ok(out)
    }

    async fn len(&self) -> StorageResult<u64> {
        Ok(self.lock().lines.len() as u64)
    }

    async fn flush(&self) -> StorageResult<()> {
        self.blocking(|inner| Ok(inner.file.sync_all()?)).await
    }

    fn backend(&self) -> &'static str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage_traits::{chain_link, PayloadKind, GENESIS};

    fn make_store() -> (tempfile::TempDir, FsLedgerStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsLedgerStore::open(dir.path().join("ledger").join("justice_log.jsonl")).unwrap();
        (dir, store)
    }

    fn entry(index: u64, prev: &str, payload: &str) -> LedgerEntry {
        LedgerEntry {
            entry_index: index,
            kind: PayloadKind::Event,
            payload: payload.to_string(),
            prev_hash: prev.to_string(),
            this_hash: chain_link(prev, payload),
        }
    }

    #[tokio::test]
    async fn entries_survive_reopen() {
        let (dir, store) = make_store();
        let first = entry(0, GENESIS, r#"{"n":0}"#);
        let second = entry(1, &first.this_hash, r#"{"n":1}"#);
        store.persist(&first).await.unwrap();
        store.persist(&second).await.unwrap();
        let path = store.path().to_path_buf();
        drop(store);

        let reopened = FsLedgerStore::open(&path).unwrap();
        assert_eq!(reopened.len().await.unwrap(), 2);
        assert_eq!(reopened.read_range(0, 2).await.unwrap(), vec![first, second]);
        drop(dir);
    }

    #[tokio::test]
    async fn unreadable_line_reported_as_corrupt() {
        let (_dir, store) = make_store();
        store.persist(&entry(0, GENESIS, "{}")).await.unwrap();
        let path = store.path().to_path_buf();
        drop(store);

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{not json\n").unwrap();
        drop(file);

        let reopened = FsLedgerStore::open(&path).unwrap();
        assert_eq!(reopened.len().await.unwrap(), 2);
        assert_eq!(reopened.read_range(0, 1).await.unwrap().len(), 1);
        let err = reopened.read_range(0, 2).await.unwrap_err();
        assert!(matches!(err, StorageError::Corrupt { index: 1, .. }));
    }

    #[tokio::test]
    async fn invalid_utf8_line_kept_as_unreadable_slot() {
        let (_dir, store) = make_store();
        let first = entry(0, GENESIS, r#"{"agent_id":"bot-01"}"#);
        let second = entry(1, &first.this_hash, r#"{"agent_id":"bot-02"}"#);
        store.persist(&first).await.unwrap();
        store.persist(&second).await.unwrap();
        let path = store.path().to_path_buf();
        drop(store);

        let mut bytes = fs::read(&path).unwrap();
        let newline = bytes.iter().position(|b| *b == b'\n').unwrap();
        let at = newline + 1 + bytes[newline + 1..].windows(6).position(|w| w == b"bot-02").unwrap();
        bytes[at] ^= 0x80;
        fs::write(&path, &bytes).unwrap();

        let reopened = FsLedgerStore::open(&path).unwrap();
        assert_eq!(reopened.len().await.unwrap(), 2);
        assert_eq!(reopened.read_range(0, 1).await.unwrap(), vec![first]);
        let err = reopened.read_range(1, 2).await.unwrap_err();
        assert!(matches!(err, StorageError::Corrupt { index: 1, .. }));
    }

    #[tokio::test]
    async fn out_of_order_rejected() {
        let (_dir, store) = make_store();
        let err = store.persist(&entry(3, GENESIS, "{}")).await.unwrap_err();
        assert!(matches!(err, StorageError::OutOfOrder { expected: 0, got: 3 }));
        assert_eq!(store.len().await.unwrap(), 0);
    }
}
