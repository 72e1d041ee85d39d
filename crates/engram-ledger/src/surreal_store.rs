//! SurrealDB-backed [`LedgerStore`].
//!
//! Rows live in `ledger_entries` (see [`crate::schema::LedgerEntryRecord`]);
//! conversion to [`LedgerEntry`] happens at the boundary.

use async_trait::async_trait;
use serde::Deserialize;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::error::StorageError;
use crate::migrations;
use crate::schema::LedgerEntryRecord;
use crate::storage_traits::{LedgerEntry, LedgerStore, StorageResult};

const NAMESPACE: &str = "engram";
const DATABASE: &str = "ledger";
const DEFAULT_LOCAL_PATH: &str = ".engram/db";

#[derive(Debug, Deserialize)]
struct CountRow {
    count: u64,
}

/// SurrealDB-backed implementation of [`LedgerStore`].
pub struct SurrealLedgerStore {
    db: Surreal<Any>,
}

impl SurrealLedgerStore {
    /// Create an in-memory instance for testing.
    ///
    /// Connects to `mem://`, selects `engram/ledger`, and runs `init_schema`.
    pub async fn in_memory() -> StorageResult<Self> {
        Self::connect("mem://").await
    }

    /// Connect to any SurrealDB endpoint (`mem://`, `surrealkv://path`, `ws://host`).
    pub async fn connect(url: &str) -> StorageResult<Self> {
        let db = surrealdb::engine::any::connect(url)
            .await
            .map_err(|e| StorageError::Backend(format!("failed to connect to {url}: {e}")))?;

        db.use_ns(NAMESPACE).use_db(DATABASE).await?;
        migrations::init_schema(&db).await?;

        info!("SurrealLedgerStore connected ({})", url);
        Ok(Self { db })
    }

    /// Connect using `SURREALDB_URL`, or local persistence in `.engram/db`.
    pub async fn from_env() -> StorageResult<Self> {
        if let Ok(url) = std::env::var("SURREALDB_URL") {
            return Self::connect(&url).await;
        }

        std::fs::create_dir_all(DEFAULT_LOCAL_PATH)?;
        let url = format!("surrealkv://{DEFAULT_LOCAL_PATH}");
        info!("No SURREALDB_URL found, using local persistence: {}", url);
        Self::connect(&url).await
    }
}

#[async_trait]
impl LedgerStore for SurrealLedgerStore {
    async fn persist(&self, entry: &LedgerEntry) -> StorageResult<()> {
        let expected = self.len().await?;
        if entry.entry_index != expected {
            return Err(StorageError::OutOfOrder {
                expected,
                got: entry.entry_index,
            });
        }

        debug!(index = entry.entry_index, "persisting ledger entry");
        let _created: Option<LedgerEntryRecord> = self
            .db
            .create("ledger_entries")
            .content(LedgerEntryRecord::new(entry))
            .await?;
        Ok(())
    }

    async fn read_range(&self, from: u64, to: u64) -> StorageResult<Vec<LedgerEntry>> {
        if from >= to {
            return Ok(Vec::new());
        }
        let mut res = self
            .db
            .query(
                "SELECT * FROM ledger_entries \
                 WHERE entry_index >= $from AND entry_index < $to \
                 ORDER BY entry_index ASC",
            )
            .bind(("from", from))
            .bind(("to", to))
            .await?;

        let rows: Vec<LedgerEntryRecord> = res.take(0)?;
        rows.into_iter().map(LedgerEntryRecord::into_entry).collect()
    }

    async fn len(&self) -> StorageResult<u64> {
        let mut res = self
            .db
            .query("SELECT count() AS count FROM ledger_entries GROUP ALL")
            .await?;
        let rows: Vec<CountRow> = res.take(0)?;
        Ok(rows.first().map(|r| r.count).unwrap_or(0))
    }

    async fn flush(&self) -> StorageResult<()> {
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "surrealdb"
    }
}
