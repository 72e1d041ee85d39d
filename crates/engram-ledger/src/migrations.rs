//! SurrealDB schema initialization for the ledger.

use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::storage_traits::StorageResult;

/// Define the `ledger_entries` table. Idempotent.
pub async fn init_schema(db: &Surreal<Any>) -> StorageResult<()> {
    info!("Initializing Engram ledger schema");
    init_ledger_entries_table(db).await?;
    Ok(())
}

/// Initialize `ledger_entries`
///
/// Schema:
/// ```text
/// TABLE ledger_entries {
///   entry_index: INT (unique)
///   kind:        STRING (event | incident)
///   payload:     STRING (canonical JSON)
///   prev_hash:   STRING
///   this_hash:   STRING
///   recorded_at: DATETIME
/// }
/// ```
///
/// Rows are never updated or deleted.
async fn init_ledger_entries_table(db: &Surreal<Any>) -> StorageResult<()> {
    debug!("Initializing ledger_entries table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS ledger_entries AS
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR read FULL
                FOR update NONE
                FOR delete NONE;

        DEFINE INDEX IF NOT EXISTS idx_entry_index ON TABLE ledger_entries COLUMNS entry_index UNIQUE;
    "#;

    db.query(sql).await?.check()?;
    Ok(())
}
