//! Row mapping for the SurrealDB `ledger_entries` table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::storage_traits::{LedgerEntry, PayloadKind};

/// Serialize chrono DateTime as a SurrealDB datetime.
mod surreal_datetime {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let sd = SurrealDatetime::from(*date);
        serde::Serialize::serialize(&sd, serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = SurrealDatetime::deserialize(deserializer)?;
        Ok(DateTime::from(sd))
    }
}

/// One row of `ledger_entries`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntryRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub entry_index: u64,
    pub kind: String,
    pub payload: String,
    pub prev_hash: String,
    pub this_hash: String,
    #[serde(with = "surreal_datetime")]
    pub recorded_at: DateTime<Utc>,
}

impl LedgerEntryRecord {
    pub fn new(entry: &LedgerEntry) -> Self {
        Self {
            id: None,
            entry_index: entry.entry_index,
            kind: entry.kind.as_str().to_string(),
            payload: entry.payload.clone(),
            prev_hash: entry.prev_hash.clone(),
            this_hash: entry.this_hash.clone(),
            recorded_at: Utc::now(),
        }
    }

    /// Convert back to a chain entry; an unknown kind marks the row corrupt.
    pub fn into_entry(self) -> Result<LedgerEntry, StorageError> {
        let kind: PayloadKind = self.kind.parse().map_err(|_| StorageError::Corrupt {
            index: self.entry_index,
            reason: format!("unknown payload kind {:?}", self.kind),
        })?;
        Ok(LedgerEntry {
            entry_index: self.entry_index,
            kind,
            payload: self.payload,
            prev_hash: self.prev_hash,
            this_hash: self.this_hash,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage_traits::{chain_link, GENESIS};

    #[test]
    fn record_round_trips_entry_fields() {
        let entry = LedgerEntry {
            entry_index: 4,
            kind: PayloadKind::Incident,
            payload: "[]".to_string(),
            prev_hash: GENESIS.to_string(),
            this_hash: chain_link(GENESIS, "[]"),
        };
        let record = LedgerEntryRecord::new(&entry);
        assert_eq!(record.kind, "incident");
        assert_eq!(record.into_entry().unwrap(), entry);
    }

    #[test]
    fn unknown_kind_is_corrupt() {
        let entry = LedgerEntry {
            entry_index: 2,
            kind: PayloadKind::Event,
            payload: "{}".to_string(),
            prev_hash: GENESIS.to_string(),
            this_hash: chain_link(GENESIS, "{}"),
        };
        let mut record = LedgerEntryRecord::new(&entry);
        record.kind = "snapshot".to_string();
        assert!(matches!(
            record.into_entry(),
            Err(StorageError::Corrupt { index: 2, .. })
        ));
    }
}
