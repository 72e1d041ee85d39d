//! Engram configuration.
//!
//! Loaded from TOML with every field optional, then overridden from the
//! environment:
//!
//! | variable                | field                  |
//! |-------------------------|------------------------|
//! | `ENGRAM_LEDGER_BACKEND` | `ledger.backend`       |
//! | `ENGRAM_LEDGER_PATH`    | `ledger.path`          |
//! | `SURREALDB_URL`         | `ledger.surreal_url`   |
//! | `ENGRAM_SIGNING_KEY`    | `dossier.signing_key`  |

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use engram_ledger::fakes::MemoryLedgerStore;
use engram_ledger::{FsLedgerStore, LedgerStore, SurrealLedgerStore, WritePolicy};

use crate::domain::{EngramError, Result};
use crate::risk::RiskPolicy;
use crate::synthesizer::IncidentPolicy;

/// Where the Justice Log is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerBackend {
    Memory,
    File,
    Surreal,
}

impl std::str::FromStr for LedgerBackend {
    type Err = EngramError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "mem" => Ok(Self::Memory),
            "file" | "fs" => Ok(Self::File),
            "surreal" | "surrealdb" => Ok(Self::Surreal),
            other => Err(EngramError::Config(format!(
                "unknown ledger backend {other:?} (expected memory, file or surreal)"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub backend: LedgerBackend,
    /// Ledger file for the `file` backend
    pub path: PathBuf,
    /// Endpoint for the `surreal` backend; `SURREALDB_URL` or local surrealkv when unset
    pub surreal_url: Option<String>,
    pub max_write_attempts: u32,
    pub retry_backoff_ms: u64,
    pub read_page_size: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            backend: LedgerBackend::File,
            path: PathBuf::from(".engram/justice_log.jsonl"),
            surreal_url: None,
            max_write_attempts: 3,
            retry_backoff_ms: 50,
            read_page_size: 256,
        }
    }
}

impl LedgerConfig {
    pub fn write_policy(&self) -> WritePolicy {
        WritePolicy {
            max_write_attempts: self.max_write_attempts,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            read_page_size: self.read_page_size,
        }
    }

    /// Open the configured store.
    pub async fn open_store(&self) -> Result<Arc<dyn LedgerStore>> {
        let store: Arc<dyn LedgerStore> = match self.backend {
            LedgerBackend::Memory => Arc::new(MemoryLedgerStore::new()),
            LedgerBackend::File => Arc::new(
                FsLedgerStore::open(&self.path).map_err(engram_ledger::LedgerError::from)?,
            ),
            LedgerBackend::Surreal => {
                let store = match &self.surreal_url {
                    Some(url) => SurrealLedgerStore::connect(url).await,
                    None => SurrealLedgerStore::from_env().await,
                };
                Arc::new(store.map_err(engram_ledger::LedgerError::from)?)
            }
        };
        info!(backend = store.backend(), "ledger store opened");
        Ok(store)
    }
}

/// Value exposed to agent failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub id: String,
    #[serde(rename = "type", default)]
    pub asset_type: String,
    pub valuation_usd: f64,
}

/// Mission objective the fleet is contracted to meet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Objective {
    pub id: String,
    pub description: String,
    /// 1 (low) to 10 (mission critical)
    #[serde(default = "default_criticality")]
    pub criticality: u8,
}

fn default_criticality() -> u8 {
    5
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DossierConfig {
    pub title: String,
    pub assets: Vec<Asset>,
    pub objectives: Vec<Objective>,
    /// Share of total asset valuation at stake at 100% liability
    pub exposure_factor: f64,
    /// Hex-encoded 32-byte Ed25519 seed
    pub signing_key: Option<String>,
}

impl Default for DossierConfig {
    fn default() -> Self {
        Self {
            title: "Pre-Incident Risk Dossier (PIRD)".to_string(),
            assets: Vec::new(),
            objectives: Vec::new(),
            exposure_factor: 0.15,
            signing_key: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Bounded ingest queue length
    pub capacity: usize,
    /// Committed-entry notice buffer per subscriber
    pub notice_capacity: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            notice_capacity: 256,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngramConfig {
    pub ledger: LedgerConfig,
    pub risk: RiskPolicy,
    pub incidents: IncidentPolicy,
    pub dossier: DossierConfig,
    pub ingest: IngestConfig,
}

impl EngramConfig {
    /// Parse TOML text and validate it.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(raw).map_err(|e| EngramError::Config(format!("parse: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            EngramError::Config(format!("read {}: {e}", path.display()))
        })?;
        debug!(path = %path.display(), "loading configuration");
        Self::from_toml_str(&raw)
    }

    /// Load `path` if given (defaults otherwise) and apply process environment overrides.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply overrides from `lookup` (normally the process environment).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(backend) = lookup("ENGRAM_LEDGER_BACKEND") {
            self.ledger.backend = backend.parse()?;
        }
        if let Some(path) = lookup("ENGRAM_LEDGER_PATH") {
            self.ledger.path = PathBuf::from(path);
        }
        if let Some(url) = lookup("SURREALDB_URL") {
            self.ledger.surreal_url = Some(url);
        }
        if let Some(key) = lookup("ENGRAM_SIGNING_KEY").filter(|k| !k.trim().is_empty()) {
            self.dossier.signing_key = Some(key.trim().to_string());
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(EngramError::Config(msg.to_string()));
        if self.ingest.capacity == 0 || self.ingest.notice_capacity == 0 {
            return fail("ingest capacities must be greater than zero");
        }
        if self.ledger.max_write_attempts == 0 {
            return fail("ledger.max_write_attempts must be at least 1");
        }
        let threshold = self.risk.low_battery_threshold;
        if !threshold.is_finite() || !(0.0..=100.0).contains(&threshold) {
            return fail("risk.low_battery_threshold must be within [0, 100]");
        }
        if !self.dossier.exposure_factor.is_finite() || self.dossier.exposure_factor < 0.0 {
            return fail("dossier.exposure_factor must be a non-negative number");
        }
        if let Some(asset) = self
            .dossier
            .assets
            .iter()
            .find(|a| !a.valuation_usd.is_finite() || a.valuation_usd < 0.0)
        {
            return Err(EngramError::Config(format!(
                "asset {} has an invalid valuation",
                asset.id
            )));
        }
        Ok(())
    }
}
