//! Engram Core Library
//!
//! Forensic recording for multi-agent simulations. Raw telemetry is
//! normalized into events, committed to the hash-chained Justice Log,
//! scored for risk and classified into incidents; the recorded history is
//! reported as a Pre-Incident Risk Dossier (PIRD).
//!
//! Entry point for programmatic use is [`Recorder`].

pub mod config;
pub mod domain;
pub mod dossier;
pub mod ingest;
pub mod metrics;
pub mod normalizer;
pub mod obs;
pub mod projection;
pub mod recorder;
pub mod replay;
pub mod risk;
pub mod synthesizer;
pub mod telemetry;

pub use domain::{
    AgentState, EngramError, Event, EventBody, EventKind, FaultType, Incident, InfoTag, Liability,
    NormalizeError, Position, RawTelemetry, Result, RiskLevel, Signal, MAX_RISK_SCORE,
};

pub use config::{
    Asset, DossierConfig, EngramConfig, IngestConfig, LedgerBackend, LedgerConfig, Objective,
};

pub use dossier::{
    verify_ed25519, ComplianceStatus, DossierGenerator, DossierOptions, DossierSigner,
    Ed25519Signer, Report, FORMAT_VERSION,
};

pub use ingest::{spawn_ingest, IngestHalt, IngestMessage, IngestSender, IngestStats};

pub use projection::{
    AgentView, IncidentRow, LedgerVerification, ProjectionSnapshot, Projector, RiskSummary,
};

pub use recorder::{
    CommitNotice, IngestReceipt, Recorder, SessionMode, SessionStatus, SimulationStatus,
};

pub use replay::{replay_audit, replay_ledger, ReplayAudit, ReplayOutcome};

pub use risk::{RiskDelta, RiskEngine, RiskOutcome, RiskPolicy};

pub use synthesizer::{IncidentPolicy, IncidentSynthesizer};

pub use engram_ledger::{ChainVerdict, JusticeLog, LedgerEntry, LedgerStore, PayloadKind};
