//! PIRD Dossier Generator.
//!
//! A [`Report`] is a pure function of one projection snapshot, the ledger
//! verification taken at that snapshot, and the dossier configuration. Two
//! reports built from an unchanged ledger differ only in `generated_at`
//! (and in the signature, which covers it).

mod report;
mod signer;

pub use signer::{verify_ed25519, DossierSigner, Ed25519Signer};

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use engram_ledger::{to_canonical, BreakReason};

use crate::config::{Asset, DossierConfig, Objective};
use crate::domain::{EngramError, FaultType, Incident, Liability, Result, RiskLevel, Signal};
use crate::projection::{LedgerVerification, ProjectionSnapshot};

/// Report format identifier.
pub const FORMAT_VERSION: &str = "engram.pird/1";

/// What to include in a dossier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DossierOptions {
    pub include_evidence_anchors: bool,
    pub include_narratives: bool,
    pub sign: bool,
}

impl Default for DossierOptions {
    fn default() -> Self {
        Self {
            include_evidence_anchors: true,
            include_narratives: true,
            sign: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComplianceStatus {
    CriticalViolation,
    Compliant,
}

impl ComplianceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CriticalViolation => "CRITICAL_VIOLATION",
            Self::Compliant => "COMPLIANT",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportHeader {
    pub title: String,
    pub format_version: String,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutiveSummary {
    pub status: ComplianceStatus,
    pub recorded_from: Option<DateTime<Utc>>,
    pub recorded_until: Option<DateTime<Utc>>,
    /// Milliseconds between the first and last recorded event
    pub recorded_span_ms: i64,
    pub events_logged: u64,
    pub incidents_total: usize,
    pub system_risk_score: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exposure {
    pub agents_tracked: usize,
    /// Agents with a non-zero risk score
    pub agents_exposed: usize,
    pub agents_by_level: BTreeMap<RiskLevel, usize>,
    pub assets: Vec<Asset>,
    pub total_valuation_usd: f64,
    pub objectives: Vec<Objective>,
    /// `Σ liability/100 × total valuation × exposure factor`
    pub estimated_loss_usd: f64,
}

/// Means over all incidents; zero when there are none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregates {
    pub mean_preventability: f64,
    pub mean_liability: f64,
    pub mean_liability_low: f64,
    pub mean_liability_high: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentEntry {
    pub incident_id: String,
    pub timestamp: DateTime<Utc>,
    pub agent_id: String,
    pub fault_type: FaultType,
    pub trigger: Signal,
    pub trigger_sequence_no: u64,
    pub preventability: u32,
    pub liability: Liability,
    pub estimated_loss_usd: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub narrative: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence_anchors: Option<Vec<u64>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Integrity {
    pub verified: bool,
    pub total_entries: u64,
    pub genesis_hash: Option<String>,
    pub head_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broken_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<BreakReason>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSignature {
    pub algorithm: String,
    pub public_key: String,
    /// Hex signature over [`Report::signing_bytes`]
    pub value: String,
}

/// Pre-Incident Risk Dossier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub header: ReportHeader,
    pub executive_summary: ExecutiveSummary,
    pub exposure: Exposure,
    pub fault_histogram: BTreeMap<FaultType, usize>,
    pub aggregates: Aggregates,
    pub evidence_anchor_counts: BTreeMap<Signal, usize>,
    pub incidents: Vec<IncidentEntry>,
    pub integrity: Integrity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<ReportSignature>,
}

impl Report {
    /// Canonical JSON of the report without its signature.
    pub fn signing_bytes(&self) -> Result<Vec<u8>> {
        let mut unsigned = self.clone();
        unsigned.signature = None;
        Ok(to_canonical(&unsigned)?.into_bytes())
    }

    /// Pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check an Ed25519 signature, if present.
    pub fn verify_signature(&self) -> Result<bool> {
        let Some(sig) = &self.signature else {
            return Ok(false);
        };
        if sig.algorithm != Ed25519Signer::ALGORITHM {
            return Err(EngramError::Signing(format!(
                "unsupported signature algorithm {}",
                sig.algorithm
            )));
        }
        verify_ed25519(&sig.public_key, &self.signing_bytes()?, &sig.value)
    }
}

/// Builds reports from projection snapshots.
pub struct DossierGenerator<'a> {
    config: &'a DossierConfig,
    signer: Option<&'a dyn DossierSigner>,
}

impl<'a> DossierGenerator<'a> {
    pub fn new(config: &'a DossierConfig, signer: Option<&'a dyn DossierSigner>) -> Self {
        Self { config, signer }
    }

    pub fn generate(
        &self,
        projection: &ProjectionSnapshot,
        verification: &LedgerVerification,
        options: DossierOptions,
    ) -> Result<Report> {
        self.generate_at(projection, verification, options, Utc::now())
    }

    /// As [`generate`](Self::generate) with an explicit generation time.
    pub fn generate_at(
        &self,
        projection: &ProjectionSnapshot,
        verification: &LedgerVerification,
        options: DossierOptions,
        generated_at: DateTime<Utc>,
    ) -> Result<Report> {
        if options.sign && self.signer.is_none() {
            return Err(EngramError::SigningUnavailable);
        }

        let total_valuation: f64 = self.config.assets.iter().map(|a| a.valuation_usd).sum();
        let loss_for = |liability: &Liability| {
            round_cents(f64::from(liability.estimate) / 100.0 * total_valuation * self.config.exposure_factor)
        };

        let incidents: Vec<IncidentEntry> = projection
            .incidents
            .iter()
            .map(|inc| IncidentEntry {
                incident_id: inc.incident_id.clone(),
                timestamp: inc.timestamp,
                agent_id: inc.agent_id.clone(),
                fault_type: inc.fault_type,
                trigger: inc.trigger,
                trigger_sequence_no: inc.trigger_sequence_no,
                preventability: inc.preventability,
                liability: inc.liability,
                estimated_loss_usd: loss_for(&inc.liability),
                narrative: options.include_narratives.then(|| inc.narrative.clone()),
                evidence_anchors: options.include_evidence_anchors.then(|| inc.evidence.clone()),
            })
            .collect();

        let mut fault_histogram: BTreeMap<FaultType, usize> =
            FaultType::ALL.into_iter().map(|f| (f, 0)).collect();
        for inc in &projection.incidents {
            *fault_histogram.entry(inc.fault_type).or_default() += 1;
        }

        let broken = !verification.valid;
        let status = if projection.incidents.is_empty() && !broken {
            ComplianceStatus::Compliant
        } else {
            ComplianceStatus::CriticalViolation
        };

        let recorded_span_ms = match (projection.first_event_at, projection.last_event_at) {
            (Some(first), Some(last)) => (last - first).num_milliseconds(),
            _ => 0,
        };

        let estimated_loss_usd = round_cents(incidents.iter().map(|i| i.estimated_loss_usd).sum());

        let mut report = Report {
            header: ReportHeader {
                title: self.config.title.clone(),
                format_version: FORMAT_VERSION.to_string(),
                generated_at,
            },
            executive_summary: ExecutiveSummary {
                status,
                recorded_from: projection.first_event_at,
                recorded_until: projection.last_event_at,
                recorded_span_ms,
                events_logged: projection.events_logged,
                incidents_total: projection.incidents.len(),
                system_risk_score: projection.system_risk_score,
            },
            exposure: Exposure {
                agents_tracked: projection.agents.len(),
                agents_exposed: projection.agents.values().filter(|a| a.risk_score > 0).count(),
                agents_by_level: projection.agents_by_level(),
                assets: self.config.assets.clone(),
                total_valuation_usd: round_cents(total_valuation),
                objectives: self.config.objectives.clone(),
                estimated_loss_usd,
            },
            fault_histogram,
            aggregates: aggregates(&projection.incidents),
            evidence_anchor_counts: projection.anchors_by_signal(),
            incidents,
            integrity: Integrity {
                verified: verification.valid,
                total_entries: verification.total_entries,
                genesis_hash: verification.genesis_hash.clone(),
                head_hash: verification.head_hash.clone(),
                broken_at: verification.broken_at,
                reason: verification.reason,
            },
            signature: None,
        };

        if options.sign {
            let signer = self.signer.ok_or(EngramError::SigningUnavailable)?;
            let bytes = report.signing_bytes()?;
            report.signature = Some(ReportSignature {
                algorithm: signer.algorithm().to_string(),
                public_key: signer.public_key_hex(),
                value: hex::encode(signer.sign(&bytes)?),
            });
        }

        Ok(report)
    }
}

fn aggregates(incidents: &[Incident]) -> Aggregates {
    if incidents.is_empty() {
        return Aggregates {
            mean_preventability: 0.0,
            mean_liability: 0.0,
            mean_liability_low: 0.0,
            mean_liability_high: 0.0,
        };
    }
    let n = incidents.len() as f64;
    let mean = |f: fn(&Incident) -> u32| {
        round_cents(incidents.iter().map(|i| f64::from(f(i))).sum::<f64>() / n)
    };
    Aggregates {
        mean_preventability: mean(|i| i.preventability),
        mean_liability: mean(|i| i.liability.estimate),
        mean_liability_low: mean(|i| i.liability.low),
        mean_liability_high: mean(|i| i.liability.high),
    }
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
