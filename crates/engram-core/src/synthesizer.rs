//! Incident Synthesizer: turns risk transitions into classified incidents.
//!
//! Incidents are edge-triggered per `(agent_id, fault_type)`: one is emitted
//! when the fault's trigger signal appears and none again until the signal
//! has been absent for that agent at least once.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt::Write as _;

use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use serde_json::json;

use engram_ledger::canonical_digest;

use crate::domain::{EngramError, Event, FaultType, Incident, Liability, Result};
use crate::risk::RiskDelta;

/// Preventability and liability weighting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IncidentPolicy {
    /// Earlier events of the same agent considered for warnings
    pub evidence_window: usize,
    pub base_compliance: u32,
    pub base_logic_defect: u32,
    pub base_env_stress: u32,
    /// Preventability added per prior warning
    pub per_warning: u32,
    pub max_preventability: u32,
    /// Operator share of liability per fault type, percent
    pub share_compliance: u32,
    pub share_logic_defect: u32,
    pub share_env_stress: u32,
    /// Liability half-width: `max(min_width, base_width - width_step * (evidence - 1))`
    pub base_width: u32,
    pub width_step: u32,
    pub min_width: u32,
}

impl Default for IncidentPolicy {
    fn default() -> Self {
        Self {
            evidence_window: 8,
            base_compliance: 60,
            base_logic_defect: 40,
            base_env_stress: 20,
            per_warning: 15,
            max_preventability: 95,
            share_compliance: 90,
            share_logic_defect: 70,
            share_env_stress: 50,
            base_width: 30,
            width_step: 5,
            min_width: 5,
        }
    }
}

impl IncidentPolicy {
    fn base(&self, fault: FaultType) -> u32 {
        match fault {
            FaultType::ComplianceViolation => self.base_compliance,
            FaultType::LogicDefect => self.base_logic_defect,
            FaultType::EnvStress => self.base_env_stress,
        }
    }

    fn share(&self, fault: FaultType) -> u32 {
        match fault {
            FaultType::ComplianceViolation => self.share_compliance,
            FaultType::LogicDefect => self.share_logic_defect,
            FaultType::EnvStress => self.share_env_stress,
        }
    }

    /// Capped at `max_preventability` and 100.
    pub fn preventability(&self, fault: FaultType, prior_warnings: usize) -> u32 {
        let warnings = u32::try_from(prior_warnings).unwrap_or(u32::MAX);
        self.base(fault)
            .saturating_add(self.per_warning.saturating_mul(warnings))
            .min(self.max_preventability)
            .min(100)
    }

    /// Liability with `low <= estimate <= high` inside `[0, 100]`.
    pub fn liability(&self, fault: FaultType, preventability: u32, evidence_len: usize) -> Liability {
        let estimate = (preventability.saturating_mul(self.share(fault)) / 100).min(100);
        let extra = u32::try_from(evidence_len.saturating_sub(1)).unwrap_or(u32::MAX);
        let half_width = self
            .base_width
            .saturating_sub(self.width_step.saturating_mul(extra))
            .max(self.min_width);
        Liability {
            estimate,
            low: estimate.saturating_sub(half_width),
            high: estimate.saturating_add(half_width).min(100),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Observation {
    sequence_no: u64,
    warned: bool,
}

/// Stateful incident detector, fed in commit order.
#[derive(Debug, Clone, Default)]
pub struct IncidentSynthesizer {
    policy: IncidentPolicy,
    open: BTreeSet<(String, FaultType)>,
    known: HashSet<String>,
    history: HashMap<String, VecDeque<Observation>>,
}

impl IncidentSynthesizer {
    pub fn new(policy: IncidentPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    pub fn policy(&self) -> &IncidentPolicy {
        &self.policy
    }

    /// Mark an incident id as already recorded so it is never emitted again.
    pub fn remember(&mut self, incident_id: &str) {
        self.known.insert(incident_id.to_string());
    }

    /// Observe one committed event and its risk delta.
    ///
    /// Returns the incidents opened by this event, highest priority first.
    pub fn observe(&mut self, event: &Event, delta: &RiskDelta) -> Result<Vec<Incident>> {
        let window = self.policy.evidence_window;
        let warnings: Vec<u64> = self
            .history
            .get(&event.agent_id)
            .map(|h| h.iter().filter(|o| o.warned).map(|o| o.sequence_no).collect())
            .unwrap_or_default();

        let mut incidents = Vec::new();
        for fault in FaultType::ALL {
            let key = (event.agent_id.clone(), fault);
            if !delta.carries(fault.trigger()) {
                self.open.remove(&key);
                continue;
            }
            if !self.open.insert(key) {
                continue;
            }
            let incident = self.build(event, delta, fault, &warnings)?;
            if self.known.insert(incident.incident_id.clone()) {
                incidents.push(incident);
            }
        }

        let history = self.history.entry(event.agent_id.clone()).or_default();
        history.push_back(Observation {
            sequence_no: event.sequence_no,
            warned: !delta.signals.is_empty(),
        });
        while history.len() > window {
            history.pop_front();
        }

        Ok(incidents)
    }

    fn build(
        &self,
        event: &Event,
        delta: &RiskDelta,
        fault: FaultType,
        warnings: &[u64],
    ) -> Result<Incident> {
        let trigger = fault.trigger();
        let incident_id = incident_id(&event.agent_id, fault, trigger.as_str(), event.sequence_no)?;

        let mut evidence = warnings.to_vec();
        evidence.push(event.sequence_no);

        let preventability = self.policy.preventability(fault, warnings.len());
        let liability = self.policy.liability(fault, preventability, evidence.len());

        let mut incident = Incident {
            incident_id,
            timestamp: event.timestamp,
            agent_id: event.agent_id.clone(),
            fault_type: fault,
            trigger,
            trigger_sequence_no: event.sequence_no,
            preventability,
            liability,
            evidence,
            narrative: String::new(),
        };
        incident.narrative = narrative(&incident, event, delta, warnings, self.policy.evidence_window);
        Ok(incident)
    }
}

/// `INC-` + the first 12 hex chars of the canonical digest of the identity fields.
pub fn incident_id(
    agent_id: &str,
    fault: FaultType,
    trigger: &str,
    trigger_sequence_no: u64,
) -> Result<String> {
    let digest = canonical_digest(&json!({
        "agent_id": agent_id,
        "fault_type": fault,
        "trigger": trigger,
        "trigger_sequence_no": trigger_sequence_no,
    }))
    .map_err(EngramError::Ledger)?;
    Ok(format!("INC-{}", &digest[..12]))
}

fn narrative(
    incident: &Incident,
    event: &Event,
    delta: &RiskDelta,
    warnings: &[u64],
    window: usize,
) -> String {
    let mut out = String::new();
    let _ = write!(
        out,
        "{} | Agent {} ({}) raised {} at event #{}: battery {:.1}% at {}, status {}. Classified {}.",
        event.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        event.agent_id,
        event.agent_type,
        incident.trigger,
        event.sequence_no,
        event.battery_pct,
        event.position,
        event.status,
        incident.fault_type,
    );

    if warnings.is_empty() {
        let _ = write!(out, " No prior warnings in the preceding {window} events.");
    } else {
        let refs: Vec<String> = warnings.iter().map(|s| format!("#{s}")).collect();
        let _ = write!(
            out,
            " {} prior warning(s) in the preceding {window} events ({}).",
            warnings.len(),
            refs.join(", ")
        );
    }

    if !event.compliance_rules.is_empty() {
        let _ = write!(out, " Rules violated: {}.", event.compliance_rules.join(", "));
    }

    let others: Vec<&str> = delta
        .signals
        .iter()
        .filter(|s| **s != incident.trigger)
        .map(|s| s.as_str())
        .collect();
    if !others.is_empty() {
        let _ = write!(out, " Co-occurring signals: {}.", others.join(", "));
    }

    let _ = write!(
        out,
        " Preventability {}%. Operator liability {}% (range {}-{}%).",
        incident.preventability,
        incident.liability.estimate,
        incident.liability.low,
        incident.liability.high,
    );
    out
}
