//! Query-side projections derived from the Justice Log.
//!
//! A [`Projector`] folds committed events through the risk engine and the
//! incident synthesizer. After every pipeline step the recorder publishes an
//! immutable [`ProjectionSnapshot`]; every query reads one snapshot, so a
//! query never observes a half-applied step.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use engram_ledger::{BreakReason, ChainVerdict, LedgerSnapshot, GENESIS};

use crate::domain::{
    AgentState, Event, FaultType, Incident, Liability, Result, RiskLevel, Signal,
};
use crate::risk::{RiskEngine, RiskPolicy};
use crate::synthesizer::{IncidentPolicy, IncidentSynthesizer};

/// Consistent view of every derived fact at one ledger position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectionSnapshot {
    pub agents: BTreeMap<String, AgentState>,
    /// Recorded incidents in commit order
    pub incidents: Vec<Incident>,
    pub system_risk_score: u32,
    pub events_logged: u64,
    pub first_event_at: Option<DateTime<Utc>>,
    pub last_event_at: Option<DateTime<Utc>>,
    pub latest_event: Option<Event>,
    /// Ledger length and head this snapshot was derived from
    pub ledger: LedgerSnapshot,
}

impl Default for ProjectionSnapshot {
    fn default() -> Self {
        Self {
            agents: BTreeMap::new(),
            incidents: Vec::new(),
            system_risk_score: 0,
            events_logged: 0,
            first_event_at: None,
            last_event_at: None,
            latest_event: None,
            ledger: LedgerSnapshot {
                len: 0,
                head: GENESIS.to_string(),
            },
        }
    }
}

/// Row of `get_active_agents`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentView {
    pub agent_id: String,
    #[serde(rename = "type")]
    pub agent_type: String,
    pub risk_score: u32,
    pub risk_level: RiskLevel,
    pub battery: f64,
    pub status: String,
}

impl From<&AgentState> for AgentView {
    fn from(agent: &AgentState) -> Self {
        Self {
            agent_id: agent.agent_id.clone(),
            agent_type: agent.agent_type.clone(),
            risk_score: agent.risk_score,
            risk_level: agent.risk_level,
            battery: agent.battery_pct,
            status: agent.status.clone(),
        }
    }
}

/// Row of `get_incidents`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentRow {
    pub incident_id: String,
    pub timestamp: DateTime<Utc>,
    pub agent_id: String,
    pub fault_type: FaultType,
    pub preventability: u32,
    pub liability: Liability,
}

impl From<&Incident> for IncidentRow {
    fn from(incident: &Incident) -> Self {
        Self {
            incident_id: incident.incident_id.clone(),
            timestamp: incident.timestamp,
            agent_id: incident.agent_id.clone(),
            fault_type: incident.fault_type,
            preventability: incident.preventability,
            liability: incident.liability,
        }
    }
}

/// Result of `get_risk_summary`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskSummary {
    pub total_incidents: usize,
    /// Highest-scoring agent (lowest id on ties); `None` while nobody carries risk
    pub highest_risk_agent: Option<String>,
    pub latest_event: Option<Event>,
}

/// Result of `verify_ledger`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerVerification {
    pub valid: bool,
    pub total_entries: u64,
    /// `this_hash` of entry 0, or `GENESIS` for an empty ledger; `None` if entry 0 is unreadable
    pub genesis_hash: Option<String>,
    pub head_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broken_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<BreakReason>,
}

impl LedgerVerification {
    pub fn new(verdict: &ChainVerdict, snapshot: &LedgerSnapshot, genesis_hash: Option<String>) -> Self {
        let (broken_at, reason) = match verdict {
            ChainVerdict::Verified { .. } => (None, None),
            ChainVerdict::Broken { at_index, reason } => (Some(*at_index), Some(*reason)),
        };
        Self {
            valid: verdict.is_verified(),
            total_entries: snapshot.len,
            genesis_hash,
            head_hash: snapshot.head.clone(),
            broken_at,
            reason,
        }
    }
}

impl ProjectionSnapshot {
    pub fn active_agents(&self) -> Vec<AgentView> {
        self.agents.values().map(AgentView::from).collect()
    }

    pub fn incident_rows(&self) -> Vec<IncidentRow> {
        self.incidents.iter().map(IncidentRow::from).collect()
    }

    pub fn incident(&self, incident_id: &str) -> Option<&Incident> {
        self.incidents.iter().find(|i| i.incident_id == incident_id)
    }

    pub fn risk_summary(&self) -> RiskSummary {
        let highest = self
            .agents
            .values()
            .filter(|a| a.risk_score > 0)
            .fold(None::<&AgentState>, |best, a| match best {
                Some(b) if b.risk_score >= a.risk_score => Some(b),
                _ => Some(a),
            });
        RiskSummary {
            total_incidents: self.incidents.len(),
            highest_risk_agent: highest.map(|a| a.agent_id.clone()),
            latest_event: self.latest_event.clone(),
        }
    }

    /// Agent count per risk level; every level present.
    pub fn agents_by_level(&self) -> BTreeMap<RiskLevel, usize> {
        let mut counts: BTreeMap<RiskLevel, usize> =
            RiskLevel::ALL.into_iter().map(|l| (l, 0)).collect();
        for agent in self.agents.values() {
            *counts.entry(agent.risk_level).or_default() += 1;
        }
        counts
    }

    /// Evidence anchors per triggering signal class.
    pub fn anchors_by_signal(&self) -> BTreeMap<Signal, usize> {
        let mut counts = BTreeMap::new();
        for incident in &self.incidents {
            *counts.entry(incident.trigger).or_default() += incident.evidence.len();
        }
        counts
    }
}

/// Folds committed ledger facts into a [`ProjectionSnapshot`].
#[derive(Debug, Clone, Default)]
pub struct Projector {
    risk: RiskEngine,
    synthesizer: IncidentSynthesizer,
    state: ProjectionSnapshot,
}

impl Projector {
    pub fn new(risk: RiskPolicy, incidents: IncidentPolicy) -> Self {
        Self {
            risk: RiskEngine::new(risk),
            synthesizer: IncidentSynthesizer::new(incidents),
            state: ProjectionSnapshot::default(),
        }
    }

    /// Apply a committed event; returns incidents it opens (not yet recorded).
    pub fn apply_event(&mut self, event: &Event) -> Result<Vec<Incident>> {
        let outcome = self.risk.apply(event);
        let candidates = self.synthesizer.observe(event, &outcome.delta)?;

        self.state
            .agents
            .insert(outcome.agent.agent_id.clone(), outcome.agent);
        self.state.system_risk_score = outcome.system_score;
        self.state.events_logged += 1;
        self.state.first_event_at.get_or_insert(event.timestamp);
        self.state.last_event_at = Some(event.timestamp);
        self.state.latest_event = Some(event.clone());
        Ok(candidates)
    }

    /// Add a committed incident to the projection.
    pub fn record_incident(&mut self, incident: Incident) {
        self.synthesizer.remember(&incident.incident_id);
        self.state.incidents.push(incident);
    }

    /// Note the ledger position the projection now reflects.
    pub fn set_ledger(&mut self, ledger: LedgerSnapshot) {
        self.state.ledger = ledger;
    }

    /// Current state, for publishing.
    pub fn snapshot(&self) -> ProjectionSnapshot {
        self.state.clone()
    }

    pub fn state(&self) -> &ProjectionSnapshot {
        &self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EventBody, EventKind, InfoTag, Position};
    use chrono::TimeZone;

    fn event(seq: u64, agent: &str, battery: f64, info: Option<InfoTag>) -> Event {
        Event::new(
            seq,
            EventBody {
                agent_id: agent.to_string(),
                agent_type: "Logistics-Bot".to_string(),
                timestamp: Utc.timestamp_opt(2_000 + seq as i64, 0).unwrap(),
                kind: EventKind::Telemetry,
                position: Position { x: 0.0, y: 0.0 },
                battery_pct: battery,
                status: "ACTIVE".to_string(),
                info,
                compliance_rules: vec![],
                source_seq: None,
            },
        )
    }

    fn project(events: &[Event]) -> Projector {
        let mut projector = Projector::default();
        for e in events {
            for incident in projector.apply_event(e).unwrap() {
                projector.record_incident(incident);
            }
        }
        projector
    }

    #[test]
    fn tracks_span_and_counts() {
        let p = project(&[
            event(0, "bot-01", 90.0, None),
            event(1, "bot-02", 15.0, None),
            event(2, "bot-01", 80.0, Some(InfoTag::Collision)),
        ]);
        let s = p.state();
        assert_eq!(s.events_logged, 3);
        assert_eq!(s.first_event_at, Some(Utc.timestamp_opt(2_000, 0).unwrap()));
        assert_eq!(s.last_event_at, Some(Utc.timestamp_opt(2_002, 0).unwrap()));
        assert_eq!(s.incidents.len(), 2);
        assert_eq!(s.system_risk_score, 20);
        assert_eq!(s.latest_event.as_ref().map(|e| e.sequence_no), Some(2));
    }

    #[test]
    fn risk_summary_picks_highest_then_lowest_id() {
        let p = project(&[
            event(0, "bot-02", 15.0, None),
            event(1, "bot-01", 15.0, None),
        ]);
        let summary = p.state().risk_summary();
        assert_eq!(summary.highest_risk_agent.as_deref(), Some("bot-01"));
        assert_eq!(summary.total_incidents, 2);

        let calm = project(&[event(0, "bot-01", 90.0, None)]);
        assert_eq!(calm.state().risk_summary().highest_risk_agent, None);
    }

    #[test]
    fn agent_view_renames_type() {
        let p = project(&[event(0, "bot-01", 42.0, None)]);
        let rows = p.state().active_agents();
        let v = serde_json::to_value(&rows[0]).unwrap();
        assert_eq!(v["type"], "Logistics-Bot");
        assert_eq!(v["battery"], 42.0);
        assert_eq!(v["risk_level"], "LOW");
    }

    #[test]
    fn level_and_anchor_histograms() {
        let p = project(&[
            event(0, "bot-01", 90.0, Some(InfoTag::Blocked)),
            event(1, "bot-01", 90.0, Some(InfoTag::Collision)),
            event(2, "bot-02", 10.0, None),
        ]);
        let levels = p.state().agents_by_level();
        assert_eq!(levels.len(), 4);
        assert_eq!(levels[&RiskLevel::Medium], 1);
        assert_eq!(levels[&RiskLevel::Low], 1);

        let anchors = p.state().anchors_by_signal();
        assert_eq!(anchors[&Signal::Collision], 2);
        assert_eq!(anchors[&Signal::LowBattery], 1);
    }
}
