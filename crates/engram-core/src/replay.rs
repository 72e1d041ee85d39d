//! Rebuild projections from the Justice Log.
//!
//! Projections are a cache: everything a query returns can be re-derived by
//! folding the ledger from genesis. [`replay_ledger`] does that for the
//! verified prefix; [`replay_audit`] additionally re-derives every incident
//! and compares it with what was recorded.

use std::collections::BTreeMap;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use engram_ledger::{canonical_digest, ChainVerdict, JusticeLog, PayloadKind};

use crate::domain::{EngramError, Event, EventBody, Incident, Result};
use crate::metrics::METRICS;
use crate::projection::Projector;
use crate::risk::RiskPolicy;
use crate::synthesizer::IncidentPolicy;

/// Result of folding the ledger.
#[derive(Debug, Clone)]
pub struct ReplayOutcome {
    pub projector: Projector,
    /// Verdict over the committed ledger at replay time
    pub verdict: ChainVerdict,
    /// Entries folded (the verified prefix)
    pub replayed_entries: u64,
    /// Incidents derivable from recorded events but not yet recorded
    pub pending: Vec<Incident>,
    /// Every incident derived from events, in derivation order
    pub derived: Vec<Incident>,
}

/// Determinism check of recorded incidents against a fresh derivation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayAudit {
    pub consistent: bool,
    pub derived: usize,
    pub recorded: usize,
    pub mismatches: Vec<String>,
    /// SHA-256 over the canonical JSON of the derived agents and incidents
    pub replay_digest: String,
}

/// Fold the verified prefix of `log` into fresh projections.
#[instrument(skip_all)]
pub async fn replay_ledger(
    log: &JusticeLog,
    risk: &RiskPolicy,
    incidents: &IncidentPolicy,
) -> Result<ReplayOutcome> {
    let snapshot = log.snapshot();
    let verdict = log.verify_through(snapshot.len).await?;
    let valid_len = verdict.broken_at().unwrap_or(snapshot.len);

    let mut projector = Projector::new(risk.clone(), incidents.clone());
    let mut pending: Vec<Incident> = Vec::new();
    let mut derived: Vec<Incident> = Vec::new();

    let mut entries = log.read_range(0, valid_len);
    while let Some(entry) = entries.next().await {
        let entry = entry?;
        match entry.kind {
            PayloadKind::Event => {
                let body: EventBody = entry.decode()?;
                let event = Event::new(entry.entry_index, body);
                let candidates = projector.apply_event(&event)?;
                derived.extend(candidates.iter().cloned());
                pending.extend(candidates);
            }
            PayloadKind::Incident => {
                let incident: Incident = entry.decode()?;
                pending.retain(|p| p.incident_id != incident.incident_id);
                projector.record_incident(incident);
            }
        }
    }

    if let Some(last) = valid_len.checked_sub(1) {
        if let Some(entry) = log.entry(last).await? {
            projector.set_ledger(engram_ledger::LedgerSnapshot {
                len: valid_len,
                head: entry.this_hash,
            });
        }
    }

    METRICS.inc_replays();
    info!(
        event = "ledger.replayed",
        entries = valid_len,
        events = projector.state().events_logged,
        incidents = projector.state().incidents.len(),
        pending = pending.len(),
    );

    Ok(ReplayOutcome {
        projector,
        verdict,
        replayed_entries: valid_len,
        pending,
        derived,
    })
}

/// Re-derive every incident from recorded events and compare with the ledger.
///
/// # Errors
///
/// `EngramError::ChainBroken` when the ledger does not verify.
pub async fn replay_audit(
    log: &JusticeLog,
    risk: &RiskPolicy,
    incidents: &IncidentPolicy,
) -> Result<ReplayAudit> {
    let outcome = replay_ledger(log, risk, incidents).await?;
    if let ChainVerdict::Broken { at_index, reason } = outcome.verdict {
        return Err(EngramError::ChainBroken { at_index, reason });
    }
    Ok(audit(&outcome))
}

fn audit(outcome: &ReplayOutcome) -> ReplayAudit {
    let recorded: BTreeMap<&str, &Incident> = outcome
        .projector
        .state()
        .incidents
        .iter()
        .map(|i| (i.incident_id.as_str(), i))
        .collect();
    let derived: BTreeMap<&str, &Incident> = outcome
        .derived
        .iter()
        .map(|i| (i.incident_id.as_str(), i))
        .collect();

    let mut mismatches = Vec::new();
    for (id, incident) in &derived {
        match recorded.get(id) {
            None => mismatches.push(format!("{id}: derived but not recorded")),
            Some(r) if *r != *incident => mismatches.push(format!("{id}: recorded content differs")),
            Some(_) => {}
        }
    }
    for id in recorded.keys().filter(|id| !derived.contains_key(*id)) {
        mismatches.push(format!("{id}: recorded but not derivable"));
    }

    let digest_input = serde_json::json!({
        "agents": outcome.projector.state().agents,
        "incidents": outcome.derived,
    });
    let replay_digest = canonical_digest(&digest_input).unwrap_or_default();

    ReplayAudit {
        consistent: mismatches.is_empty(),
        derived: derived.len(),
        recorded: recorded.len(),
        mismatches,
        replay_digest,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EventKind, FaultType, InfoTag, Position};
    use chrono::{TimeZone, Utc};
    use engram_ledger::fakes::MemoryLedgerStore;
    use engram_ledger::WritePolicy;
    use std::sync::Arc;

    fn body(agent: &str, battery: f64, info: Option<InfoTag>, t: i64) -> EventBody {
        EventBody {
            agent_id: agent.to_string(),
            agent_type: "Logistics-Bot".to_string(),
            timestamp: Utc.timestamp_opt(t, 0).unwrap(),
            kind: EventKind::Telemetry,
            position: Position { x: 1.0, y: 1.0 },
            battery_pct: battery,
            status: "ACTIVE".to_string(),
            info,
            compliance_rules: vec![],
            source_seq: None,
        }
    }

    /// Append events through a projector the way the recorder does.
    async fn record(log: &JusticeLog, bodies: &[EventBody]) {
        let mut projector = Projector::default();
        for b in bodies {
            let entry = log.append_json(PayloadKind::Event, b).await.unwrap();
            let event = Event::new(entry.entry_index, b.clone());
            for inc in projector.apply_event(&event).unwrap() {
                log.append_json(PayloadKind::Incident, &inc).await.unwrap();
                projector.record_incident(inc);
            }
        }
    }

    #[tokio::test]
    async fn replay_reproduces_scores_and_incidents() {
        let log = JusticeLog::in_memory().await.unwrap();
        record(
            &log,
            &[
                body("bot-01", 15.0, None, 1),
                body("bot-02", 80.0, Some(InfoTag::Collision), 2),
                body("bot-01", 30.0, None, 3),
            ],
        )
        .await;

        let outcome = replay_ledger(&log, &RiskPolicy::default(), &IncidentPolicy::default())
            .await
            .unwrap();
        let state = outcome.projector.state();
        assert_eq!(outcome.replayed_entries, 5);
        assert!(outcome.pending.is_empty());
        assert_eq!(state.events_logged, 3);
        assert_eq!(state.agents["bot-01"].risk_score, 0);
        assert_eq!(state.agents["bot-02"].risk_score, 20);
        assert_eq!(state.incidents.len(), 2);
        assert_eq!(state.incidents[1].fault_type, FaultType::EnvStress);
        assert_eq!(state.ledger.len, 5);
        assert_eq!(state.ledger.head, log.head());
    }

    #[tokio::test]
    async fn missing_incident_entry_is_pending() {
        let log = JusticeLog::in_memory().await.unwrap();
        log.append_json(PayloadKind::Event, &body("bot-01", 10.0, None, 1))
            .await
            .unwrap();

        let outcome = replay_ledger(&log, &RiskPolicy::default(), &IncidentPolicy::default())
            .await
            .unwrap();
        assert_eq!(outcome.pending.len(), 1);
        assert!(outcome.projector.state().incidents.is_empty());

        let audit = audit(&outcome);
        assert!(!audit.consistent);
        assert!(audit.mismatches[0].contains("derived but not recorded"));
    }

    #[tokio::test]
    async fn audit_is_consistent_and_digest_stable() {
        let log = JusticeLog::in_memory().await.unwrap();
        record(
            &log,
            &[
                body("bot-01", 12.0, Some(InfoTag::Blocked), 1),
                body("bot-01", 11.0, Some(InfoTag::Collision), 2),
            ],
        )
        .await;

        let a = replay_audit(&log, &RiskPolicy::default(), &IncidentPolicy::default())
            .await
            .unwrap();
        let b = replay_audit(&log, &RiskPolicy::default(), &IncidentPolicy::default())
            .await
            .unwrap();
        assert!(a.consistent, "{:?}", a.mismatches);
        assert_eq!(a.derived, 2);
        assert_eq!(a.recorded, 2);
        assert_eq!(a.replay_digest, b.replay_digest);
        assert_eq!(a.replay_digest.len(), 64);
    }

    #[tokio::test]
    async fn broken_chain_stops_at_valid_prefix() {
        let store = Arc::new(MemoryLedgerStore::new());
        let log = JusticeLog::open(store.clone(), WritePolicy::default())
            .await
            .unwrap();
        record(
            &log,
            &[
                body("bot-01", 90.0, None, 1),
                body("bot-02", 90.0, None, 2),
                body("bot-03", 90.0, None, 3),
            ],
        )
        .await;
        assert!(store.corrupt_payload_byte(1, 3));

        let outcome = replay_ledger(&log, &RiskPolicy::default(), &IncidentPolicy::default())
            .await
            .unwrap();
        assert_eq!(outcome.verdict.broken_at(), Some(1));
        assert_eq!(outcome.replayed_entries, 1);
        assert_eq!(outcome.projector.state().agents.len(), 1);

        let err = replay_audit(&log, &RiskPolicy::default(), &IncidentPolicy::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngramError::ChainBroken { at_index: 1, .. }));
    }
}
