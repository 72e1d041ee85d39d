//! End-to-end recording scenarios over a live [`Recorder`].

use std::sync::Arc;

use engram_core::{
    spawn_ingest, ComplianceStatus, DossierOptions, Ed25519Signer, EngramConfig, EngramError,
    FaultType, LedgerBackend, PayloadKind, Recorder, RiskLevel, SessionMode, Signal,
};
use engram_ledger::fakes::MemoryLedgerStore;
use engram_ledger::{FsLedgerStore, LedgerEntry, LedgerStore, GENESIS};
use serde_json::json;

fn config() -> EngramConfig {
    let mut config = EngramConfig::default();
    config.ledger.retry_backoff_ms = 1;
    config.dossier.assets = vec![engram_core::Asset {
        id: "fleet".into(),
        asset_type: "Fleet".into(),
        valuation_usd: 1_000_000.0,
    }];
    config
}

fn step(agent: &str, battery: f64, ts: f64) -> String {
    json!({
        "type": "step",
        "agent_id": agent,
        "agent_type": "Logistics-Bot",
        "observation": { "position": [ts, 1.0], "battery": battery, "status": "ACTIVE" },
        "timestamp": ts,
    })
    .to_string()
}

fn collision(agent: &str, battery: f64, ts: f64) -> String {
    json!({
        "type": "step",
        "agent_id": agent,
        "observation": { "position": [2.0, 2.0], "battery": battery },
        "info": { "event": "collision" },
        "timestamp": ts,
    })
    .to_string()
}

fn violation(agent: &str, ts: f64) -> String {
    json!({
        "type": "step",
        "agent_id": agent,
        "observation": { "position": [0.0, 0.0], "battery": 70.0 },
        "info": { "violations": [{ "rule": "GDPR", "msg": "data exported" }] },
        "timestamp": ts,
    })
    .to_string()
}

async fn record_all(recorder: &Recorder, lines: &[String]) {
    for line in lines {
        recorder.ingest_json(line).await.unwrap();
    }
}

#[tokio::test]
async fn low_battery_raises_and_clears_single_incident() {
    let recorder = Recorder::in_memory(config()).await.unwrap();

    recorder.ingest_json(&step("bot-01", 15.0, 1.0)).await.unwrap();
    assert_eq!(recorder.get_system_risk_score(), 5);
    recorder.ingest_json(&step("bot-01", 10.0, 2.0)).await.unwrap();
    assert_eq!(recorder.get_system_risk_score(), 5);
    recorder.ingest_json(&step("bot-01", 25.0, 3.0)).await.unwrap();
    assert_eq!(recorder.get_system_risk_score(), 0);

    let incidents = recorder.get_incidents();
    assert_eq!(incidents.len(), 1);
    assert_eq!(incidents[0].fault_type, FaultType::LogicDefect);
    assert_eq!(incidents[0].agent_id, "bot-01");

    let agents = recorder.get_active_agents();
    assert_eq!(agents.len(), 1);
    assert_eq!(agents[0].risk_level, RiskLevel::Low);
    assert_eq!(agents[0].agent_type, "Logistics-Bot");

    // event, incident, event, event
    let log = recorder.log();
    assert_eq!(log.len(), 4);
    assert_eq!(log.entry(1).await.unwrap().unwrap().kind, PayloadKind::Incident);
    assert!(recorder.verify_ledger().await.unwrap().valid);
}

#[tokio::test]
async fn collision_and_violation_open_their_faults() {
    let recorder = Recorder::in_memory(config()).await.unwrap();
    record_all(
        &recorder,
        &[collision("bot-02", 80.0, 1.0), violation("bot-03", 2.0)],
    )
    .await;

    let incidents = recorder.get_incidents();
    let faults: Vec<_> = incidents.iter().map(|i| i.fault_type).collect();
    assert_eq!(faults, vec![FaultType::EnvStress, FaultType::ComplianceViolation]);

    let incident = recorder.get_incident(&incidents[0].incident_id).unwrap();
    assert_eq!(incident.trigger, Signal::Collision);
    assert_eq!(incident.trigger_sequence_no, 0);
    assert!(incident.evidence.contains(&0));

    let narrative = recorder
        .get_incident_details(&incidents[1].incident_id)
        .unwrap();
    assert!(narrative.contains("bot-03"));

    let summary = recorder.get_risk_summary();
    assert_eq!(summary.total_incidents, 2);
    assert_eq!(summary.highest_risk_agent.as_deref(), Some("bot-02"));
    assert_eq!(summary.latest_event.unwrap().agent_id, "bot-03");
}

#[tokio::test]
async fn snapshot_commits_one_chained_event_per_agent() {
    let recorder = Recorder::in_memory(config()).await.unwrap();
    let snapshot = json!({
        "type": "snapshot",
        "timestamp": 10.0,
        "agents": {
            "bot-c": { "position": [0.0, 0.0], "battery": 90.0 },
            "bot-a": { "position": [1.0, 0.0], "battery": 80.0 },
            "bot-b": { "position": [2.0, 0.0], "battery": 70.0 },
        }
    })
    .to_string();

    let receipt = recorder.ingest_json(&snapshot).await.unwrap();
    assert_eq!(receipt.events, vec![0, 1, 2]);
    assert!(receipt.incidents.is_empty());

    let entries: Vec<LedgerEntry> = futures::TryStreamExt::try_collect(recorder.log().read_range(0, 3))
        .await
        .unwrap();
    assert_eq!(entries[0].prev_hash, GENESIS);
    assert_eq!(entries[1].prev_hash, entries[0].this_hash);
    assert_eq!(entries[2].prev_hash, entries[1].this_hash);
    assert!(entries[0].payload.contains("\"bot-a\""));
    assert!(entries[0].payload.contains("system.sync"));

    let ids: Vec<_> = recorder
        .get_active_agents()
        .into_iter()
        .map(|a| a.agent_id)
        .collect();
    assert_eq!(ids, vec!["bot-a", "bot-b", "bot-c"]);
}

#[tokio::test]
async fn concurrent_producers_yield_one_verifiable_chain() {
    let recorder = Arc::new(Recorder::in_memory(config()).await.unwrap());
    let (tx, worker) = spawn_ingest(recorder.clone());

    let mut producers = Vec::new();
    for p in 0..4u32 {
        let tx = tx.clone();
        producers.push(tokio::spawn(async move {
            for n in 0..20u32 {
                let battery = if n % 5 == 0 { 12.0 } else { 60.0 };
                tx.send_json(step(&format!("bot-{p}"), battery, f64::from(n) + 1.0))
                    .await
                    .unwrap();
            }
        }));
    }
    for producer in producers {
        producer.await.unwrap();
    }
    drop(tx);
    let stats = worker.await.unwrap();

    assert_eq!(stats.accepted, 80);
    assert!(stats.is_complete());
    assert_eq!(stats.events_committed, 80);
    // Each producer drops below threshold four times.
    assert_eq!(stats.incidents_committed, 16);
    assert_eq!(recorder.log().len(), 96);

    let verification = recorder.verify_ledger().await.unwrap();
    assert!(verification.valid);
    assert_eq!(verification.total_entries, 96);
    assert!(recorder.replay_audit().await.unwrap().consistent);
}

#[tokio::test]
async fn reopened_session_replays_to_identical_projection() {
    let store: Arc<MemoryLedgerStore> = Arc::new(MemoryLedgerStore::new());
    let lines = vec![
        step("bot-01", 15.0, 1.0),
        collision("bot-02", 50.0, 2.0),
        violation("bot-01", 3.0),
        step("bot-01", 40.0, 4.0),
    ];

    let first = Recorder::with_store(store.clone(), config()).await.unwrap();
    record_all(&first, &lines).await;
    let before = first.projection();
    first.close().await.unwrap();

    let second = Recorder::with_store(store.clone(), config()).await.unwrap();
    let after = second.projection();
    assert_eq!(after.agents, before.agents);
    assert_eq!(after.incidents, before.incidents);
    assert_eq!(after.events_logged, before.events_logged);
    assert_eq!(after.ledger, before.ledger);
    assert_eq!(second.get_status().mode, SessionMode::Live);

    // New events continue the same chain.
    second.ingest_json(&step("bot-03", 90.0, 5.0)).await.unwrap();
    assert_eq!(second.get_status().events_logged, 5);
    assert!(second.verify_ledger().await.unwrap().valid);
}

#[tokio::test]
async fn dossier_is_stable_over_an_unchanged_ledger() {
    let recorder = Recorder::in_memory(config()).await.unwrap();
    record_all(
        &recorder,
        &[step("bot-01", 15.0, 1.0), collision("bot-02", 50.0, 2.5)],
    )
    .await;

    let first = recorder.generate_dossier(DossierOptions::default()).await.unwrap();
    let mut second = recorder.generate_dossier(DossierOptions::default()).await.unwrap();
    second.header.generated_at = first.header.generated_at;
    assert_eq!(first, second);

    let summary = &first.executive_summary;
    assert_eq!(summary.status, ComplianceStatus::CriticalViolation);
    assert_eq!(summary.recorded_span_ms, 1500);
    assert_eq!(summary.incidents_total, 2);
    assert_eq!(first.fault_histogram.len(), 3);
    assert!(first.integrity.verified);
    assert_eq!(first.integrity.total_entries, 4);
    assert!(first.exposure.estimated_loss_usd > 0.0);
    assert!(first.render_text().contains("END OF DOSSIER"));
}

#[tokio::test]
async fn dossier_matches_ledger_after_partial_write_failure() {
    let store = Arc::new(MemoryLedgerStore::new());
    let recorder = Recorder::with_store(store.clone(), config()).await.unwrap();

    // Event lands, its incident does not.
    store.fail_next_writes_of(PayloadKind::Incident, 3);
    let err = recorder.ingest_json(&step("bot-01", 15.0, 1.0)).await.unwrap_err();
    assert!(matches!(err, EngramError::Ledger(_)));
    assert_eq!(recorder.get_status().events_logged, 1);
    assert!(recorder.get_incidents().is_empty());

    // The deferred incident lands, the next event does not.
    store.fail_next_writes_of(PayloadKind::Event, 3);
    let err = recorder.ingest_json(&step("bot-02", 50.0, 2.0)).await.unwrap_err();
    assert!(matches!(err, EngramError::Ledger(_)));

    let kinds: Vec<PayloadKind> = store.entries().iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![PayloadKind::Event, PayloadKind::Incident]);
    assert_eq!(recorder.get_incidents().len(), 1);
    assert_eq!(recorder.projection().ledger, recorder.log().snapshot());

    let report = recorder.generate_dossier(DossierOptions::default()).await.unwrap();
    let summary = &report.executive_summary;
    assert_eq!(summary.status, ComplianceStatus::CriticalViolation);
    assert_eq!(
        summary.incidents_total as u64 + summary.events_logged,
        report.integrity.total_entries
    );
    assert!(report.integrity.verified);
    assert_eq!(report.integrity.head_hash, recorder.log().head());
}

#[tokio::test]
async fn signed_dossier_verifies_and_unsigned_request_fails_without_key() {
    let recorder = Recorder::in_memory(config()).await.unwrap();
    let err = recorder
        .generate_dossier(DossierOptions {
            sign: true,
            ..DossierOptions::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, EngramError::SigningUnavailable));

    let recorder = recorder.with_signer(Arc::new(Ed25519Signer::from_seed([7u8; 32])));
    recorder.ingest_json(&step("bot-01", 15.0, 1.0)).await.unwrap();
    let report = recorder
        .generate_dossier(DossierOptions {
            sign: true,
            ..DossierOptions::default()
        })
        .await
        .unwrap();
    assert!(report.verify_signature().unwrap());

    let mut forged = report.clone();
    forged.executive_summary.incidents_total = 0;
    assert!(!forged.verify_signature().unwrap());
}

#[tokio::test]
async fn tampered_ledger_is_reported_and_reopens_compromised() {
    let store: Arc<MemoryLedgerStore> = Arc::new(MemoryLedgerStore::new());
    let recorder = Recorder::with_store(store.clone(), config()).await.unwrap();
    record_all(
        &recorder,
        &[
            step("bot-01", 50.0, 1.0),
            step("bot-02", 60.0, 2.0),
            step("bot-03", 70.0, 3.0),
        ],
    )
    .await;

    assert!(store.corrupt_payload_byte(1, 5));
    let verification = recorder.verify_ledger().await.unwrap();
    assert!(!verification.valid);
    assert_eq!(verification.broken_at, Some(1));
    assert_eq!(recorder.get_status().mode, SessionMode::Compromised);

    let err = recorder.ingest_json(&step("bot-01", 50.0, 4.0)).await.unwrap_err();
    assert!(matches!(err, EngramError::ChainBroken { at_index: 1, .. }));

    let report = recorder.generate_dossier(DossierOptions::default()).await.unwrap();
    assert_eq!(report.executive_summary.status, ComplianceStatus::CriticalViolation);
    assert_eq!(report.integrity.broken_at, Some(1));

    let reopened = Recorder::with_store(store.clone(), config()).await.unwrap();
    assert_eq!(reopened.get_status().mode, SessionMode::Compromised);
    // Projections cover the verified prefix only.
    assert_eq!(reopened.get_status().events_logged, 1);
    let report = reopened.generate_dossier(DossierOptions::default()).await.unwrap();
    assert_eq!(report.integrity.broken_at, Some(1));
    assert_eq!(report.executive_summary.events_logged, 1);
    assert!(matches!(
        reopened.replay_audit().await,
        Err(EngramError::ChainBroken { at_index: 1, .. })
    ));
    assert!(matches!(reopened.seal().await, Err(EngramError::ChainBroken { .. })));
}

#[tokio::test]
async fn file_backed_session_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config();
    config.ledger.backend = LedgerBackend::File;
    config.ledger.path = dir.path().join("justice_log.jsonl");

    let head = {
        let recorder = Recorder::open(config.clone()).await.unwrap();
        record_all(
            &recorder,
            &[step("bot-01", 15.0, 1.0), step("bot-01", 30.0, 2.0)],
        )
        .await;
        recorder.close().await.unwrap();
        recorder.log().head()
    };

    let store = FsLedgerStore::open(&config.ledger.path).unwrap();
    assert_eq!(store.len().await.unwrap(), 3);

    let recorder = Recorder::open(config).await.unwrap();
    assert_eq!(recorder.log().head(), head);
    assert_eq!(recorder.get_incidents().len(), 1);
    let manifest = recorder.seal().await.unwrap();
    assert!(manifest.verdict.is_verified());
    assert_eq!(manifest.total_entries, 3);
}

#[tokio::test]
async fn audit_trail_lists_every_entry() {
    let recorder = Recorder::in_memory(config()).await.unwrap();
    record_all(&recorder, &[step("bot-01", 15.0, 1.0)]).await;
    let trail = recorder.audit_trail().await.unwrap();
    assert!(trail.contains("[Entry 0] event"));
    assert!(trail.contains("[Entry 1] incident"));
    assert!(trail.contains("Valid: true"));
}
