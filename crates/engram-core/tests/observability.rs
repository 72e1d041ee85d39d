//! Observability tests for Engram recording sessions.
//!
//! These verify that structured tracing events are emitted for the key
//! points of a session: commit, rejection, verification, dossier and close.

use engram_core::obs::{
    emit_dossier_generated, emit_event_committed, emit_incident_committed, emit_ledger_verified,
    emit_session_closed, emit_telemetry_rejected, SessionSpan,
};
use engram_core::{DossierOptions, EngramConfig, FaultType, NormalizeError, Recorder};
use tracing_test::traced_test;

/// Test: emit_event_committed creates an info-level event
#[traced_test]
#[test]
fn test_emit_event_committed_logs_sequence_and_score() {
    emit_event_committed(7, "bot-01", 5);
    assert!(logs_contain("ledger.event_committed"));
}

/// Test: emit_incident_committed creates a warn-level event
#[traced_test]
#[test]
fn test_emit_incident_committed_logs_fault() {
    emit_incident_committed(3, "INC-0123456789ab", "bot-02", FaultType::EnvStress, 40);
    assert!(logs_contain("INC-0123456789ab"));
    assert!(logs_contain("ENV_STRESS"));
}

#[traced_test]
#[test]
fn test_emit_telemetry_rejected_logs_reason() {
    emit_telemetry_rejected(&NormalizeError::EmptyAgentId);
    assert!(logs_contain("telemetry.rejected"));
}

#[traced_test]
#[test]
fn test_emit_ledger_verified_both_outcomes() {
    emit_ledger_verified(true, 10, None);
    emit_ledger_verified(false, 10, Some(4));
    assert!(logs_contain("ledger.verified"));
}

#[traced_test]
#[test]
fn test_emit_dossier_generated_and_session_closed() {
    emit_dossier_generated(2, 12, false);
    emit_session_closed("session-1", 10, 2);
    assert!(logs_contain("dossier.generated"));
    assert!(logs_contain("session.closed"));
}

/// Test: SessionSpan::enter creates an entered span without panicking
#[traced_test]
#[test]
fn test_session_span_enter_creates_span() {
    let span = SessionSpan::enter("test-session");
    emit_event_committed(0, "bot-01", 0);
    drop(span);
    assert!(logs_contain("test-session"));
}

/// Test: a full session emits commit, rejection and verification events
#[traced_test]
#[tokio::test]
async fn test_recording_session_emits_lifecycle_events() {
    let recorder = Recorder::in_memory(EngramConfig::default()).await.unwrap();

    recorder
        .ingest_json(r#"{"type":"step","agent_id":"bot-01","observation":{"position":[0,0],"battery":9},"timestamp":1.0}"#)
        .await
        .unwrap();
    assert!(recorder.ingest_json(r#"{"type":"step"}"#).await.is_err());
    recorder.verify_ledger().await.unwrap();
    recorder
        .generate_dossier(DossierOptions::default())
        .await
        .unwrap();
    recorder.close().await.unwrap();

    assert!(logs_contain("ledger.event_committed"));
    assert!(logs_contain("incident.committed"));
    assert!(logs_contain("telemetry.rejected"));
    assert!(logs_contain("ledger.verified"));
    assert!(logs_contain("dossier.generated"));
    assert!(logs_contain("session.closed"));
}
