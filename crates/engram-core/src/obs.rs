//! Structured observability hooks for Engram recording sessions.
//!
//! - Session-scoped tracing spans via the `SessionSpan` RAII guard
//! - Emission functions for commit, rejection, verification, dossier and shutdown
//!
//! Filtering follows `RUST_LOG`; see [`crate::telemetry::init_tracing`].

use tracing::{info, warn};

use crate::domain::{FaultType, NormalizeError};

/// RAII guard that enters a session-scoped span for its lifetime.
///
/// ```ignore
/// let _span = SessionSpan::enter("4f0c...");
/// // every event below carries session_id
/// ```
pub struct SessionSpan {
    _span: tracing::span::EnteredSpan,
}

impl SessionSpan {
    pub fn enter(session_id: &str) -> Self {
        let span = tracing::info_span!("engram.session", session_id = %session_id);
        Self {
            _span: span.entered(),
        }
    }
}

/// Emit event: a normalized event committed to the ledger.
pub fn emit_event_committed(sequence_no: u64, agent_id: &str, risk_score: u32) {
    info!(
        event = "ledger.event_committed",
        sequence_no = sequence_no,
        agent_id = %agent_id,
        risk_score = risk_score,
    );
}

/// Emit event: an incident committed to the ledger.
pub fn emit_incident_committed(
    entry_index: u64,
    incident_id: &str,
    agent_id: &str,
    fault_type: FaultType,
    preventability: u32,
) {
    warn!(
        event = "incident.committed",
        entry_index = entry_index,
        incident_id = %incident_id,
        agent_id = %agent_id,
        fault_type = %fault_type,
        preventability = preventability,
    );
}

/// Emit event: raw telemetry rejected before commit (warning level).
pub fn emit_telemetry_rejected(error: &NormalizeError) {
    warn!(event = "telemetry.rejected", reason = %error);
}

/// Emit event: ledger verification outcome. A broken chain logs at error level.
pub fn emit_ledger_verified(valid: bool, total_entries: u64, broken_at: Option<u64>) {
    match broken_at {
        None => info!(
            event = "ledger.verified",
            valid = valid,
            total_entries = total_entries,
        ),
        Some(at_index) => tracing::error!(
            event = "ledger.verified",
            valid = valid,
            total_entries = total_entries,
            broken_at = at_index,
        ),
    }
}

/// Emit event: dossier generated.
pub fn emit_dossier_generated(incidents: usize, total_entries: u64, signed: bool) {
    info!(
        event = "dossier.generated",
        incidents = incidents,
        total_entries = total_entries,
        signed = signed,
    );
}

/// Emit event: recording session closed.
pub fn emit_session_closed(session_id: &str, events_logged: u64, incidents: usize) {
    info!(
        event = "session.closed",
        session_id = %session_id,
        events_logged = events_logged,
        incidents = incidents,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_span_create() {
        let _span = SessionSpan::enter("test-session-id");
    }
}
