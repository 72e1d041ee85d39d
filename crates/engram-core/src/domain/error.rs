//! Error taxonomy for Engram.

use engram_ledger::{BreakReason, LedgerError};

/// Why a raw telemetry message was rejected before commit.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NormalizeError {
    #[error("telemetry is not valid JSON: {0}")]
    Decode(String),

    #[error("agent_id must not be empty")]
    EmptyAgentId,

    #[error("agent {agent_id}: battery {value} outside [0, 100]")]
    BatteryOutOfRange { agent_id: String, value: f64 },

    #[error("agent {agent_id}: position must be two finite numbers")]
    InvalidPosition { agent_id: String },

    #[error("timestamp {0} is not a finite, non-negative epoch time")]
    InvalidTimestamp(f64),

    #[error("snapshot carries no agents")]
    EmptySnapshot,
}

/// Engram domain errors.
#[derive(Debug, thiserror::Error)]
pub enum EngramError {
    #[error("malformed telemetry: {0}")]
    MalformedTelemetry(#[from] NormalizeError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("ledger chain broken at entry {at_index}: {reason}")]
    ChainBroken { at_index: u64, reason: BreakReason },

    #[error("dossier signature requested but no signing key is configured")]
    SigningUnavailable,

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("incident not found: {0}")]
    IncidentNotFound(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("recording session is closed")]
    SessionClosed,
}

/// Result type for Engram domain operations.
pub type Result<T> = std::result::Result<T, EngramError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_broken_names_index() {
        let err = EngramError::ChainBroken {
            at_index: 42,
            reason: BreakReason::HashMismatch,
        };
        let msg = err.to_string();
        assert!(msg.contains("entry 42"));
        assert!(msg.contains("hash mismatch"));
    }

    #[test]
    fn test_normalize_error_converts() {
        let err: EngramError = NormalizeError::EmptySnapshot.into();
        assert!(matches!(err, EngramError::MalformedTelemetry(_)));
        assert!(err.to_string().contains("no agents"));
    }

    #[test]
    fn test_ledger_error_converts() {
        let err: EngramError = LedgerError::WriteFailed {
            index: 3,
            attempts: 3,
            reason: "disk full".to_string(),
        }
        .into();
        assert!(matches!(err, EngramError::Ledger(_)));
        assert!(err.to_string().contains("disk full"));
    }
}
