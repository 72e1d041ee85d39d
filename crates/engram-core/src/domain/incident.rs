//! Incidents: classified, evidence-backed records of a fault.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::event::Signal;

/// Incident classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FaultType {
    /// Environmental stress (collision)
    EnvStress,
    /// Agent logic defect (operating on low battery)
    LogicDefect,
    /// Reported rule violation
    ComplianceViolation,
}

impl FaultType {
    /// Every fault type, in emission priority order.
    pub const ALL: [FaultType; 3] = [
        FaultType::ComplianceViolation,
        FaultType::EnvStress,
        FaultType::LogicDefect,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::EnvStress => "ENV_STRESS",
            Self::LogicDefect => "LOGIC_DEFECT",
            Self::ComplianceViolation => "COMPLIANCE_VIOLATION",
        }
    }

    /// The signal whose rising edge opens this fault.
    pub fn trigger(self) -> Signal {
        match self {
            Self::EnvStress => Signal::Collision,
            Self::LogicDefect => Signal::LowBattery,
            Self::ComplianceViolation => Signal::ComplianceViolation,
        }
    }
}

impl std::fmt::Display for FaultType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operator liability estimate with confidence bounds, in percent.
///
/// Always `low <= estimate <= high`, all within `[0, 100]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Liability {
    pub estimate: u32,
    pub low: u32,
    pub high: u32,
}

/// A synthesized incident.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Incident {
    /// `INC-` + 12 hex chars of the content digest
    pub incident_id: String,
    /// Timestamp of the triggering event
    pub timestamp: DateTime<Utc>,
    pub agent_id: String,
    pub fault_type: FaultType,
    pub trigger: Signal,
    pub trigger_sequence_no: u64,
    pub preventability: u32,
    pub liability: Liability,
    /// Warning sequence numbers ascending, then the trigger
    pub evidence: Vec<u64>,
    pub narrative: String,
}
