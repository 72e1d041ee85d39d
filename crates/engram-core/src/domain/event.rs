//! Normalized events: the facts committed to the Justice Log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Planar agent position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Where an event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    /// A single agent step
    #[serde(rename = "telemetry")]
    Telemetry,
    /// One agent's row of a fleet snapshot
    #[serde(rename = "system.sync")]
    SystemSync,
}

/// Annotation carried by `info.event`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum InfoTag {
    Collision,
    Blocked,
    ComplianceViolation,
    Other(String),
}

impl InfoTag {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Collision => "collision",
            Self::Blocked => "blocked",
            Self::ComplianceViolation => "compliance_violation",
            Self::Other(tag) => tag,
        }
    }
}

impl From<String> for InfoTag {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "collision" => Self::Collision,
            "blocked" => Self::Blocked,
            "compliance_violation" => Self::ComplianceViolation,
            _ => Self::Other(tag),
        }
    }
}

impl From<InfoTag> for String {
    fn from(tag: InfoTag) -> Self {
        tag.as_str().to_string()
    }
}

/// Risk-relevant signal an event can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    LowBattery,
    Collision,
    Blocked,
    ComplianceViolation,
}

impl Signal {
    pub const ALL: [Signal; 4] = [
        Signal::LowBattery,
        Signal::Collision,
        Signal::Blocked,
        Signal::ComplianceViolation,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::LowBattery => "low_battery",
            Self::Collision => "collision",
            Self::Blocked => "blocked",
            Self::ComplianceViolation => "compliance_violation",
        }
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event content as hashed into the ledger; carries no sequence number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventBody {
    pub agent_id: String,
    pub agent_type: String,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub position: Position,
    pub battery_pct: f64,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<InfoTag>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub compliance_rules: Vec<String>,
    /// Producer-side sequence id, kept for cross-reference only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_seq: Option<u64>,
}

impl EventBody {
    /// True when the event reports a compliance violation.
    pub fn is_compliance_flagged(&self) -> bool {
        self.info == Some(InfoTag::ComplianceViolation) || !self.compliance_rules.is_empty()
    }

    pub fn has_info(&self, tag: &InfoTag) -> bool {
        self.info.as_ref() == Some(tag)
    }
}

/// A committed event: body plus its ledger position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// `entry_index` of the ledger entry holding this event
    pub sequence_no: u64,
    #[serde(flatten)]
    pub body: EventBody,
}

impl Event {
    pub fn new(sequence_no: u64, body: EventBody) -> Self {
        Self { sequence_no, body }
    }
}

impl std::ops::Deref for Event {
    type Target = EventBody;

    fn deref(&self) -> &EventBody {
        &self.body
    }
}
