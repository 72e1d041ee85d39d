//! Agent projection: per-agent state derived from committed events.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::event::{Position, Signal};

/// Maximum risk score.
pub const MAX_RISK_SCORE: u32 = 100;

/// Banded view of a risk score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub const ALL: [RiskLevel; 4] = [
        RiskLevel::Low,
        RiskLevel::Medium,
        RiskLevel::High,
        RiskLevel::Critical,
    ];

    /// low < 20, medium < 50, high < 100, critical = 100
    pub fn from_score(score: u32) -> Self {
        match score {
            s if s >= MAX_RISK_SCORE => Self::Critical,
            s if s >= 50 => Self::High,
            s if s >= 20 => Self::Medium,
            _ => Self::Low,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current state of one agent.
///
/// Created on the first event for an unseen id and never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub agent_id: String,
    pub agent_type: String,
    pub last_position: Position,
    pub battery_pct: f64,
    pub status: String,
    /// `min(100, accumulated_points + held points)`
    pub risk_score: u32,
    pub risk_level: RiskLevel,
    /// Signals currently held (cleared explicitly, e.g. on battery recovery)
    pub active_tags: BTreeSet<Signal>,
    /// Permanent contributions from instantaneous signals
    pub accumulated_points: u32,
    pub last_sequence_no: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_bands() {
        assert_eq!(RiskLevel::from_score(0), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(19), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(20), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(49), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(50), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(99), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(100), RiskLevel::Critical);
    }

    #[test]
    fn level_serializes_upper_case() {
        let v = serde_json::to_value(RiskLevel::Critical).unwrap();
        assert_eq!(v, serde_json::json!("CRITICAL"));
    }
}
