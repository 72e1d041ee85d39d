//! Raw telemetry as emitted by the simulation engine.
//!
//! Messages are `type`-tagged JSON objects: `step` carries one agent's
//! observation, `snapshot` carries every agent's state at one instant.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::error::NormalizeError;

/// One raw telemetry message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RawTelemetry {
    Step(RawStep),
    Snapshot(RawSnapshot),
}

impl RawTelemetry {
    /// Decode a single JSON message.
    pub fn from_json(line: &str) -> Result<Self, NormalizeError> {
        serde_json::from_str(line).map_err(|e| NormalizeError::Decode(e.to_string()))
    }
}

/// A single agent step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawStep {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq_id: Option<u64>,
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<String>,
    pub observation: RawObservation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<RawInfo>,
    /// Epoch seconds
    pub timestamp: f64,
}

/// Observed agent state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawObservation {
    pub position: Vec<f64>,
    pub battery: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<String>,
}

/// Side-channel annotations on a step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<RawViolation>,
}

/// A compliance rule the simulation reports as violated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawViolation {
    pub rule: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

/// Whole-fleet state at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSnapshot {
    /// Epoch seconds
    pub timestamp: f64,
    pub agents: BTreeMap<String, RawObservation>,
}
