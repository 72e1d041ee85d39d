//! Domain models for Engram.
//!
//! - `RawTelemetry`: messages as received from the simulation
//! - `Event`: a normalized, committed fact
//! - `AgentState`: per-agent projection
//! - `Incident`: a classified fault with evidence

pub mod agent;
pub mod error;
pub mod event;
pub mod incident;
pub mod telemetry;

pub use agent::{AgentState, RiskLevel, MAX_RISK_SCORE};
pub use error::{EngramError, NormalizeError, Result};
pub use event::{Event, EventBody, EventKind, InfoTag, Position, Signal};
pub use incident::{FaultType, Incident, Liability};
pub use telemetry::{RawInfo, RawObservation, RawSnapshot, RawStep, RawTelemetry, RawViolation};
