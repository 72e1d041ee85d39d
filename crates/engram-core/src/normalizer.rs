//! Telemetry Normalizer: raw messages to validated [`EventBody`] values.
//!
//! Pure and all-or-nothing: a message either yields every event it
//! describes or is rejected with a [`NormalizeError`] and yields none.

use chrono::{DateTime, TimeZone, Utc};

use crate::domain::{
    EventBody, EventKind, InfoTag, NormalizeError, Position, RawObservation, RawSnapshot, RawStep,
    RawTelemetry,
};

/// Status assumed when the producer omits one.
pub const DEFAULT_STATUS: &str = "ACTIVE";
/// Agent type assumed when the producer omits one.
pub const DEFAULT_AGENT_TYPE: &str = "unknown";

/// Normalize one raw message.
///
/// A `step` produces one `telemetry` event. A `snapshot` produces one
/// `system.sync` event per agent, in ascending `agent_id` order.
pub fn normalize(raw: &RawTelemetry) -> Result<Vec<EventBody>, NormalizeError> {
    match raw {
        RawTelemetry::Step(step) => normalize_step(step).map(|e| vec![e]),
        RawTelemetry::Snapshot(snapshot) => normalize_snapshot(snapshot),
    }
}

/// Decode and normalize one JSON line.
pub fn normalize_json(line: &str) -> Result<Vec<EventBody>, NormalizeError> {
    normalize(&RawTelemetry::from_json(line)?)
}

fn normalize_step(step: &RawStep) -> Result<EventBody, NormalizeError> {
    let timestamp = parse_timestamp(step.timestamp)?;
    let mut body = observe(
        &step.agent_id,
        step.agent_type.as_deref(),
        &step.observation,
        timestamp,
        EventKind::Telemetry,
    )?;

    if let Some(info) = &step.info {
        body.info = info.event.clone().map(InfoTag::from);
        for violation in &info.violations {
            if !body.compliance_rules.contains(&violation.rule) {
                body.compliance_rules.push(violation.rule.clone());
            }
        }
    }
    body.source_seq = step.seq_id;
    Ok(body)
}

fn normalize_snapshot(snapshot: &RawSnapshot) -> Result<Vec<EventBody>, NormalizeError> {
    if snapshot.agents.is_empty() {
        return Err(NormalizeError::EmptySnapshot);
    }
    let timestamp = parse_timestamp(snapshot.timestamp)?;
    snapshot
        .agents
        .iter()
        .map(|(agent_id, obs)| observe(agent_id, None, obs, timestamp, EventKind::SystemSync))
        .collect()
}

fn observe(
    agent_id: &str,
    agent_type: Option<&str>,
    obs: &RawObservation,
    timestamp: DateTime<Utc>,
    kind: EventKind,
) -> Result<EventBody, NormalizeError> {
    if agent_id.trim().is_empty() {
        return Err(NormalizeError::EmptyAgentId);
    }
    if !obs.battery.is_finite() || !(0.0..=100.0).contains(&obs.battery) {
        return Err(NormalizeError::BatteryOutOfRange {
            agent_id: agent_id.to_string(),
            value: obs.battery,
        });
    }
    let position = match obs.position.as_slice() {
        [x, y] if x.is_finite() && y.is_finite() => Position { x: *x, y: *y },
        _ => {
            return Err(NormalizeError::InvalidPosition {
                agent_id: agent_id.to_string(),
            })
        }
    };

    Ok(EventBody {
        agent_id: agent_id.to_string(),
        agent_type: agent_type
            .or(obs.agent_type.as_deref())
            .unwrap_or(DEFAULT_AGENT_TYPE)
            .to_string(),
        timestamp,
        kind,
        position,
        battery_pct: obs.battery,
        status: obs
            .status
            .clone()
            .unwrap_or_else(|| DEFAULT_STATUS.to_string()),
        info: None,
        compliance_rules: Vec::new(),
        source_seq: None,
    })
}

/// Epoch seconds to a UTC instant at millisecond precision.
fn parse_timestamp(secs: f64) -> Result<DateTime<Utc>, NormalizeError> {
    if !secs.is_finite() || secs < 0.0 {
        return Err(NormalizeError::InvalidTimestamp(secs));
    }
    let millis = (secs * 1000.0).round();
    if millis > i64::MAX as f64 {
        return Err(NormalizeError::InvalidTimestamp(secs));
    }
    Utc.timestamp_millis_opt(millis as i64)
        .single()
        .ok_or(NormalizeError::InvalidTimestamp(secs))
}
