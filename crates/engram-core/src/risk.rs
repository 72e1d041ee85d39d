//! Risk Scoring Engine.
//!
//! Integer, order-dependent and free of wall-clock input, so replaying the
//! same events always yields the same scores. Contributions:
//!
//! | signal                | points | lifetime                              |
//! |-----------------------|--------|---------------------------------------|
//! | `low_battery`         | 5      | held until battery >= threshold       |
//! | `collision`           | 20     | permanent                             |
//! | `blocked`             | 0      | recorded as a signal only             |
//! | `compliance_violation`| 10     | permanent                             |
//!
//! Agent score is `min(100, sum)`; the system score is the max over agents.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::domain::{AgentState, Event, EventBody, InfoTag, RiskLevel, Signal, MAX_RISK_SCORE};

/// Weights and thresholds of the scoring rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskPolicy {
    /// Battery percentage below which `low_battery` is held
    pub low_battery_threshold: f64,
    pub low_battery_points: u32,
    pub collision_points: u32,
    pub blocked_points: u32,
    pub compliance_points: u32,
}

impl Default for RiskPolicy {
    fn default() -> Self {
        Self {
            low_battery_threshold: 20.0,
            low_battery_points: 5,
            collision_points: 20,
            blocked_points: 0,
            compliance_points: 10,
        }
    }
}

impl RiskPolicy {
    /// Signals `body` carries, in [`Signal::ALL`] order.
    pub fn signals_of(&self, body: &EventBody) -> Vec<Signal> {
        Signal::ALL
            .into_iter()
            .filter(|signal| match signal {
                Signal::LowBattery => body.battery_pct < self.low_battery_threshold,
                Signal::Collision => body.has_info(&InfoTag::Collision),
                Signal::Blocked => body.has_info(&InfoTag::Blocked),
                Signal::ComplianceViolation => body.is_compliance_flagged(),
            })
            .collect()
    }

    fn held_points(&self, tags: &BTreeSet<Signal>) -> u32 {
        tags.iter()
            .map(|tag| match tag {
                Signal::LowBattery => self.low_battery_points,
                _ => 0,
            })
            .fold(0, u32::saturating_add)
    }

    fn instant_points(&self, signal: Signal) -> u32 {
        match signal {
            Signal::LowBattery => 0,
            Signal::Collision => self.collision_points,
            Signal::Blocked => self.blocked_points,
            Signal::ComplianceViolation => self.compliance_points,
        }
    }
}

/// What one event changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskDelta {
    /// Held tags that became active
    pub raised: Vec<Signal>,
    /// Held tags that were cleared
    pub cleared: Vec<Signal>,
    /// Every signal the event carried
    pub signals: Vec<Signal>,
}

impl RiskDelta {
    pub fn carries(&self, signal: Signal) -> bool {
        self.signals.contains(&signal)
    }
}

/// Result of [`RiskEngine::apply`].
#[derive(Debug, Clone, PartialEq)]
pub struct RiskOutcome {
    pub agent: AgentState,
    pub system_score: u32,
    pub delta: RiskDelta,
}

/// Per-agent risk state.
#[derive(Debug, Clone, Default)]
pub struct RiskEngine {
    policy: RiskPolicy,
    agents: BTreeMap<String, AgentState>,
}

impl RiskEngine {
    pub fn new(policy: RiskPolicy) -> Self {
        Self {
            policy,
            agents: BTreeMap::new(),
        }
    }

    pub fn policy(&self) -> &RiskPolicy {
        &self.policy
    }

    /// Fold one committed event into its agent's state.
    pub fn apply(&mut self, event: &Event) -> RiskOutcome {
        let signals = self.policy.signals_of(&event.body);
        let policy = &self.policy;
        let agent = self
            .agents
            .entry(event.agent_id.clone())
            .or_insert_with(|| AgentState {
                agent_id: event.agent_id.clone(),
                agent_type: event.agent_type.clone(),
                last_position: event.position,
                battery_pct: event.battery_pct,
                status: event.status.clone(),
                risk_score: 0,
                risk_level: RiskLevel::Low,
                active_tags: BTreeSet::new(),
                accumulated_points: 0,
                last_sequence_no: event.sequence_no,
            });

        if event.agent_type != crate::normalizer::DEFAULT_AGENT_TYPE {
            agent.agent_type = event.agent_type.clone();
        }
        agent.last_position = event.position;
        agent.battery_pct = event.battery_pct;
        agent.status = event.status.clone();
        agent.last_sequence_no = event.sequence_no;

        let mut delta = RiskDelta {
            signals: signals.clone(),
            ..RiskDelta::default()
        };

        let low = signals.contains(&Signal::LowBattery);
        if low && agent.active_tags.insert(Signal::LowBattery) {
            delta.raised.push(Signal::LowBattery);
        } else if !low && agent.active_tags.remove(&Signal::LowBattery) {
            delta.cleared.push(Signal::LowBattery);
        }

        for signal in &signals {
            agent.accumulated_points = agent
                .accumulated_points
                .saturating_add(policy.instant_points(*signal));
        }

        agent.risk_score = agent
            .accumulated_points
            .saturating_add(policy.held_points(&agent.active_tags))
            .min(MAX_RISK_SCORE);
        agent.risk_level = RiskLevel::from_score(agent.risk_score);

        let agent = agent.clone();
        RiskOutcome {
            agent,
            system_score: self.system_score(),
            delta,
        }
    }

    /// Max over tracked agents; 0 with none.
    pub fn system_score(&self) -> u32 {
        self.agents
            .values()
            .map(|a| a.risk_score)
            .max()
            .unwrap_or(0)
    }

    pub fn agent(&self, agent_id: &str) -> Option<&AgentState> {
        self.agents.get(agent_id)
    }

    pub fn agents(&self) -> &BTreeMap<String, AgentState> {
        &self.agents
    }
}
