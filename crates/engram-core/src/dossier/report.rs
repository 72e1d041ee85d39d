//! Plain-text PIRD rendering.

use std::fmt::Write as _;

use chrono::SecondsFormat;

use super::Report;
use crate::domain::RiskLevel;

const WIDTH: usize = 80;

impl Report {
    /// Render the human-readable dossier.
    pub fn render_text(&self) -> String {
        let rule = "=".repeat(WIDTH);
        let mut out = String::new();

        let _ = writeln!(out, "{rule}");
        let _ = writeln!(out, " ENGRAM: {}", self.header.title.to_uppercase());
        let _ = writeln!(
            out,
            " Generated: {}",
            self.header
                .generated_at
                .to_rfc3339_opts(SecondsFormat::Secs, true)
        );
        let _ = writeln!(out, " Format: {}", self.header.format_version);
        let _ = writeln!(out, "{rule}");

        let s = &self.executive_summary;
        let _ = writeln!(out, "\n[1.0] EXECUTIVE SUMMARY");
        let _ = writeln!(out, "Status: {}", s.status.as_str());
        match (s.recorded_from, s.recorded_until) {
            (Some(from), Some(until)) => {
                let _ = writeln!(
                    out,
                    "Recorded Span: {} -> {} ({:.3}s)",
                    from.to_rfc3339_opts(SecondsFormat::Millis, true),
                    until.to_rfc3339_opts(SecondsFormat::Millis, true),
                    s.recorded_span_ms as f64 / 1000.0
                );
            }
            _ => {
                let _ = writeln!(out, "Recorded Span: no events recorded");
            }
        }
        let _ = writeln!(out, "Events Logged: {}", s.events_logged);
        let _ = writeln!(out, "Total Incidents: {}", s.incidents_total);
        let _ = writeln!(out, "System Risk Score: {}/100", s.system_risk_score);

        let e = &self.exposure;
        let _ = writeln!(out, "\n[2.0] ASSET EXPOSURE & OBJECTIVES");
        let _ = writeln!(
            out,
            "|-- Agents Tracked: {} ({} exposed)",
            e.agents_tracked, e.agents_exposed
        );
        let levels: Vec<String> = RiskLevel::ALL
            .iter()
            .map(|l| format!("{} {}", l, e.agents_by_level.get(l).copied().unwrap_or(0)))
            .collect();
        let _ = writeln!(out, "|-- Risk Levels: {}", levels.join(" | "));
        for asset in &e.assets {
            let _ = writeln!(
                out,
                "|-- Asset: {} ({}) (Valuation: {})",
                asset.id,
                asset.asset_type,
                usd(asset.valuation_usd)
            );
        }
        for objective in &e.objectives {
            let _ = writeln!(
                out,
                "|-- Objective: {} (Criticality: {}/10)",
                objective.description, objective.criticality
            );
        }
        let _ = writeln!(out, "|-- Total Valuation: {}", usd(e.total_valuation_usd));
        let _ = writeln!(out, "|-- Estimated Loss Exposure: {}", usd(e.estimated_loss_usd));

        let _ = writeln!(out, "\n[3.0] FAULT ATTRIBUTION");
        for (fault, count) in &self.fault_histogram {
            let _ = writeln!(out, "|-- {fault}: {count}");
        }
        let a = &self.aggregates;
        let _ = writeln!(
            out,
            "|-- Mean Preventability: {:.1}% | Mean Liability: {:.1}% (range {:.1}-{:.1}%)",
            a.mean_preventability, a.mean_liability, a.mean_liability_low, a.mean_liability_high
        );
        if !self.evidence_anchor_counts.is_empty() {
            let anchors: Vec<String> = self
                .evidence_anchor_counts
                .iter()
                .map(|(signal, n)| format!("{signal} {n}"))
                .collect();
            let _ = writeln!(out, "|-- Evidence Anchors: {}", anchors.join(", "));
        }

        let _ = writeln!(out, "\n[4.0] ANALYTICAL FINDINGS (EVIDENCE OF PREVENTABILITY)");
        if self.incidents.is_empty() {
            let _ = writeln!(out, "|-- No preventable failures recorded.");
        }
        for inc in &self.incidents {
            let _ = writeln!(out, "\nINCIDENT ID: {}", inc.incident_id);
            let _ = writeln!(
                out,
                "|-- Time: {}",
                inc.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
            );
            let _ = writeln!(out, "|-- Agent: {}", inc.agent_id);
            let _ = writeln!(
                out,
                "|-- Fault Attribution: {} (trigger {} at event #{})",
                inc.fault_type, inc.trigger, inc.trigger_sequence_no
            );
            let _ = writeln!(out, "|-- Preventability Score: {}%", inc.preventability);
            let _ = writeln!(
                out,
                "|-- Operator Liability: {}% (range {}-{}%)",
                inc.liability.estimate, inc.liability.low, inc.liability.high
            );
            let _ = writeln!(
                out,
                "|-- Estimated Liability Exposure: {}",
                usd(inc.estimated_loss_usd)
            );
            if let Some(narrative) = &inc.narrative {
                let _ = writeln!(out, "|-- Forensic Narrative: {narrative}");
            }
            if let Some(anchors) = &inc.evidence_anchors {
                let refs: Vec<String> = anchors.iter().map(|s| format!("#{s}")).collect();
                let _ = writeln!(out, "|-- Technical Evidence Anchors: {}", refs.join(", "));
            }
        }

        let i = &self.integrity;
        let _ = writeln!(out, "\n[5.0] LEDGER INTEGRITY");
        match i.broken_at {
            None => {
                let _ = writeln!(out, "|-- Chain: VERIFIED");
            }
            Some(at) => {
                let reason = i.reason.map(|r| r.to_string()).unwrap_or_default();
                let _ = writeln!(out, "|-- Chain: BROKEN at entry {at} ({reason})");
            }
        }
        let _ = writeln!(out, "|-- Total Entries: {}", i.total_entries);
        let _ = writeln!(out, "|-- Genesis Hash: {}", i.genesis_hash.as_deref().unwrap_or("UNREADABLE"));
        let _ = writeln!(out, "|-- Head Hash: {}", i.head_hash);
        if let Some(sig) = &self.signature {
            let _ = writeln!(out, "|-- Signature ({}): {}", sig.algorithm, sig.value);
            let _ = writeln!(out, "|-- Public Key: {}", sig.public_key);
        }

        let _ = writeln!(out, "\n{rule}");
        let _ = writeln!(out, " END OF DOSSIER | PROOF OF PREVENTABILITY");
        let _ = writeln!(out, "{rule}");
        out
    }
}

/// `$1,234,567.89`
fn usd(value: f64) -> String {
    let cents = (value.abs() * 100.0).round() as u64;
    let (whole, frac) = (cents / 100, cents % 100);
    let digits = whole.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    let sign = if value < 0.0 { "-" } else { "" };
    format!("{sign}${grouped}.{frac:02}")
}
