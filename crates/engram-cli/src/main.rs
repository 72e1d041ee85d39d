//! Engram - forensic incident recorder CLI
//!
//! The `engram` command records simulation telemetry into the Justice Log
//! and answers questions about what was recorded.
//!
//! ## Commands
//!
//! - `record`: Ingest JSON Lines telemetry from a file or stdin
//! - `status`, `agents`, `incidents`, `incident`, `risk-summary`: Query projections
//! - `verify`: Check the hash chain from genesis
//! - `dossier`: Generate a Pre-Incident Risk Dossier (PIRD)
//! - `seal`, `audit-trail`, `replay`: Ledger lifecycle and audit

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{info, Level};

use engram_core::obs::SessionSpan;
use engram_core::{
    spawn_ingest, AgentView, DossierOptions, EngramConfig, IncidentRow, IngestHalt, IngestStats,
    LedgerBackend, LedgerVerification, Recorder, ReplayAudit, RiskSummary, SimulationStatus,
};

#[derive(Parser)]
#[command(name = "engram")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Engram forensic incident recorder", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Configuration file (TOML)
    #[arg(short, long, global = true, env = "ENGRAM_CONFIG")]
    config: Option<PathBuf>,

    /// Ledger file; selects the file backend
    #[arg(long, global = true)]
    ledger: Option<PathBuf>,

    /// Output format for command results
    #[arg(long, global = true, value_enum, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Record JSON Lines telemetry into the Justice Log
    Record {
        /// Telemetry file, one JSON message per line ("-" for stdin)
        #[arg(default_value = "-")]
        input: PathBuf,

        /// Seal the ledger once the input is exhausted
        #[arg(long)]
        seal: bool,
    },

    /// Show session status
    Status,

    /// List tracked agents with their risk
    Agents,

    /// List recorded incidents
    Incidents,

    /// Show one incident's narrative
    Incident {
        /// Incident ID (INC-...)
        id: String,
    },

    /// Incident count, highest-risk agent and latest event
    RiskSummary,

    /// Verify the Justice Log hash chain
    Verify,

    /// Generate a Pre-Incident Risk Dossier
    Dossier {
        /// Sign with the configured key
        #[arg(long)]
        sign: bool,

        /// Omit incident narratives
        #[arg(long)]
        no_narratives: bool,

        /// Omit evidence anchors
        #[arg(long)]
        no_anchors: bool,

        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Seal the Justice Log and print the manifest
    Seal,

    /// Print the human-readable audit trail
    AuditTrail {
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Re-derive incidents from recorded events and compare
    Replay,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    engram_core::telemetry::init_tracing(cli.json, level);

    let config = load_config(cli.config.as_deref(), cli.ledger.as_deref())?;
    let recorder = Recorder::open(config)
        .await
        .context("Failed to open the Justice Log")?;
    let _span = SessionSpan::enter(recorder.session_id());
    let format = cli.format;

    match cli.command {
        Commands::Record { input, seal } => cmd_record(recorder, &input, seal, format).await,
        Commands::Status => emit(format, &recorder.get_status(), render_status),
        Commands::Agents => emit(format, &recorder.get_active_agents(), |a| render_agents(a)),
        Commands::Incidents => emit(format, &recorder.get_incidents(), |i| render_incidents(i)),
        Commands::Incident { id } => cmd_incident(&recorder, &id, format),
        Commands::RiskSummary => emit(format, &recorder.get_risk_summary(), render_risk_summary),
        Commands::Verify => cmd_verify(&recorder, format).await,
        Commands::Dossier {
            sign,
            no_narratives,
            no_anchors,
            output,
        } => {
            let options = DossierOptions {
                include_evidence_anchors: !no_anchors,
                include_narratives: !no_narratives,
                sign,
            };
            cmd_dossier(&recorder, options, format, output.as_deref()).await
        }
        Commands::Seal => cmd_seal(&recorder, format).await,
        Commands::AuditTrail { output } => cmd_audit_trail(&recorder, output.as_deref()).await,
        Commands::Replay => cmd_replay(&recorder, format).await,
    }
}

/// Resolve configuration; `--ledger` forces the file backend at that path.
fn load_config(path: Option<&Path>, ledger: Option<&Path>) -> Result<EngramConfig> {
    let mut config = EngramConfig::resolve(path).context("Failed to load configuration")?;
    if let Some(ledger) = ledger {
        config.ledger.backend = LedgerBackend::File;
        config.ledger.path = ledger.to_path_buf();
    }
    Ok(config)
}

fn emit<T: Serialize + ?Sized>(
    format: OutputFormat,
    value: &T,
    render: impl Fn(&T) -> String,
) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Text => print!("{}", render(value)),
    }
    Ok(())
}

fn write_output(output: Option<&Path>, text: &str) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, text)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Written to {}", path.display());
        }
        None => print!("{text}"),
    }
    Ok(())
}

/// Record telemetry lines through the ingest queue
async fn cmd_record(
    recorder: Recorder,
    input: &Path,
    seal: bool,
    format: OutputFormat,
) -> Result<()> {
    let recorder = Arc::new(recorder);
    let stats = if input == Path::new("-") {
        record_from(recorder.clone(), tokio::io::stdin()).await?
    } else {
        let file = tokio::fs::File::open(input)
            .await
            .with_context(|| format!("Failed to open {}", input.display()))?;
        record_from(recorder.clone(), file).await?
    };

    recorder.close().await.context("Failed to flush the Justice Log")?;
    info!(accepted = stats.accepted, rejected = stats.rejected, "recording finished");
    emit(format, &stats, render_ingest_stats)?;

    if !stats.is_complete() {
        bail!("{} message(s) were not recorded", stats.unrecorded());
    }
    if seal {
        cmd_seal(&recorder, format).await?;
    }
    Ok(())
}

async fn record_from<R>(recorder: Arc<Recorder>, reader: R) -> Result<IngestStats>
where
    R: AsyncRead + Unpin,
{
    let (tx, worker) = spawn_ingest(recorder);
    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read telemetry")? {
        if line.trim().is_empty() {
            continue;
        }
        if tx.send_json(line).await.is_err() {
            // Worker halted; its stats carry the reason.
            break;
        }
    }
    drop(tx);
    worker.await.context("Ingest worker panicked")
}

fn cmd_incident(recorder: &Recorder, id: &str, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let incident = recorder.get_incident(id)?;
            println!("{}", serde_json::to_string_pretty(&incident)?);
        }
        OutputFormat::Text => println!("{}", recorder.get_incident_details(id)?),
    }
    Ok(())
}

async fn cmd_verify(recorder: &Recorder, format: OutputFormat) -> Result<()> {
    let verification = recorder.verify_ledger().await?;
    emit(format, &verification, render_verification)?;
    if let Some(at) = verification.broken_at {
        bail!("Justice Log integrity broken at entry {at}");
    }
    Ok(())
}

async fn cmd_dossier(
    recorder: &Recorder,
    options: DossierOptions,
    format: OutputFormat,
    output: Option<&Path>,
) -> Result<()> {
    let report = recorder.generate_dossier(options).await?;
    let text = match format {
        OutputFormat::Json => report.to_json()? + "\n",
        OutputFormat::Text => report.render_text(),
    };
    write_output(output, &text)
}

async fn cmd_seal(recorder: &Recorder, format: OutputFormat) -> Result<()> {
    let manifest = recorder.seal().await?;
    emit(format, &manifest, |m| {
        let mut out = String::new();
        let _ = writeln!(out, "Sealed {} entries at {}", m.total_entries, m.sealed_at.to_rfc3339());
        let _ = writeln!(out, "Genesis: {}", m.genesis_hash.as_deref().unwrap_or("unreadable"));
        let _ = writeln!(out, "Head:    {}", m.head_hash);
        let _ = writeln!(out, "Chain:   {}", m.chain_hash);
        out
    })
}

async fn cmd_audit_trail(recorder: &Recorder, output: Option<&Path>) -> Result<()> {
    let trail = recorder.audit_trail().await?;
    write_output(output, &trail)
}

async fn cmd_replay(recorder: &Recorder, format: OutputFormat) -> Result<()> {
    let audit = recorder.replay_audit().await?;
    emit(format, &audit, render_replay_audit)?;
    if !audit.consistent {
        bail!("{} recorded incident(s) do not match replay", audit.mismatches.len());
    }
    Ok(())
}

fn render_status(status: &SimulationStatus) -> String {
    format!(
        "Session: {}\nStatus:  {:?}\nMode:    {:?}\nUptime:  {}s\nEvents:  {}\n",
        status.session_id, status.status, status.mode, status.uptime_secs, status.events_logged
    )
}

fn render_agents(agents: &[AgentView]) -> String {
    if agents.is_empty() {
        return "No agents recorded.\n".to_string();
    }
    let mut out = format!(
        "{:<16} {:<16} {:>5} {:<9} {:>8} {}\n",
        "AGENT", "TYPE", "RISK", "LEVEL", "BATTERY", "STATUS"
    );
    for agent in agents {
        let _ = writeln!(
            out,
            "{:<16} {:<16} {:>5} {:<9} {:>7.1}% {}",
            truncate(&agent.agent_id, 16),
            truncate(&agent.agent_type, 16),
            agent.risk_score,
            agent.risk_level.as_str(),
            agent.battery,
            agent.status
        );
    }
    out
}

fn render_incidents(incidents: &[IncidentRow]) -> String {
    if incidents.is_empty() {
        return "No incidents recorded.\n".to_string();
    }
    let mut out = String::new();
    for incident in incidents {
        let _ = writeln!(
            out,
            "{}  {}  {:<16} {:<20} prevent {:>2}%  liability {}% [{}-{}]",
            incident.incident_id,
            incident.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            truncate(&incident.agent_id, 16),
            incident.fault_type.as_str(),
            incident.preventability,
            incident.liability.estimate,
            incident.liability.low,
            incident.liability.high
        );
    }
    let _ = writeln!(out, "\nIncidents: {}", incidents.len());
    out
}

fn render_risk_summary(summary: &RiskSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Total incidents:    {}", summary.total_incidents);
    let _ = writeln!(
        out,
        "Highest-risk agent: {}",
        summary.highest_risk_agent.as_deref().unwrap_or("none")
    );
    match &summary.latest_event {
        Some(event) => {
            let _ = writeln!(
                out,
                "Latest event:       #{} {} at {} ({})",
                event.sequence_no,
                event.agent_id,
                event.position,
                event.timestamp.to_rfc3339()
            );
        }
        None => {
            let _ = writeln!(out, "Latest event:       none");
        }
    }
    out
}

fn render_verification(v: &LedgerVerification) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Valid:   {}", v.valid);
    let _ = writeln!(out, "Entries: {}", v.total_entries);
    let _ = writeln!(out, "Genesis: {}", v.genesis_hash.as_deref().unwrap_or("unreadable"));
    let _ = writeln!(out, "Head:    {}", v.head_hash);
    if let (Some(at), Some(reason)) = (v.broken_at, v.reason) {
        let _ = writeln!(out, "Broken at entry {at}: {reason}");
    }
    out
}

fn render_ingest_stats(stats: &IngestStats) -> String {
    let mut out = format!(
        "Accepted {} message(s), rejected {}.\nCommitted {} event(s) and {} incident(s).\n",
        stats.accepted, stats.rejected, stats.events_committed, stats.incidents_committed
    );
    if !stats.is_complete() {
        let _ = writeln!(
            out,
            "NOT RECORDED: {} failed write(s), {} dropped after halt.",
            stats.failed, stats.dropped
        );
    }
    match stats.halted {
        Some(IngestHalt::SessionClosed) => {
            let _ = writeln!(out, "Halted: session closed.");
        }
        Some(IngestHalt::ChainBroken { at_index, reason }) => {
            let _ = writeln!(out, "Halted: chain broken at entry {at_index} ({reason}).");
        }
        None => {}
    }
    out
}

fn render_replay_audit(audit: &ReplayAudit) -> String {
    let mut out = format!(
        "Consistent: {}\nDerived:    {}\nRecorded:   {}\nDigest:     {}\n",
        audit.consistent, audit.derived, audit.recorded, audit.replay_digest
    );
    for mismatch in &audit.mismatches {
        let _ = writeln!(out, "  ! {mismatch}");
    }
    out
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_len.saturating_sub(1)).collect();
        format!("{cut}~")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engram_core::EngramConfig;

    const TELEMETRY: &str = concat!(
        r#"{"type":"step","agent_id":"bot-01","agent_type":"Logistics-Bot","observation":{"position":[0,0],"battery":15},"timestamp":1.0}"#,
        "\n",
        "not json\n",
        "\n",
        r#"{"type":"step","agent_id":"bot-02","observation":{"position":[1,1],"battery":80},"info":{"event":"collision"},"timestamp":2.0}"#,
        "\n",
    );

    async fn recorder() -> Recorder {
        Recorder::in_memory(EngramConfig::default()).await.unwrap()
    }

    #[tokio::test]
    async fn record_from_skips_malformed_lines() {
        let recorder = Arc::new(recorder().await);
        let stats = record_from(recorder.clone(), TELEMETRY.as_bytes()).await.unwrap();

        assert_eq!(stats.accepted, 2);
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.incidents_committed, 2);
        assert_eq!(recorder.log().len(), 4);
    }

    #[tokio::test]
    async fn record_from_file_then_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("telemetry.jsonl");
        std::fs::write(&input, TELEMETRY).unwrap();
        let ledger = dir.path().join("justice_log.jsonl");

        let config = load_config(None, Some(&ledger)).unwrap();
        let recorder = Recorder::open(config.clone()).await.unwrap();
        cmd_record(recorder, &input, true, OutputFormat::Json)
            .await
            .unwrap();

        let reopened = Recorder::open(config).await.unwrap();
        assert_eq!(reopened.get_incidents().len(), 2);
        assert!(reopened.verify_ledger().await.unwrap().valid);
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        let cmd = Cli::command();
        cmd.clone().debug_assert();
        assert_eq!(cmd.get_name(), "engram");
        assert!(cmd.get_author().is_none());
    }

    #[test]
    fn ledger_flag_selects_file_backend() {
        let config = load_config(None, Some(Path::new("/tmp/x.jsonl"))).unwrap();
        assert_eq!(config.ledger.backend, LedgerBackend::File);
        assert_eq!(config.ledger.path, PathBuf::from("/tmp/x.jsonl"));
    }

    #[tokio::test]
    async fn renderers_cover_empty_and_populated_state() {
        let recorder = Arc::new(recorder().await);
        assert_eq!(render_agents(&recorder.get_active_agents()), "No agents recorded.\n");
        assert_eq!(render_incidents(&recorder.get_incidents()), "No incidents recorded.\n");
        assert!(render_risk_summary(&recorder.get_risk_summary()).contains("none"));

        record_from(recorder.clone(), TELEMETRY.as_bytes()).await.unwrap();
        let agents = render_agents(&recorder.get_active_agents());
        assert!(agents.contains("bot-01"));
        assert!(agents.contains("Logistics-Bot"));
        let incidents = render_incidents(&recorder.get_incidents());
        assert!(incidents.contains("LOGIC_DEFECT"));
        assert!(incidents.contains("ENV_STRESS"));
        assert!(render_risk_summary(&recorder.get_risk_summary()).contains("bot-02"));

        let verification = recorder.verify_ledger().await.unwrap();
        assert!(render_verification(&verification).contains("Valid:   true"));
    }

    #[tokio::test]
    async fn record_fails_when_session_refuses_input() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("telemetry.jsonl");
        std::fs::write(&input, TELEMETRY).unwrap();

        let recorder = recorder().await;
        recorder.close().await.unwrap();
        let err = cmd_record(recorder, &input, false, OutputFormat::Json)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not recorded"));
    }

    #[test]
    fn ingest_stats_render_unrecorded_messages() {
        let stats = IngestStats {
            accepted: 1,
            dropped: 2,
            halted: Some(IngestHalt::SessionClosed),
            ..IngestStats::default()
        };
        let text = render_ingest_stats(&stats);
        assert!(text.contains("NOT RECORDED: 0 failed write(s), 2 dropped"));
        assert!(text.contains("Halted: session closed."));
        assert!(!render_ingest_stats(&IngestStats::default()).contains("NOT RECORDED"));
    }

    #[tokio::test]
    async fn unknown_incident_is_an_error() {
        let recorder = recorder().await;
        assert!(cmd_incident(&recorder, "INC-missing", OutputFormat::Text).is_err());
    }

    #[test]
    fn truncate_marks_cut_names() {
        assert_eq!(truncate("bot-01", 16), "bot-01");
        assert_eq!(truncate("a-very-long-agent-name", 8), "a-very-~");
    }
}
