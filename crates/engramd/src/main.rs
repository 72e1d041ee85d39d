//! engramd - long-running recorder
//!
//! Reads JSON Lines telemetry from stdin, records it through the bounded
//! ingest queue and streams commit notices to stdout as JSON Lines. Stops on
//! end of input or ctrl-c, flushing the Justice Log before exit.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use engram_core::{spawn_ingest, CommitNotice, EngramConfig, IngestSender, LedgerBackend, Recorder};

#[derive(Parser)]
#[command(name = "engramd")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Engram recording daemon", long_about = None)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, env = "ENGRAM_CONFIG")]
    config: Option<PathBuf>,

    /// Ledger file; selects the file backend
    #[arg(long)]
    ledger: Option<PathBuf>,

    /// Do not print commit notices
    #[arg(long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = EngramConfig::resolve(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(ledger) = args.ledger {
        config.ledger.backend = LedgerBackend::File;
        config.ledger.path = ledger;
    }

    let recorder = Arc::new(Recorder::open(config).await.context("Failed to open the Justice Log")?);
    let _span = engram_core::obs::SessionSpan::enter(recorder.session_id());
    info!(backend = recorder.log().store().backend(), "engramd started");

    let printer = (!args.quiet).then(|| tokio::spawn(print_notices(recorder.subscribe())));

    // The reader owns the only sender: once it finishes or is cancelled the
    // worker drains whatever is queued and returns.
    let (tx, worker) = spawn_ingest(recorder.clone());
    let read = tokio::select! {
        read = forward(tx, tokio::io::stdin()) => read,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted; draining queued telemetry");
            Ok(())
        }
    };
    let stats = worker.await.context("Ingest worker panicked")?;

    recorder.close().await.context("Failed to flush the Justice Log")?;
    if let Some(printer) = printer {
        printer.abort();
    }
    read?;

    info!(
        accepted = stats.accepted,
        rejected = stats.rejected,
        failed = stats.failed,
        dropped = stats.dropped,
        events = stats.events_committed,
        incidents = stats.incidents_committed,
        "engramd stopped"
    );
    if !stats.is_complete() {
        bail!("{} message(s) were not recorded", stats.unrecorded());
    }
    Ok(())
}

/// Push every non-empty input line into the ingest queue.
async fn forward<R: AsyncRead + Unpin>(tx: IngestSender, input: R) -> Result<()> {
    let mut lines = BufReader::new(input).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read telemetry")? {
        if line.trim().is_empty() {
            continue;
        }
        if tx.send_json(line).await.is_err() {
            // Worker halted; its stats carry the reason.
            break;
        }
    }
    Ok(())
}

async fn print_notices(mut notices: tokio::sync::broadcast::Receiver<CommitNotice>) {
    loop {
        match notices.recv().await {
            Ok(notice) => match serde_json::to_string(&notice) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!(error = %e, "unprintable commit notice"),
            },
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "commit notices dropped"),
            Err(RecvError::Closed) => break,
        }
    }
}
