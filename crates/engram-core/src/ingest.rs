//! Bounded ingestion queue in front of a [`Recorder`].
//!
//! Producers push raw messages through an [`IngestSender`]; one background
//! task drains them into the recorder in arrival order. A full queue makes
//! producers wait.
//!
//! Every accepted message is accounted for in the returned [`IngestStats`]:
//! recorded, rejected as malformed, failed after the ledger's write retries,
//! or dropped because the session stopped accepting telemetry. A failed write
//! does not stop the worker; a closed session or broken chain does, after
//! which the queue is closed and whatever was still buffered is counted as
//! dropped.

use std::sync::Arc;

use engram_ledger::BreakReason;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

use crate::domain::{EngramError, RawTelemetry, Result};
use crate::recorder::Recorder;

/// One queued message.
#[derive(Debug, Clone)]
pub enum IngestMessage {
    Raw(RawTelemetry),
    /// Undecoded JSON text, normalized by the worker
    Json(String),
}

/// Why the worker stopped recording before its producers went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum IngestHalt {
    SessionClosed,
    ChainBroken { at_index: u64, reason: BreakReason },
}

/// Counters returned when the worker drains.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestStats {
    pub accepted: u64,
    pub rejected: u64,
    /// Messages whose ledger write failed after every retry
    pub failed: u64,
    /// Messages dequeued after the worker halted; never recorded
    pub dropped: u64,
    pub events_committed: u64,
    pub incidents_committed: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub halted: Option<IngestHalt>,
}

impl IngestStats {
    /// Messages that were well-formed but are not (fully) in the ledger.
    pub fn unrecorded(&self) -> u64 {
        self.failed + self.dropped
    }

    /// Every message was either recorded or rejected as malformed.
    pub fn is_complete(&self) -> bool {
        self.unrecorded() == 0
    }
}

/// Producer side of the queue. Cloneable; the worker stops once every clone is dropped.
#[derive(Debug, Clone)]
pub struct IngestSender {
    tx: mpsc::Sender<IngestMessage>,
}

impl IngestSender {
    pub async fn send(&self, raw: RawTelemetry) -> Result<()> {
        self.push(IngestMessage::Raw(raw)).await
    }

    pub async fn send_json(&self, line: impl Into<String>) -> Result<()> {
        self.push(IngestMessage::Json(line.into())).await
    }

    async fn push(&self, message: IngestMessage) -> Result<()> {
        self.tx
            .send(message)
            .await
            .map_err(|_| EngramError::SessionClosed)
    }
}

/// Spawn the ingest worker with the recorder's configured queue capacity.
pub fn spawn_ingest(recorder: Arc<Recorder>) -> (IngestSender, JoinHandle<IngestStats>) {
    let (tx, rx) = mpsc::channel(recorder.config().ingest.capacity);
    let span = tracing::info_span!("engram.ingest", session_id = %recorder.session_id());
    let handle = tokio::spawn(run_worker(recorder, rx).instrument(span));
    (IngestSender { tx }, handle)
}

async fn run_worker(recorder: Arc<Recorder>, mut rx: mpsc::Receiver<IngestMessage>) -> IngestStats {
    let mut stats = IngestStats::default();
    while let Some(message) = rx.recv().await {
        let outcome = match &message {
            IngestMessage::Raw(raw) => recorder.ingest(raw).await,
            IngestMessage::Json(line) => recorder.ingest_json(line).await,
        };
        match outcome {
            Ok(receipt) => {
                stats.accepted += 1;
                stats.events_committed += receipt.events.len() as u64;
                stats.incidents_committed += receipt.incidents.len() as u64;
            }
            Err(EngramError::MalformedTelemetry(e)) => {
                stats.rejected += 1;
                debug!(error = %e, "skipping malformed message");
            }
            Err(EngramError::SessionClosed) => {
                stats.halted = Some(IngestHalt::SessionClosed);
                break;
            }
            Err(EngramError::ChainBroken { at_index, reason }) => {
                stats.halted = Some(IngestHalt::ChainBroken { at_index, reason });
                break;
            }
            Err(e) => {
                stats.failed += 1;
                error!(error = %e, failed = stats.failed, "message not recorded");
            }
        }
    }

    if let Some(halt) = stats.halted {
        // The message that hit the halt, then everything still buffered.
        stats.dropped += 1;
        rx.close();
        while rx.recv().await.is_some() {
            stats.dropped += 1;
        }
        warn!(cause = ?halt, dropped = stats.dropped, "ingest worker halted");
    }

    info!(
        accepted = stats.accepted,
        rejected = stats.rejected,
        failed = stats.failed,
        dropped = stats.dropped,
        events = stats.events_committed,
        incidents = stats.incidents_committed,
        "ingest queue drained"
    );
    stats
}
