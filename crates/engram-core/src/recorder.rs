//! Recording session: the single commit path and the query contract.
//!
//! Each normalized event runs one pipeline step under the pipeline lock:
//!
//! 1. append any incidents still pending from an earlier failed write
//! 2. append the event (the ledger assigns its `sequence_no`)
//! 3. fold it through the risk engine and the incident synthesizer
//! 4. append every incident it opened
//! 5. publish a new [`ProjectionSnapshot`]
//!
//! Nothing reaches the query side before it is in the ledger, and the
//! projection order equals the chain order. Queries read the last published
//! snapshot and never wait on the pipeline.

use std::collections::VecDeque;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{debug, info, instrument, warn};

use engram_ledger::{
    BreakReason, ChainVerdict, JusticeLog, LedgerError, LedgerSnapshot, LedgerStore, PayloadKind,
    SealManifest,
};

use crate::config::EngramConfig;
use crate::domain::{EngramError, Event, EventBody, Incident, NormalizeError, RawTelemetry, Result};
use crate::dossier::{DossierGenerator, DossierOptions, DossierSigner, Ed25519Signer, Report};
use crate::metrics::METRICS;
use crate::normalizer;
use crate::obs;
use crate::projection::{
    AgentView, IncidentRow, LedgerVerification, ProjectionSnapshot, Projector, RiskSummary,
};
use crate::replay::{self, ReplayAudit};

/// Whether the session accepts telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Recording,
    Stopped,
}

/// Ledger state of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionMode {
    /// Appending to an intact chain
    Live,
    /// Sealed; no further appends
    Sealed,
    /// Verification failed; appends refused until an operator intervenes
    Compromised,
}

/// Result of `get_status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationStatus {
    pub session_id: String,
    pub status: SessionStatus,
    pub mode: SessionMode,
    pub uptime_secs: u64,
    pub events_logged: u64,
}

/// Broadcast after every ledger commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitNotice {
    pub entry_index: u64,
    pub kind: PayloadKind,
    pub this_hash: String,
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incident_id: Option<String>,
}

/// What one ingested message committed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReceipt {
    /// Sequence numbers of committed events
    pub events: Vec<u64>,
    /// Ids of incidents committed while processing the message
    pub incidents: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
struct SessionState {
    status: SessionStatus,
    mode: SessionMode,
    broken: Option<(u64, BreakReason)>,
}

struct Pipeline {
    projector: Projector,
    /// Derived incidents not yet durably recorded, in emission order
    pending: VecDeque<Incident>,
}

/// A recording session over one Justice Log.
pub struct Recorder {
    session_id: String,
    config: EngramConfig,
    log: Arc<JusticeLog>,
    pipeline: Mutex<Pipeline>,
    published: watch::Sender<Arc<ProjectionSnapshot>>,
    notices: broadcast::Sender<CommitNotice>,
    signer: Option<Arc<dyn DossierSigner>>,
    state: RwLock<SessionState>,
    started_at: Instant,
}

impl Recorder {
    /// Open the store named by `config` and start a session over it.
    ///
    /// A configured `dossier.signing_key` becomes the dossier signer.
    pub async fn open(config: EngramConfig) -> Result<Self> {
        let store = config.ledger.open_store().await?;
        let signer = match &config.dossier.signing_key {
            Some(seed) => Some(Arc::new(Ed25519Signer::from_hex_seed(seed)?) as Arc<dyn DossierSigner>),
            None => None,
        };
        let recorder = Self::with_store(store, config).await?;
        Ok(match signer {
            Some(signer) => recorder.with_signer(signer),
            None => recorder,
        })
    }

    /// Start a session over `store`, rebuilding projections from whatever it holds.
    ///
    /// A ledger that fails verification opens in [`SessionMode::Compromised`]:
    /// queries answer from the verified prefix and ingestion is refused.
    #[instrument(skip_all, fields(backend = store.backend()))]
    pub async fn with_store(store: Arc<dyn LedgerStore>, config: EngramConfig) -> Result<Self> {
        config.validate()?;
        let log = Arc::new(JusticeLog::open(store, config.ledger.write_policy()).await?);
        let outcome = replay::replay_ledger(&log, &config.risk, &config.incidents).await?;

        let broken = match outcome.verdict {
            ChainVerdict::Verified { .. } => None,
            ChainVerdict::Broken { at_index, reason } => {
                warn!(
                    event = "session.compromised",
                    at_index = at_index,
                    reason = %reason,
                    "ledger failed verification on open; ingestion disabled"
                );
                Some((at_index, reason))
            }
        };
        let mode = if broken.is_some() {
            SessionMode::Compromised
        } else {
            SessionMode::Live
        };

        let snapshot = Arc::new(outcome.projector.snapshot());
        let (published, _) = watch::channel(snapshot);
        let (notices, _) = broadcast::channel(config.ingest.notice_capacity);
        let session_id = uuid::Uuid::new_v4().to_string();

        info!(
            session_id = %session_id,
            entries = outcome.replayed_entries,
            pending_incidents = outcome.pending.len(),
            "recording session opened"
        );

        let recorder = Self {
            session_id,
            log,
            pipeline: Mutex::new(Pipeline {
                projector: outcome.projector,
                pending: outcome.pending.into(),
            }),
            published,
            notices,
            signer: None,
            state: RwLock::new(SessionState {
                status: SessionStatus::Recording,
                mode,
                broken,
            }),
            started_at: Instant::now(),
            config,
        };

        if broken.is_none() {
            let mut pipeline = recorder.pipeline.lock().await;
            if !pipeline.pending.is_empty() {
                if let Err(e) = recorder.flush_pending(&mut pipeline, &mut Vec::new()).await {
                    warn!(error = %e, "pending incidents not recorded on open; will retry");
                }
                recorder.publish(&mut pipeline);
            }
        }
        Ok(recorder)
    }

    /// Start a session over a fresh in-memory ledger.
    pub async fn in_memory(config: EngramConfig) -> Result<Self> {
        Self::with_store(Arc::new(engram_ledger::fakes::MemoryLedgerStore::new()), config).await
    }

    /// Attach a dossier signer.
    pub fn with_signer(mut self, signer: Arc<dyn DossierSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn config(&self) -> &EngramConfig {
        &self.config
    }

    pub fn log(&self) -> &Arc<JusticeLog> {
        &self.log
    }

    fn state(&self) -> SessionState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn update_state(&self, f: impl FnOnce(&mut SessionState)) {
        f(&mut self.state.write().unwrap_or_else(PoisonError::into_inner));
    }

    // -- ingestion -----------------------------------------------------------

    /// Decode and ingest one JSON message.
    pub async fn ingest_json(&self, line: &str) -> Result<IngestReceipt> {
        match RawTelemetry::from_json(line) {
            Ok(raw) => self.ingest(&raw).await,
            Err(e) => Err(self.reject(e)),
        }
    }

    /// Normalize one message and commit every event it yields.
    ///
    /// Malformed telemetry is logged, counted and returned as
    /// `MalformedTelemetry`; nothing is committed for it. Ledger write
    /// failures are returned as `Ledger` and never swallowed.
    pub async fn ingest(&self, raw: &RawTelemetry) -> Result<IngestReceipt> {
        let bodies = normalizer::normalize(raw).map_err(|e| self.reject(e))?;

        let mut pipeline = self.pipeline.lock().await;
        let mut receipt = IngestReceipt::default();
        for body in bodies {
            self.step(&mut pipeline, body, &mut receipt).await?;
        }
        Ok(receipt)
    }

    fn reject(&self, error: NormalizeError) -> EngramError {
        METRICS.inc_telemetry_rejected();
        obs::emit_telemetry_rejected(&error);
        EngramError::MalformedTelemetry(error)
    }

    fn ensure_writable(&self) -> Result<()> {
        let state = self.state();
        if let Some((at_index, reason)) = state.broken {
            return Err(EngramError::ChainBroken { at_index, reason });
        }
        if state.status == SessionStatus::Stopped {
            return Err(EngramError::SessionClosed);
        }
        Ok(())
    }

    async fn step(
        &self,
        pipeline: &mut Pipeline,
        body: EventBody,
        receipt: &mut IngestReceipt,
    ) -> Result<()> {
        self.ensure_writable()?;
        let result = self.commit(pipeline, body, receipt).await;
        // Publish whatever reached the ledger, even when a later write failed.
        if self.projection().ledger.len != self.log.len() {
            self.publish(pipeline);
        }
        result
    }

    async fn commit(
        &self,
        pipeline: &mut Pipeline,
        body: EventBody,
        receipt: &mut IngestReceipt,
    ) -> Result<()> {
        self.flush_pending(pipeline, &mut receipt.incidents).await?;

        let entry = match self.log.append_json(PayloadKind::Event, &body).await {
            Ok(entry) => entry,
            Err(e) => {
                METRICS.inc_write_failures();
                return Err(e.into());
            }
        };
        let event = Event::new(entry.entry_index, body);
        receipt.events.push(event.sequence_no);
        METRICS.inc_events_committed();

        let candidates = pipeline.projector.apply_event(&event)?;
        let risk_score = pipeline
            .projector
            .state()
            .agents
            .get(&event.agent_id)
            .map(|a| a.risk_score)
            .unwrap_or(0);
        obs::emit_event_committed(event.sequence_no, &event.agent_id, risk_score);
        let _ = self.notices.send(CommitNotice {
            entry_index: entry.entry_index,
            kind: PayloadKind::Event,
            this_hash: entry.this_hash,
            agent_id: event.agent_id.clone(),
            incident_id: None,
        });

        pipeline.pending.extend(candidates);
        self.flush_pending(pipeline, &mut receipt.incidents).await
    }

    /// Append pending incidents in order; stops at the first failure.
    async fn flush_pending(&self, pipeline: &mut Pipeline, committed: &mut Vec<String>) -> Result<()> {
        while let Some(incident) = pipeline.pending.front() {
            let entry = match self.log.append_json(PayloadKind::Incident, incident).await {
                Ok(entry) => entry,
                Err(e) => {
                    METRICS.inc_write_failures();
                    warn!(
                        event = "incident.write_deferred",
                        incident_id = %incident.incident_id,
                        pending = pipeline.pending.len(),
                        error = %e,
                    );
                    return Err(e.into());
                }
            };
            let Some(incident) = pipeline.pending.pop_front() else {
                break;
            };

            METRICS.inc_incidents_committed();
            obs::emit_incident_committed(
                entry.entry_index,
                &incident.incident_id,
                &incident.agent_id,
                incident.fault_type,
                incident.preventability,
            );
            let _ = self.notices.send(CommitNotice {
                entry_index: entry.entry_index,
                kind: PayloadKind::Incident,
                this_hash: entry.this_hash,
                agent_id: incident.agent_id.clone(),
                incident_id: Some(incident.incident_id.clone()),
            });
            committed.push(incident.incident_id.clone());
            pipeline.projector.record_incident(incident);
        }
        Ok(())
    }

    fn publish(&self, pipeline: &mut Pipeline) {
        pipeline.projector.set_ledger(self.log.snapshot());
        let snapshot = Arc::new(pipeline.projector.snapshot());
        debug!(
            events = snapshot.events_logged,
            incidents = snapshot.incidents.len(),
            "projection published"
        );
        self.published.send_replace(snapshot);
    }

    // -- subscriptions -------------------------------------------------------

    /// Stream of commit notices. Slow receivers lag instead of blocking commits.
    pub fn subscribe(&self) -> broadcast::Receiver<CommitNotice> {
        self.notices.subscribe()
    }

    /// Receiver that observes every published projection.
    pub fn watch_projection(&self) -> watch::Receiver<Arc<ProjectionSnapshot>> {
        self.published.subscribe()
    }

    /// The last published projection.
    pub fn projection(&self) -> Arc<ProjectionSnapshot> {
        self.published.borrow().clone()
    }

    // -- queries -------------------------------------------------------------

    pub fn get_status(&self) -> SimulationStatus {
        let state = self.state();
        SimulationStatus {
            session_id: self.session_id.clone(),
            status: state.status,
            mode: state.mode,
            uptime_secs: self.started_at.elapsed().as_secs(),
            events_logged: self.projection().events_logged,
        }
    }

    pub fn get_system_risk_score(&self) -> u32 {
        self.projection().system_risk_score
    }

    pub fn get_active_agents(&self) -> Vec<AgentView> {
        self.projection().active_agents()
    }

    pub fn get_incidents(&self) -> Vec<IncidentRow> {
        self.projection().incident_rows()
    }

    /// Narrative of one incident.
    pub fn get_incident_details(&self, incident_id: &str) -> Result<String> {
        self.projection()
            .incident(incident_id)
            .map(|i| i.narrative.clone())
            .ok_or_else(|| EngramError::IncidentNotFound(incident_id.to_string()))
    }

    /// Full incident record.
    pub fn get_incident(&self, incident_id: &str) -> Result<Incident> {
        self.projection()
            .incident(incident_id)
            .cloned()
            .ok_or_else(|| EngramError::IncidentNotFound(incident_id.to_string()))
    }

    pub fn get_risk_summary(&self) -> RiskSummary {
        self.projection().risk_summary()
    }

    /// Verify the committed chain from genesis.
    ///
    /// A broken chain is reported, not raised, and switches the session to
    /// [`SessionMode::Compromised`].
    pub async fn verify_ledger(&self) -> Result<LedgerVerification> {
        self.verify_prefix(&self.log.snapshot()).await
    }

    /// Verify the chain up to `snapshot` and record a break in the session state.
    async fn verify_prefix(&self, snapshot: &LedgerSnapshot) -> Result<LedgerVerification> {
        let verdict = self.log.verify_through(snapshot.len).await?;
        let genesis = self.log.genesis_hash().await?;
        let verification = LedgerVerification::new(&verdict, snapshot, genesis);

        if let ChainVerdict::Broken { at_index, reason } = verdict {
            self.update_state(|s| {
                s.mode = SessionMode::Compromised;
                s.broken = Some((at_index, reason));
            });
        }
        obs::emit_ledger_verified(
            verification.valid,
            verification.total_entries,
            verification.broken_at,
        );
        Ok(verification)
    }

    /// Build a dossier from the current projection.
    ///
    /// The integrity section verifies exactly the ledger prefix the projection
    /// was built from, so both halves of the report describe the same entries.
    /// A compromised session's projection ends at the break, so there the whole
    /// committed chain is verified and the break is reported.
    pub async fn generate_dossier(&self, options: DossierOptions) -> Result<Report> {
        if options.sign && self.signer.is_none() {
            return Err(EngramError::SigningUnavailable);
        }
        let projection = self.projection();
        let prefix = match self.state().broken {
            Some(_) => self.log.snapshot(),
            None => projection.ledger.clone(),
        };
        let verification = self.verify_prefix(&prefix).await?;
        let report = DossierGenerator::new(&self.config.dossier, self.signer.as_deref())
            .generate(&projection, &verification, options)?;
        obs::emit_dossier_generated(
            report.incidents.len(),
            report.integrity.total_entries,
            report.signature.is_some(),
        );
        Ok(report)
    }

    /// Re-derive incidents from recorded events and compare.
    pub async fn replay_audit(&self) -> Result<ReplayAudit> {
        replay::replay_audit(&self.log, &self.config.risk, &self.config.incidents).await
    }

    /// Human-readable audit trail of the whole ledger.
    pub async fn audit_trail(&self) -> Result<String> {
        Ok(self.log.export_audit_trail().await?)
    }

    // -- lifecycle -----------------------------------------------------------

    /// Seal the ledger and stop the session.
    ///
    /// # Errors
    ///
    /// `ChainBroken` when the chain does not verify; nothing is sealed.
    pub async fn seal(&self) -> Result<SealManifest> {
        let mut pipeline = self.pipeline.lock().await;
        if self.state().broken.is_none() && self.state().status == SessionStatus::Recording {
            let flushed = self.flush_pending(&mut pipeline, &mut Vec::new()).await;
            self.publish(&mut pipeline);
            flushed?;
        }

        let manifest = self.log.seal().await?;
        if let ChainVerdict::Broken { at_index, reason } = manifest.verdict {
            self.update_state(|s| {
                s.mode = SessionMode::Compromised;
                s.broken = Some((at_index, reason));
            });
            return Err(EngramError::ChainBroken { at_index, reason });
        }

        self.log.store().flush().await.map_err(LedgerError::from)?;
        self.update_state(|s| {
            s.status = SessionStatus::Stopped;
            s.mode = SessionMode::Sealed;
        });
        info!(
            event = "ledger.sealed",
            total_entries = manifest.total_entries,
            chain_hash = %manifest.chain_hash,
        );
        Ok(manifest)
    }

    /// Flush and stop the session. Projections remain queryable.
    pub async fn close(&self) -> Result<()> {
        let mut pipeline = self.pipeline.lock().await;
        let flushed = if self.state().broken.is_none() && self.state().status == SessionStatus::Recording {
            let result = self.flush_pending(&mut pipeline, &mut Vec::new()).await;
            self.publish(&mut pipeline);
            result
        } else {
            Ok(())
        };

        self.log.store().flush().await.map_err(LedgerError::from)?;
        self.update_state(|s| s.status = SessionStatus::Stopped);

        let snapshot = self.projection();
        obs::emit_session_closed(&self.session_id, snapshot.events_logged, snapshot.incidents.len());
        METRICS.flush();
        flushed
    }
}
