//! Turn Scheduler: the debate state machine.
//!
//! ```text
//! start(None) ── clear ──┐
//! start(Some(c)) ────────┼──► Debating ──► for (round, agent) from cursor:
//! resume() ── cursor ────┘        │           placeholder → open → consume → finalize
//!                                 │           pace (cancellable)
//!         stop()  → cancel, Paused│
//!         reset() → cancel, Idle  └──► rounds exhausted → Complete
//! ```
//!
//! All session state sits behind one `std::sync::Mutex` that is never held
//! across an await. Every mutation made on behalf of a run re-checks that
//! run's cancellation token under the lock, so once `stop()` or `reset()`
//! returns, no further text reaches the transcript.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::cursor::{Cursor, ResumptionCalculator, TranscriptDerived};
use super::decision::{Decision, DecisionSynthesizer, Synthesis};
use super::error::{DebateError, DebateResult, GenerationError};
use super::events::{DebateEvent, EventBus, EVENT_CHANNEL_CAPACITY};
use super::panel::{Agent, Panel};
use super::persistence::{SessionEnvelope, ENVELOPE_VERSION};
use super::port::{BoxChunkStream, GenerationPort, TurnRequest};
use super::state::{SessionStatus, StatusTracker, StatusTransition};
use super::stream::{StreamConsumer, StreamOutcome};
use super::transcript::{Transcript, Turn, TurnId, TurnStatus};

/// Pause between completed turns.
pub const DEFAULT_TURN_DELAY: Duration = Duration::from_millis(350);

/// Upper bound on one turn, request initiation included.
pub const DEFAULT_TURN_TIMEOUT: Duration = Duration::from_secs(120);

/// Appended to partial content when a turn fails midway.
pub const INTERRUPTED_MARKER: &str = "[response interrupted]";

// ── Configuration ──

/// Scheduler tuning knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Pacing delay between completed turns.
    pub turn_delay: Duration,
    /// Per-turn timeout; `None` waits indefinitely.
    pub turn_timeout: Option<Duration>,
    /// Event broadcast buffer size.
    pub event_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            turn_delay: DEFAULT_TURN_DELAY,
            turn_timeout: Some(DEFAULT_TURN_TIMEOUT),
            event_capacity: EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl SchedulerConfig {
    pub fn with_turn_delay(mut self, delay: Duration) -> Self {
        self.turn_delay = delay;
        self
    }

    pub fn with_turn_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.turn_timeout = timeout;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }
}

// ── Observable state ──

/// How a scheduling loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    /// Every round ran; status is `Complete`.
    Completed,
    /// `stop()` or `reset()` ended the loop; the caller owns the status.
    Cancelled,
}

/// The agent currently generating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Speaking {
    pub round: u32,
    pub agent_index: usize,
    pub agent_id: String,
    pub turn_id: TurnId,
}

/// Full session view republished after every mutation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub id: String,
    pub panel_id: String,
    pub prompt: String,
    pub status: SessionStatus,
    pub speaking: Option<Speaking>,
    pub transcript: Transcript,
    pub decision: Option<Decision>,
    pub cursor: Cursor,
    pub updated_at: DateTime<Utc>,
}

struct SessionState {
    prompt: String,
    transcript: Transcript,
    decision: Option<Decision>,
    tracker: StatusTracker,
    speaking: Option<Speaking>,
    /// Token of the current (or last) run; replaced on every start.
    cancel: CancellationToken,
    /// Bumped by `reset()` so late synthesis results can be discarded.
    epoch: u64,
    updated_at: DateTime<Utc>,
}

impl SessionState {
    fn fresh() -> Self {
        Self {
            prompt: String::new(),
            transcript: Transcript::new(),
            decision: None,
            tracker: StatusTracker::new(SessionStatus::Idle),
            speaking: None,
            cancel: CancellationToken::new(),
            epoch: 0,
            updated_at: Utc::now(),
        }
    }
}

enum TurnResult {
    Finished(TurnStatus),
    Cancelled,
}

struct Inner {
    id: String,
    created_at: DateTime<Utc>,
    panel: Panel,
    port: Arc<dyn GenerationPort>,
    resumption: Arc<dyn ResumptionCalculator>,
    config: SchedulerConfig,
    state: Mutex<SessionState>,
    /// Held for the lifetime of a scheduling loop.
    run_lock: tokio::sync::Mutex<()>,
    events: EventBus,
    snapshots: watch::Sender<SessionSnapshot>,
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Stamp, republish the snapshot, then fan out `events`.
    fn publish(&self, state: &mut SessionState, events: Vec<DebateEvent>) {
        state.updated_at = Utc::now();
        self.snapshots.send_replace(snapshot_of(
            &self.id,
            &self.panel,
            self.resumption.as_ref(),
            state,
        ));
        for event in events {
            self.events.publish(event);
        }
    }

    /// Streaming callback: append `text` unless the run was cancelled.
    fn append_chunk(&self, cancel: &CancellationToken, turn_id: &TurnId, text: &str) -> bool {
        let mut state = self.lock_state();
        if cancel.is_cancelled() {
            return false;
        }
        match state.transcript.append_chunk(turn_id, text) {
            Ok(content_len) => {
                self.publish(
                    &mut state,
                    vec![DebateEvent::ChunkAppended {
                        turn_id: turn_id.clone(),
                        content_len,
                    }],
                );
                true
            }
            Err(err) => {
                warn!(session = %self.id, turn = %turn_id, error = %err, "dropping chunk");
                false
            }
        }
    }

    /// Freeze the in-flight turn according to how its stream ended.
    fn settle_turn(
        &self,
        cancel: &CancellationToken,
        turn_id: &TurnId,
        agent: &Agent,
        cursor: Cursor,
        outcome: StreamOutcome,
    ) -> TurnResult {
        let mut state = self.lock_state();
        let stopped = cancel.is_cancelled();
        let Some(partial) = state.transcript.get(turn_id).map(|t| t.content().to_string()) else {
            // reset() already cleared the transcript.
            return TurnResult::Cancelled;
        };

        let status = match outcome {
            StreamOutcome::Completed { ts } => {
                let at = ts.unwrap_or_else(Utc::now);
                if let Err(err) = state.transcript.finalize(turn_id, TurnStatus::Complete, at) {
                    warn!(session = %self.id, turn = %turn_id, error = %err, "finalize failed");
                }
                TurnStatus::Complete
            }
            _ if stopped => {
                if partial.is_empty() && state.transcript.withdraw_placeholder(turn_id) {
                    info!(session = %self.id, turn = %turn_id, "empty turn withdrawn after stop");
                    self.publish(
                        &mut state,
                        vec![DebateEvent::TurnWithdrawn {
                            turn_id: turn_id.clone(),
                        }],
                    );
                    return TurnResult::Cancelled;
                }
                if let Err(err) =
                    state
                        .transcript
                        .finalize(turn_id, TurnStatus::Interrupted, Utc::now())
                {
                    warn!(session = %self.id, turn = %turn_id, error = %err, "finalize failed");
                }
                TurnStatus::Interrupted
            }
            StreamOutcome::Failed(err) => {
                self.fail_turn(&mut state, turn_id, agent, &partial, &err);
                TurnStatus::Failed
            }
            StreamOutcome::Cancelled => {
                self.fail_turn(&mut state, turn_id, agent, &partial, &GenerationError::Cancelled);
                TurnStatus::Failed
            }
        };

        if !stopped {
            state.speaking = None;
        }
        self.publish(
            &mut state,
            vec![DebateEvent::TurnFinished {
                turn_id: turn_id.clone(),
                round: cursor.round,
                agent_index: cursor.agent_index,
                status,
            }],
        );
        debug!(session = %self.id, turn = %turn_id, ?status, "turn settled");

        if stopped {
            TurnResult::Cancelled
        } else {
            TurnResult::Finished(status)
        }
    }

    fn fail_turn(
        &self,
        state: &mut SessionState,
        turn_id: &TurnId,
        agent: &Agent,
        partial: &str,
        err: &GenerationError,
    ) {
        warn!(
            session = %self.id,
            agent = %agent.id,
            turn = %turn_id,
            error = %err,
            partial_len = partial.len(),
            "turn generation failed; continuing with fallback text"
        );
        if let Err(fail_err) = state
            .transcript
            .fail(turn_id, failure_content(partial, agent))
        {
            warn!(session = %self.id, turn = %turn_id, error = %fail_err, "could not record failed turn");
        }
    }
}

/// Visible content for a failed turn: the partial text plus a marker, or
/// a fixed sentence attributed to the agent when nothing arrived.
pub fn failure_content(partial: &str, agent: &Agent) -> String {
    if partial.trim().is_empty() {
        format!("{} was unable to respond this turn.", agent.display_role)
    } else {
        format!("{}\n\n{}", partial.trim_end(), INTERRUPTED_MARKER)
    }
}

fn snapshot_of(
    id: &str,
    panel: &Panel,
    resumption: &dyn ResumptionCalculator,
    state: &SessionState,
) -> SessionSnapshot {
    SessionSnapshot {
        id: id.to_string(),
        panel_id: panel.id().to_string(),
        prompt: state.prompt.clone(),
        status: state.tracker.status(),
        speaking: state.speaking.clone(),
        transcript: state.transcript.clone(),
        decision: state.decision.clone(),
        cursor: resumption.resume_cursor(&state.transcript, panel.size()),
        updated_at: state.updated_at,
    }
}

fn status_event(record: StatusTransition) -> DebateEvent {
    DebateEvent::StatusChanged {
        from: record.from,
        to: record.to,
        reason: record.reason,
    }
}

// ── Scheduler ──

/// Drives one debate session. Cheap to clone; clones share the session.
#[derive(Clone)]
pub struct DebateScheduler {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for DebateScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebateScheduler")
            .field("id", &self.inner.id)
            .field("panel", &self.inner.panel.id())
            .field("status", &self.status())
            .finish()
    }
}

impl DebateScheduler {
    /// A fresh, idle session over `panel`.
    pub fn new(panel: Panel, port: Arc<dyn GenerationPort>, config: SchedulerConfig) -> Self {
        Self::with_resumption(panel, port, config, Arc::new(TranscriptDerived))
    }

    /// Like [`new`](Self::new) with a custom resumption calculator.
    pub fn with_resumption(
        panel: Panel,
        port: Arc<dyn GenerationPort>,
        config: SchedulerConfig,
        resumption: Arc<dyn ResumptionCalculator>,
    ) -> Self {
        Self::assemble(
            Uuid::new_v4().to_string(),
            Utc::now(),
            panel,
            port,
            config,
            resumption,
            SessionState::fresh(),
        )
    }

    /// Rebuild a session from a persisted envelope.
    ///
    /// A session saved mid-debate comes back `Paused`, and any turn that
    /// was still streaming is frozen as interrupted.
    pub fn restore(
        panel: Panel,
        port: Arc<dyn GenerationPort>,
        config: SchedulerConfig,
        envelope: SessionEnvelope,
    ) -> DebateResult<Self> {
        if !envelope.panel_id.is_empty() && envelope.panel_id != panel.id() {
            return Err(DebateError::InvalidPanel(format!(
                "session {} belongs to panel '{}', not '{}'",
                envelope.id,
                envelope.panel_id,
                panel.id()
            )));
        }
        let panel = if envelope.total_rounds > 0 && envelope.total_rounds != panel.total_rounds()
        {
            panel.with_total_rounds(envelope.total_rounds)?
        } else {
            panel
        };

        let mut transcript = envelope.transcript;
        let interrupted = transcript.interrupt_streaming();
        let status = match envelope.status {
            SessionStatus::Debating => SessionStatus::Paused,
            other => other,
        };
        let id = if envelope.id.trim().is_empty() {
            Uuid::new_v4().to_string()
        } else {
            envelope.id
        };
        info!(
            session = %id,
            panel = %panel.id(),
            %status,
            turns = transcript.len(),
            interrupted,
            "session restored"
        );

        let state = SessionState {
            prompt: envelope.prompt,
            transcript,
            decision: envelope.decision,
            tracker: StatusTracker::new(status),
            speaking: None,
            cancel: CancellationToken::new(),
            epoch: 0,
            updated_at: envelope.updated_at,
        };
        Ok(Self::assemble(
            id,
            envelope.created_at,
            panel,
            port,
            config,
            Arc::new(TranscriptDerived),
            state,
        ))
    }

    fn assemble(
        id: String,
        created_at: DateTime<Utc>,
        panel: Panel,
        port: Arc<dyn GenerationPort>,
        config: SchedulerConfig,
        resumption: Arc<dyn ResumptionCalculator>,
        state: SessionState,
    ) -> Self {
        let initial = snapshot_of(&id, &panel, resumption.as_ref(), &state);
        let (snapshots, _) = watch::channel(initial);
        Self {
            inner: Arc::new(Inner {
                id,
                created_at,
                events: EventBus::new(config.event_capacity),
                panel,
                port,
                resumption,
                config,
                state: Mutex::new(state),
                run_lock: tokio::sync::Mutex::new(()),
                snapshots,
            }),
        }
    }

    // ── Accessors ──

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn panel(&self) -> &Panel {
        &self.inner.panel
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.lock_state().tracker.status()
    }

    /// The agent currently generating, if any.
    pub fn speaking(&self) -> Option<Speaking> {
        self.inner.lock_state().speaking.clone()
    }

    pub fn prompt(&self) -> String {
        self.inner.lock_state().prompt.clone()
    }

    pub fn transcript(&self) -> Transcript {
        self.inner.lock_state().transcript.clone()
    }

    pub fn decision(&self) -> Option<Decision> {
        self.inner.lock_state().decision.clone()
    }

    pub fn transitions(&self) -> Vec<StatusTransition> {
        self.inner.lock_state().tracker.transitions().to_vec()
    }

    /// Where a resumed run would continue from.
    pub fn cursor(&self) -> Cursor {
        let state = self.inner.lock_state();
        self.inner
            .resumption
            .resume_cursor(&state.transcript, self.inner.panel.size())
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DebateEvent> {
        self.inner.events.subscribe()
    }

    /// Receiver that always holds the latest snapshot.
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.snapshots.subscribe()
    }

    /// The persistable form of the session.
    pub fn envelope(&self) -> SessionEnvelope {
        let state = self.inner.lock_state();
        SessionEnvelope {
            version: ENVELOPE_VERSION,
            id: self.inner.id.clone(),
            panel_id: self.inner.panel.id().to_string(),
            prompt: state.prompt.clone(),
            transcript: state.transcript.clone(),
            decision: state.decision.clone(),
            status: state.tracker.status(),
            total_rounds: self.inner.panel.total_rounds(),
            created_at: self.inner.created_at,
            updated_at: state.updated_at,
        }
    }

    // ── Operations ──

    /// Replace the running prompt; a running loop uses it from the next turn.
    pub fn set_prompt(&self, prompt: impl Into<String>) {
        let mut state = self.inner.lock_state();
        state.prompt = prompt.into();
        self.inner.publish(&mut state, Vec::new());
    }

    /// Run the scheduling loop until every round is done or the run is
    /// cancelled.
    ///
    /// Without a cursor the transcript and decision are cleared first;
    /// with one the transcript is kept and scheduling starts at the cursor.
    pub async fn start(&self, resume: Option<Cursor>) -> DebateResult<RunOutcome> {
        let cursor = match resume {
            Some(cursor) => self.validate_cursor(cursor)?,
            None => Cursor::default(),
        };
        let cancel = self.enter_debating(resume.is_none(), "debate started")?;
        // A stopped loop may still be closing its stream. The new token is
        // already installed, so a stop() issued meanwhile cancels this run.
        let _run = self.inner.run_lock.lock().await;
        self.run_loop(cancel, cursor).await
    }

    /// Continue from the cursor derived from the current transcript.
    pub async fn resume(&self) -> DebateResult<RunOutcome> {
        let cancel = self.enter_debating(false, "debate resumed")?;
        let _run = self.inner.run_lock.lock().await;
        // Taken after the previous loop has settled its last turn.
        let cursor = self.cursor();
        info!(session = %self.inner.id, %cursor, "resuming debate");
        self.run_loop(cancel, cursor).await
    }

    /// Cancel the running loop and pause. Returns whether anything was
    /// running; repeated calls are no-ops.
    pub fn stop(&self) -> bool {
        let mut state = self.inner.lock_state();
        state.cancel.cancel();
        if state.tracker.status() != SessionStatus::Debating {
            return false;
        }
        state.speaking = None;
        match state.tracker.transition(SessionStatus::Paused, "stopped") {
            Ok(record) => {
                info!(session = %self.inner.id, turns = state.transcript.len(), "debate paused");
                self.inner.publish(&mut state, vec![status_event(record)]);
                true
            }
            Err(err) => {
                warn!(session = %self.inner.id, error = %err, "stop could not pause");
                false
            }
        }
    }

    /// Cancel any run and return to an empty, idle session.
    pub fn reset(&self) {
        let mut state = self.inner.lock_state();
        state.cancel.cancel();
        state.epoch += 1;

        let mut events = Vec::with_capacity(2);
        if state.tracker.status() != SessionStatus::Idle {
            match state.tracker.transition(SessionStatus::Idle, "reset") {
                Ok(record) => events.push(status_event(record)),
                Err(err) => warn!(session = %self.inner.id, error = %err, "reset transition"),
            }
        }
        events.push(DebateEvent::Reset);

        state.transcript = Transcript::new();
        state.decision = None;
        state.speaking = None;
        info!(session = %self.inner.id, "session reset");
        self.inner.publish(&mut state, events);
    }

    /// Append a frozen user turn at the end of the transcript.
    pub fn add_user_message(&self, text: &str) -> DebateResult<TurnId> {
        let text = text.trim();
        if text.is_empty() {
            return Err(DebateError::InvalidRequest(
                "user message is empty".to_string(),
            ));
        }
        let mut state = self.inner.lock_state();
        let turn_id = state.transcript.push(Turn::user(text));
        info!(session = %self.inner.id, turn = %turn_id, status = %state.tracker.status(), "user message added");
        self.inner.publish(
            &mut state,
            vec![DebateEvent::UserMessageAdded {
                turn_id: turn_id.clone(),
            }],
        );
        Ok(turn_id)
    }

    /// Synthesize and record a decision from the current transcript.
    ///
    /// Never fails on backend trouble (a fallback decision is recorded
    /// instead); only an empty transcript is rejected.
    pub async fn synthesize(&self) -> DebateResult<Synthesis> {
        let (prompt, transcript, epoch) = {
            let state = self.inner.lock_state();
            if state.transcript.is_empty() {
                return Err(DebateError::InvalidRequest(
                    "nothing to synthesize: transcript is empty".to_string(),
                ));
            }
            (
                state.prompt.clone(),
                state.transcript.clone(),
                state.epoch,
            )
        };

        let synthesis = DecisionSynthesizer::new(Arc::clone(&self.inner.port))
            .with_timeout(self.inner.config.turn_timeout)
            .synthesize(&prompt, &transcript)
            .await;

        let mut state = self.inner.lock_state();
        if state.epoch != epoch {
            warn!(session = %self.inner.id, "session reset during synthesis; decision discarded");
            return Ok(synthesis);
        }
        state.decision = Some(synthesis.decision.clone());

        let mut events = Vec::with_capacity(2);
        if matches!(
            state.tracker.status(),
            SessionStatus::Idle | SessionStatus::Paused
        ) {
            match state
                .tracker
                .transition(SessionStatus::Complete, "decision synthesized")
            {
                Ok(record) => events.push(status_event(record)),
                Err(err) => warn!(session = %self.inner.id, error = %err, "synthesis transition"),
            }
        }
        events.push(DebateEvent::DecisionReady {
            source: synthesis.source,
        });
        info!(session = %self.inner.id, source = ?synthesis.source, "decision recorded");
        self.inner.publish(&mut state, events);
        Ok(synthesis)
    }

    // ── Loop internals ──

    fn validate_cursor(&self, cursor: Cursor) -> DebateResult<Cursor> {
        let panel = &self.inner.panel;
        let cursor = cursor.normalized(panel.size());
        if cursor.round > panel.total_rounds() {
            return Err(DebateError::InvalidRequest(format!(
                "cursor {} is past the last round ({})",
                cursor,
                panel.total_rounds()
            )));
        }
        Ok(cursor)
    }

    /// Transition to `Debating` and install a fresh cancellation token.
    ///
    /// Runs before the run lock is taken, so `stop()` always finds the
    /// token of the run it is meant to cancel.
    fn enter_debating(&self, clear: bool, reason: &str) -> DebateResult<CancellationToken> {
        let mut state = self.inner.lock_state();
        if state.tracker.status() == SessionStatus::Debating {
            return Err(DebateError::AlreadyRunning);
        }
        if state.prompt.trim().is_empty() {
            return Err(DebateError::InvalidRequest("prompt is empty".to_string()));
        }
        let record = state.tracker.transition(SessionStatus::Debating, reason)?;
        if clear {
            state.transcript = Transcript::new();
            state.decision = None;
        }
        let cancel = CancellationToken::new();
        state.cancel = cancel.clone();
        state.speaking = None;
        info!(
            session = %self.inner.id,
            panel = %self.inner.panel.id(),
            rounds = self.inner.panel.total_rounds(),
            agents = self.inner.panel.size(),
            "{}",
            reason
        );
        self.inner.publish(&mut state, vec![status_event(record)]);
        Ok(cancel)
    }

    async fn run_loop(
        &self,
        cancel: CancellationToken,
        mut cursor: Cursor,
    ) -> DebateResult<RunOutcome> {
        let panel_size = self.inner.panel.size();
        let total_rounds = self.inner.panel.total_rounds();

        while !cursor.is_exhausted(total_rounds) {
            if cancel.is_cancelled() {
                return Ok(self.loop_cancelled(cursor));
            }
            if let TurnResult::Cancelled = self.run_turn(&cancel, cursor).await {
                return Ok(self.loop_cancelled(cursor));
            }
            cursor = Cursor::new(cursor.round, cursor.agent_index + 1).normalized(panel_size);
            if cancel.is_cancelled() {
                return Ok(self.loop_cancelled(cursor));
            }
            if !cursor.is_exhausted(total_rounds) && !self.pace(&cancel).await {
                return Ok(self.loop_cancelled(cursor));
            }
        }

        let mut state = self.inner.lock_state();
        if cancel.is_cancelled() {
            return Ok(RunOutcome::Cancelled);
        }
        state.speaking = None;
        let record = state
            .tracker
            .transition(SessionStatus::Complete, "all rounds exhausted")?;
        info!(
            session = %self.inner.id,
            turns = state.transcript.len(),
            "debate complete"
        );
        self.inner.publish(&mut state, vec![status_event(record)]);
        Ok(RunOutcome::Completed)
    }

    fn loop_cancelled(&self, cursor: Cursor) -> RunOutcome {
        info!(session = %self.inner.id, %cursor, "debate loop cancelled");
        RunOutcome::Cancelled
    }

    async fn run_turn(&self, cancel: &CancellationToken, cursor: Cursor) -> TurnResult {
        let inner = &*self.inner;
        // Normalized cursors always index into the panel.
        let agent = &inner.panel.agents()[cursor.agent_index];
        let started = Instant::now();

        let (turn_id, request) = {
            let mut state = inner.lock_state();
            if cancel.is_cancelled() {
                return TurnResult::Cancelled;
            }
            let context = state.transcript.clone();
            let turn_id = state
                .transcript
                .push(Turn::placeholder(agent, cursor.round, cursor.agent_index));
            state.speaking = Some(Speaking {
                round: cursor.round,
                agent_index: cursor.agent_index,
                agent_id: agent.id.clone(),
                turn_id: turn_id.clone(),
            });
            let request = TurnRequest {
                prompt: inner
                    .panel
                    .frame_prompt(&state.prompt, agent, cursor.round + 1),
                transcript: context,
                agent_id: agent.id.clone(),
                round: cursor.round + 1,
            };
            info!(
                session = %inner.id,
                round = cursor.round,
                agent = %agent.id,
                turn = %turn_id,
                "turn started"
            );
            inner.publish(
                &mut state,
                vec![DebateEvent::TurnStarted {
                    turn_id: turn_id.clone(),
                    round: cursor.round,
                    agent_index: cursor.agent_index,
                    agent_id: agent.id.clone(),
                }],
            );
            (turn_id, request)
        };

        let outcome = match self.open_turn(cancel, request, started).await {
            Ok(mut stream) => {
                let consumer = StreamConsumer::new(cancel.clone())
                    .with_deadline(inner.config.turn_timeout, started);
                let report = consumer
                    .consume(stream.as_mut(), |text| {
                        inner.append_chunk(cancel, &turn_id, text)
                    })
                    .await;
                debug!(
                    session = %inner.id,
                    turn = %turn_id,
                    chunks = report.chunks,
                    malformed = report.malformed,
                    "stream consumed"
                );
                report.outcome
            }
            Err(err) if err.is_cancellation() && cancel.is_cancelled() => StreamOutcome::Cancelled,
            Err(err) => StreamOutcome::Failed(err),
        };

        inner.settle_turn(cancel, &turn_id, agent, cursor, outcome)
    }

    /// Open the agent's stream, bounded by cancellation and the turn deadline.
    async fn open_turn(
        &self,
        cancel: &CancellationToken,
        request: TurnRequest,
        started: Instant,
    ) -> Result<BoxChunkStream, GenerationError> {
        let call = self.inner.port.open_turn(request);
        let timeout = self.inner.config.turn_timeout;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(GenerationError::Cancelled),
            result = async {
                match timeout {
                    Some(limit) => tokio::time::timeout_at(started + limit, call)
                        .await
                        .unwrap_or_else(|_| Err(GenerationError::Timeout(limit.as_millis() as u64))),
                    None => call.await,
                }
            } => result,
        }
    }

    /// Pacing delay between turns. Returns `false` if cancelled meanwhile.
    async fn pace(&self, cancel: &CancellationToken) -> bool {
        let delay = self.inner.config.turn_delay;
        if delay.is_zero() {
            return !cancel.is_cancelled();
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}
