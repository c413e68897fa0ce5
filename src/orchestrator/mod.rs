//! Conversation orchestrator: push-to-talk recording with a cancellable
//! stop, then one upload/poll/play/remove turn at a time.
//!
//! One owned instance holds the recorder, the pre-armed stream and the
//! stop deadline. `run` drives it from a command channel; the individual
//! transitions are public so they can be driven directly as well.

pub mod phase;
pub mod turn;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::audio::{Microphone, Player};
use crate::capabilities::Capabilities;
use crate::config::TurnPolicy;
use crate::error::{TalkError, TalkResult};
use crate::model::SpeechHint;
use crate::presenter::Presenter;
use crate::service::TurnService;
use crate::session::ReadySession;

pub use phase::{PhaseCell, TurnPhase};
pub use turn::TurnReport;
use turn::{enter, TurnPipeline};

/// Normalized input for the run loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnCommand {
    Start,
    Stop,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// A pending stop was cancelled; the same recording continues.
    Resumed,
    AlreadyRecording,
    /// A turn is being processed; input is disabled.
    Busy,
    /// The microphone could not be opened or started.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Scheduled,
    /// A stop is already pending; its deadline is kept.
    AlreadyPending,
    NotRecording,
}

struct ActiveRecording<H> {
    handle: H,
    started_at: Instant,
}

pub struct Orchestrator<M: Microphone, S, P, R> {
    caps: Capabilities<M, S, P, R>,
    session: ReadySession,
    policy: TurnPolicy,
    phase: Arc<PhaseCell>,
    armed: Option<M::Stream>,
    recording: Option<ActiveRecording<M::Recorder>>,
    stop_at: Option<Instant>,
}

impl<M, S, P, R> Orchestrator<M, S, P, R>
where
    M: Microphone,
    S: TurnService,
    P: Player,
    R: Presenter,
{
    pub fn new(caps: Capabilities<M, S, P, R>, session: ReadySession, policy: TurnPolicy) -> Self {
        Self {
            caps,
            session,
            policy,
            phase: PhaseCell::new(),
            armed: None,
            recording: None,
            stop_at: None,
        }
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase.current()
    }

    /// Shared handle for readers that outlive a borrow of the orchestrator.
    pub fn phase_cell(&self) -> Arc<PhaseCell> {
        Arc::clone(&self.phase)
    }

    pub fn session(&self) -> &ReadySession {
        &self.session
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    pub fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    pub fn stop_deadline(&self) -> Option<Instant> {
        self.stop_at
    }

    fn enter(&self, next: TurnPhase) {
        enter(&self.phase, &self.caps.presenter, next);
    }

    /// Open the microphone ahead of the next press. A failure is not fatal:
    /// `start_recording` opens the device itself when nothing is armed.
    pub async fn arm_microphone(&mut self) -> bool {
        if self.armed.is_some() {
            return true;
        }
        match self.caps.microphone.open().await {
            Ok(stream) => {
                self.armed = Some(stream);
                debug!("Microphone armed");
                true
            }
            Err(e) => {
                warn!(error = %e, "Failed to pre-arm microphone");
                self.caps.presenter.verbose(&format!("Pre-arm failed: {e}"));
                false
            }
        }
    }

    /// Press. Cancels a pending stop if there is one; otherwise starts a
    /// recording on the armed stream.
    pub async fn start_recording(&mut self) -> StartOutcome {
        if self.phase().is_busy() {
            debug!(phase = %self.phase(), "Start ignored, turn in progress");
            return StartOutcome::Busy;
        }

        if self.recording.is_some() {
            if self.stop_at.take().is_some() {
                self.enter(TurnPhase::Recording);
                info!("Pending stop cancelled");
                self.caps.presenter.verbose("Stop cancelled, still recording");
                return StartOutcome::Resumed;
            }
            return StartOutcome::AlreadyRecording;
        }

        let stream = match self.armed.take() {
            Some(stream) => stream,
            None => match self.caps.microphone.open().await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(error = %e, "Failed to open microphone");
                    self.caps.presenter.warn(&format!("Microphone unavailable: {e}"));
                    return StartOutcome::Failed;
                }
            },
        };

        match self.caps.microphone.record(stream) {
            Ok(handle) => {
                self.recording = Some(ActiveRecording {
                    handle,
                    started_at: Instant::now(),
                });
                self.enter(TurnPhase::Recording);
                info!("Recording started");
                self.caps.presenter.verbose("Start recording");
                StartOutcome::Started
            }
            Err(e) => {
                warn!(error = %e, "Failed to start recording");
                self.caps.presenter.warn(&format!("Recording failed: {e}"));
                StartOutcome::Failed
            }
        }
    }

    /// Release. Schedules the device stop after the grace window.
    pub fn stop_recording(&mut self) -> StopOutcome {
        if self.recording.is_none() {
            return StopOutcome::NotRecording;
        }
        if self.stop_at.is_some() {
            return StopOutcome::AlreadyPending;
        }
        self.stop_at = Some(Instant::now() + self.policy.stop_grace);
        self.enter(TurnPhase::StopPending);
        debug!(grace_ms = self.policy.stop_grace.as_millis() as u64, "Stop scheduled");
        StopOutcome::Scheduled
    }

    /// Wait out a pending stop and run the turn it ends.
    pub async fn finish_pending_stop(&mut self) -> Option<TurnReport> {
        let deadline = self.stop_at?;
        sleep_until(deadline).await;
        self.complete_turn(None).await.0
    }

    /// Drive the orchestrator until `Shutdown` or until every sender is gone.
    pub async fn run(mut self, mut commands: mpsc::Receiver<TurnCommand>) {
        self.arm_microphone().await;
        info!(stage_id = %self.session.stage.stage_id, persona = %self.session.persona.id, "Orchestrator running");

        loop {
            let stop_at = self.stop_at;
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(TurnCommand::Start) => {
                        self.start_recording().await;
                    }
                    Some(TurnCommand::Stop) => {
                        self.stop_recording();
                    }
                    Some(TurnCommand::Shutdown) | None => break,
                },
                _ = sleep_until(stop_at.unwrap_or_else(Instant::now)), if stop_at.is_some() => {
                    let (_, shutdown) = self.complete_turn(Some(&mut commands)).await;
                    if shutdown {
                        break;
                    }
                }
            }
        }

        self.shutdown().await;
    }

    /// Release the recorder and the armed stream.
    pub async fn shutdown(&mut self) {
        self.stop_at = None;
        if let Some(active) = self.recording.take() {
            if let Err(e) = self.caps.microphone.stop(active.handle).await {
                warn!(error = %e, "Failed to stop recorder on shutdown");
            }
        }
        self.armed = None;
        self.enter(TurnPhase::Idle);
        info!("Orchestrator stopped");
    }

    /// Stop the device, run the turn, then return to `Idle` and re-arm no
    /// matter how the turn ended. The bool reports a shutdown request
    /// received while the turn was running.
    async fn complete_turn(
        &mut self,
        inputs: Option<&mut mpsc::Receiver<TurnCommand>>,
    ) -> (Option<TurnReport>, bool) {
        self.stop_at = None;
        let Some(active) = self.recording.take() else {
            return (None, false);
        };
        self.enter(TurnPhase::Stopping);

        let span = info_span!("turn", id = %Uuid::new_v4());
        let mut shutdown = false;
        let result = self
            .run_turn(active, inputs, &mut shutdown)
            .instrument(span.clone())
            .await;

        span.in_scope(|| match &result {
            Ok(Some(report)) => self.caps.presenter.verbose(&format!(
                "Turn finished, {} segments, {} removals failed",
                report.played.len(),
                report.delete_failures
            )),
            Ok(None) => {}
            Err(e) => {
                self.enter(TurnPhase::Aborted);
                warn!(error = %e, "Turn aborted");
                self.caps.presenter.warn(&format!("Turn aborted: {e}"));
            }
        });

        self.enter(TurnPhase::Idle);
        self.arm_microphone().await;
        (result.ok().flatten(), shutdown)
    }

    async fn run_turn(
        &self,
        active: ActiveRecording<M::Recorder>,
        inputs: Option<&mut mpsc::Receiver<TurnCommand>>,
        shutdown: &mut bool,
    ) -> TalkResult<Option<TurnReport>> {
        let utterance = self.caps.microphone.stop(active.handle).await?;
        let recorded = active.started_at.elapsed();
        let hint = self.speech_hint(recorded);
        info!(
            recorded_ms = recorded.as_millis() as u64,
            speech_ms = hint.estimated_ms,
            chunks = utterance.chunks,
            bytes = utterance.audio.len(),
            "Recording stopped"
        );

        if !utterance.has_data() {
            self.caps.presenter.warn("No audio captured, turn skipped");
            discard_queued(inputs, shutdown);
            return Ok(None);
        }
        if !hint.may_have_spoken {
            let silent = TalkError::SilentInput {
                speech_ms: hint.estimated_ms,
                min_ms: self.policy.min_speech.as_millis() as u64,
            };
            if !self.policy.upload_silent_turns {
                info!("{silent}");
                self.caps.presenter.warn(&silent.to_string());
                discard_queued(inputs, shutdown);
                return Ok(None);
            }
            self.caps
                .presenter
                .warn("Speech too short, uploading as possibly silent");
        }

        let pipeline = TurnPipeline {
            service: &self.caps.service,
            player: &self.caps.player,
            presenter: &self.caps.presenter,
            phase: &self.phase,
            stage_id: &self.session.stage.stage_id,
            persona_id: &self.session.persona.id,
            poll_interval: self.policy.poll_interval,
        };
        let work = pipeline.run(utterance.audio, hint);
        tokio::pin!(work);

        let Some(inputs) = inputs else {
            return work.await.map(Some);
        };
        let mut open = true;
        let report = loop {
            tokio::select! {
                res = &mut work => break res?,
                cmd = inputs.recv(), if open => match cmd {
                    Some(TurnCommand::Shutdown) => *shutdown = true,
                    None => {
                        open = false;
                        *shutdown = true;
                    }
                    Some(other) => debug!(command = ?other, "Input ignored, turn in progress"),
                },
            }
        };
        Ok(Some(report))
    }

    /// Recorded time minus the grace window the user spent not talking.
    fn speech_hint(&self, recorded: Duration) -> SpeechHint {
        let speech = recorded.saturating_sub(self.policy.stop_grace);
        SpeechHint {
            estimated_ms: speech.as_millis() as u64,
            may_have_spoken: speech >= self.policy.min_speech,
        }
    }
}

/// Drop presses that queued up while the device was stopping, keeping
/// only a shutdown request.
fn discard_queued(inputs: Option<&mut mpsc::Receiver<TurnCommand>>, shutdown: &mut bool) {
    let Some(inputs) = inputs else {
        return;
    };
    loop {
        match inputs.try_recv() {
            Ok(TurnCommand::Shutdown) => *shutdown = true,
            Ok(other) => debug!(command = ?other, "Input ignored, turn in progress"),
            Err(TryRecvError::Empty) => break,
            Err(TryRecvError::Disconnected) => {
                *shutdown = true;
                break;
            }
        }
    }
}
