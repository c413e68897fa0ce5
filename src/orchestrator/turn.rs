//! Upload → poll → play → remove for one turn.
//!
//! Strictly sequential: a segment is played and removed before the next
//! poll is issued, because the server only reveals the next segment once
//! asked.

use std::collections::HashSet;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::phase::{PhaseCell, TurnPhase};
use crate::audio::Player;
use crate::error::{TalkError, TalkResult};
use crate::model::{AudioSegment, PollOutcome, SpeechHint};
use crate::presenter::{LogLabel, Presenter};
use crate::service::TurnService;

/// What a completed turn did, for logging and assertions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnReport {
    pub request_id: String,
    pub transcript_text: String,
    /// Segment ids in playback order.
    pub played: Vec<String>,
    pub playback_failures: usize,
    pub deletes_issued: usize,
    pub delete_failures: usize,
    pub polls: usize,
}

/// Store `next` in the phase cell and tell the presenter if it changed.
pub(crate) fn enter<R: Presenter>(cell: &PhaseCell, presenter: &R, next: TurnPhase) {
    let prev = cell.set(next);
    if prev != next {
        debug!(from = %prev, to = %next, "Turn phase");
        presenter.phase_changed(next);
    }
}

/// Borrowed view of everything the pipeline touches.
pub struct TurnPipeline<'a, S, P, R> {
    pub service: &'a S,
    pub player: &'a P,
    pub presenter: &'a R,
    pub phase: &'a PhaseCell,
    pub stage_id: &'a str,
    pub persona_id: &'a str,
    pub poll_interval: Duration,
}

impl<S, P, R> TurnPipeline<'_, S, P, R>
where
    S: TurnService,
    P: Player,
    R: Presenter,
{
    /// Run the server half of a turn. Upload and poll failures abort it;
    /// playback and delete failures are logged and the loop moves on.
    pub async fn run(&self, audio: Vec<u8>, hint: SpeechHint) -> TalkResult<TurnReport> {
        if let Err(e) = self
            .service
            .mark_conversation(self.stage_id, self.persona_id, hint)
            .await
        {
            warn!(error = %e, "Conversation marker failed");
            self.presenter.verbose(&format!("Conversation marker failed: {e}"));
        }

        enter(self.phase, self.presenter, TurnPhase::Uploading);
        let receipt = self
            .service
            .upload_utterance(self.stage_id, self.persona_id, audio, hint)
            .await?;
        info!(request_id = %receipt.request_id, asr = %receipt.transcript_text, "Utterance uploaded");
        self.presenter.verbose(&format!(
            "Upload ok, rid={}, umi={}ms",
            receipt.request_id, hint.estimated_ms
        ));
        if !receipt.transcript_text.is_empty() {
            self.presenter.info(LogLabel::User, &receipt.transcript_text);
        }

        let mut report = TurnReport {
            request_id: receipt.request_id,
            transcript_text: receipt.transcript_text,
            ..Default::default()
        };
        let mut seen = HashSet::new();

        loop {
            enter(self.phase, self.presenter, TurnPhase::Polling);
            report.polls += 1;
            let outcome = self
                .service
                .poll_next_segment(self.stage_id, &report.request_id)
                .await?;

            let (segment_id, transcript_text) = match outcome {
                PollOutcome::Processing => {
                    tokio::time::sleep(self.poll_interval).await;
                    continue;
                }
                PollOutcome::Complete => break,
                PollOutcome::Ready {
                    segment_id,
                    transcript_text,
                } => (segment_id, transcript_text),
            };

            if !seen.insert(segment_id.clone()) {
                return Err(TalkError::ServiceUnavailable(format!(
                    "segment {segment_id} returned twice"
                )));
            }

            let segment = AudioSegment {
                playback_url: self.service.segment_playback_url(
                    self.stage_id,
                    &report.request_id,
                    &segment_id,
                ),
                segment_id,
                transcript_text,
            };
            self.play(&segment, &mut report).await;
            self.remove(&segment, &mut report).await;
        }

        info!(
            request_id = %report.request_id,
            segments = report.played.len(),
            polls = report.polls,
            "Turn complete"
        );
        Ok(report)
    }

    async fn play(&self, segment: &AudioSegment, report: &mut TurnReport) {
        enter(self.phase, self.presenter, TurnPhase::Playing);
        if !segment.transcript_text.is_empty() {
            self.presenter.info(LogLabel::Bot, &segment.transcript_text);
        }
        debug!(segment_id = %segment.segment_id, url = %segment.playback_url, "Playing segment");

        if let Err(e) = self.player.play_until_ended(&segment.playback_url).await {
            warn!(segment_id = %segment.segment_id, error = %e, "Segment playback failed");
            self.presenter
                .verbose(&format!("Play segment {} failed: {e}", segment.segment_id));
            report.playback_failures += 1;
        }
        report.played.push(segment.segment_id.clone());
    }

    async fn remove(&self, segment: &AudioSegment, report: &mut TurnReport) {
        enter(self.phase, self.presenter, TurnPhase::Removing);
        report.deletes_issued += 1;
        match self
            .service
            .delete_segment(self.stage_id, &report.request_id, &segment.segment_id)
            .await
        {
            Ok(()) => debug!(segment_id = %segment.segment_id, "Segment removed"),
            Err(e) => {
                warn!(segment_id = %segment.segment_id, error = %e, "Segment removal failed");
                self.presenter
                    .verbose(&format!("Remove segment {} failed: {e}", segment.segment_id));
                report.delete_failures += 1;
            }
        }
    }
}
