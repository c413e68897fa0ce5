//! Remote turn service: stage creation, upload, segment polling and cleanup.
//!
//! Each call is a single request/response pair. The client never retries;
//! callers decide what a failure means for their phase.

pub mod http;
pub mod protocol;

use crate::error::TalkResult;
use crate::model::{PersonaProfile, PollOutcome, SpeechHint, StageCatalogue, UploadReceipt};

pub use http::HttpTurnService;

#[allow(async_fn_in_trait)]
pub trait TurnService {
    /// Create a stage and fetch the persona catalogue.
    async fn create_stage(&self) -> TalkResult<StageCatalogue>;

    /// Upload one utterance; the server transcribes it and starts the reply.
    async fn upload_utterance(
        &self,
        stage_id: &str,
        persona_id: &str,
        audio: Vec<u8>,
        hint: SpeechHint,
    ) -> TalkResult<UploadReceipt>;

    /// Ask for the next ready segment of `request_id`.
    async fn poll_next_segment(&self, stage_id: &str, request_id: &str)
        -> TalkResult<PollOutcome>;

    /// URL the player dereferences for a segment. No network call.
    fn segment_playback_url(&self, stage_id: &str, request_id: &str, segment_id: &str) -> String;

    /// Best-effort removal of a played segment.
    async fn delete_segment(
        &self,
        stage_id: &str,
        request_id: &str,
        segment_id: &str,
    ) -> TalkResult<()>;

    /// Mark the start of a new conversation turn on the server.
    async fn mark_conversation(
        &self,
        stage_id: &str,
        persona_id: &str,
        hint: SpeechHint,
    ) -> TalkResult<()>;

    /// URL of the persona's welcome clip. No network call.
    fn welcome_audio_url(&self, stage_id: &str, persona: &PersonaProfile) -> String;
}
