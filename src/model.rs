//! Data model shared across bootstrap, service client and orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A server-side stage, created once per client session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageSession {
    pub stage_id: String,
    pub created_at: DateTime<Utc>,
}

impl StageSession {
    pub fn new(stage_id: impl Into<String>) -> Self {
        Self {
            stage_id: stage_id.into(),
            created_at: Utc::now(),
        }
    }
}

/// A selectable voice persona ("robot" on the wire).
///
/// Field names follow the wire format so the same JSON is used for the
/// catalogue response and for the persisted selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonaProfile {
    #[serde(rename = "uuid")]
    pub id: String,
    #[serde(rename = "label")]
    pub display_name: String,
    /// Name of the welcome clip served under `/examples/`.
    #[serde(rename = "voice")]
    pub welcome_audio_ref: String,
}

/// What `createStage` hands back: the stage plus the persona catalogue.
#[derive(Debug, Clone)]
pub struct StageCatalogue {
    pub stage: StageSession,
    pub personas: Vec<PersonaProfile>,
}

/// One synthesized response clip of a turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSegment {
    pub segment_id: String,
    pub transcript_text: String,
    pub playback_url: String,
}

/// Server acknowledgement of an uploaded utterance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub request_id: String,
    pub transcript_text: String,
}

/// Client-side estimate of how much of the recording was speech.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeechHint {
    pub estimated_ms: u64,
    pub may_have_spoken: bool,
}

/// Result of a single poll for the next segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The server is still working; sleep and poll again.
    Processing,
    /// One segment is ready for playback.
    Ready {
        segment_id: String,
        transcript_text: String,
    },
    /// No more segments for this request.
    Complete,
}
