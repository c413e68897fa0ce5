//! Error taxonomy shared by the bootstrap and the conversation loop.

use thiserror::Error;

/// Everything that can go wrong between "press to talk" and the last
/// played segment.
#[derive(Debug, Error)]
pub enum TalkError {
    /// The service origin is neither loopback nor https. Fatal for the session.
    #[error("insecure origin {origin}: microphone access requires a loopback host or https")]
    SecurityContext { origin: String },

    /// Permission denied, no capture device, or the device failed mid-stream.
    #[error("audio device error: {0}")]
    Device(String),

    /// Any failed HTTP call: network error, non-2xx status, or non-zero envelope code.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Policy rejection: the speech estimate was below the minimum.
    #[error("speech too short ({speech_ms}ms < {min_ms}ms), turn skipped")]
    SilentInput { speech_ms: u64, min_ms: u64 },

    /// Audio failed to download, decode, or play.
    #[error("playback error: {0}")]
    Playback(String),

    #[error("unknown persona {0}")]
    UnknownPersona(String),

    /// An operation was requested in a phase that does not allow it.
    #[error("{operation} not allowed while {phase}")]
    InvalidPhase {
        operation: &'static str,
        phase: String,
    },

    #[error("persistence error: {0}")]
    Persistence(String),
}

impl From<reqwest::Error> for TalkError {
    fn from(e: reqwest::Error) -> Self {
        Self::ServiceUnavailable(e.to_string())
    }
}

pub type TalkResult<T> = Result<T, TalkError>;
