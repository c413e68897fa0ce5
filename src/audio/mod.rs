//! Audio capabilities: microphone capture and segment playback.
//!
//! The orchestrator only sees the two traits below. The listener-to-future
//! adaptation (stream ended, playback ended) lives entirely inside the
//! implementations in `capture` and `playback`.

pub mod capture;
pub mod decode;
pub mod playback;
pub mod ring_buffer;
pub mod wav;

use crate::error::TalkResult;

pub use capture::CpalMicrophone;
pub use playback::RodioPlayer;

/// Sample rate of everything captured and uploaded.
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

/// Platform audio-capture device.
///
/// `open` may show a permission prompt; `record` consumes the opened stream
/// and starts buffering; `stop` releases the device and hands back the
/// whole utterance.
#[allow(async_fn_in_trait)]
pub trait Microphone {
    /// An opened, idle capture stream.
    type Stream;
    /// A live recording. At most one exists per orchestrator.
    type Recorder;

    async fn open(&self) -> TalkResult<Self::Stream>;

    /// Begin buffering. Capture may become active some time after this returns.
    fn record(&self, stream: Self::Stream) -> TalkResult<Self::Recorder>;

    /// Resolves once the stream has ended and all buffered audio is flushed.
    async fn stop(&self, recorder: Self::Recorder) -> TalkResult<Utterance>;
}

/// Audio output element.
#[allow(async_fn_in_trait)]
pub trait Player {
    /// Play the clip behind `url` and resolve when it has ended.
    async fn play_until_ended(&self, url: &str) -> TalkResult<()>;
}

/// One recorded utterance, ready for upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Utterance {
    /// WAV-encoded 16 kHz mono PCM.
    pub audio: Vec<u8>,
    /// Number of capture callbacks that delivered data.
    pub chunks: usize,
    pub samples: usize,
}

impl Utterance {
    /// Whether the device delivered any data at all.
    pub fn has_data(&self) -> bool {
        self.chunks > 0
    }
}
